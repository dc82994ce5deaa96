// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all reconcilers.

use std::collections::BTreeMap;

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of the application
pub const K8S_NAME: &str = "app.kubernetes.io/name";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

/// Legacy selector label used by the gateway pods
pub const APP: &str = "app";

// ============================================================================
// Label Values
// ============================================================================

/// Value for `app.kubernetes.io/part-of`
pub const PART_OF_MLA: &str = "mla";

/// Value for `app.kubernetes.io/managed-by`
pub const MANAGED_BY_MLA_OPERATOR: &str = "mla-operator";

/// Component value for the per-cluster gateway
pub const COMPONENT_GATEWAY: &str = "gateway";

// ============================================================================
// Annotations
// ============================================================================

/// SHA-256 of the desired object last written by the operator
pub const CONFIG_HASH_ANNOTATION: &str = "mla.k8c.io/config-hash";

/// External hostname a gateway certificate was issued for
pub const CERT_HOSTNAME_ANNOTATION: &str = "mla.k8c.io/hostname";

/// SHA-256 of the CA certificate a gateway certificate was signed with
pub const CERT_CA_HASH_ANNOTATION: &str = "mla.k8c.io/ca-hash";

/// Nodeport proxy annotation exposing a `NodePort` service
pub const NODEPORT_PROXY_EXPOSE: &str = "nodeport-proxy.k8s.io/expose";

/// Nodeport proxy annotation exposing a service through the namespaced (tunneling) listener
pub const NODEPORT_PROXY_EXPOSE_NAMESPACED: &str = "nodeport-proxy.k8s.io/expose-namespaced";

/// Nodeport proxy annotation mapping an SNI exposed port to its hostname
pub const NODEPORT_PROXY_PORT_MAPPING: &str = "nodeport-proxy.k8s.io/port-mapping";

/// Labels applied to every gateway resource and used as the pod selector
#[must_use]
pub fn gateway_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP.to_string(), crate::constants::GATEWAY_NAME.to_string()),
        (K8S_NAME.to_string(), crate::constants::GATEWAY_NAME.to_string()),
        (K8S_COMPONENT.to_string(), COMPONENT_GATEWAY.to_string()),
        (K8S_PART_OF.to_string(), PART_OF_MLA.to_string()),
        (
            K8S_MANAGED_BY.to_string(),
            MANAGED_BY_MLA_OPERATOR.to_string(),
        ),
    ])
}

/// Pod selector of the gateway `Deployment` and `Service`s
#[must_use]
pub fn gateway_selector() -> BTreeMap<String, String> {
    BTreeMap::from([(APP.to_string(), crate::constants::GATEWAY_NAME.to_string())])
}

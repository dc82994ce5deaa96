// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the MLA operator.
//!
//! Names in this module are part of the contract with other platform
//! components (dashboards, the nodeport proxy, Cortex runtime config) and must
//! not be changed casually.

// ============================================================================
// API Constants
// ============================================================================

/// Fully qualified API version (group/version) of the platform CRDs
pub const API_GROUP_VERSION: &str = "kubermatic.k8c.io/v1";

/// Kind name for `Cluster` resource
pub const KIND_CLUSTER: &str = "Cluster";

/// Name of the single `MLAAdminSetting` object in a cluster namespace
pub const MLA_ADMIN_SETTING_NAME: &str = "mla-admin-setting";

/// Namespace prefix of tenant cluster namespaces (`cluster-{name}`)
pub const CLUSTER_NAMESPACE_PREFIX: &str = "cluster-";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer guarding Grafana datasources and MLA gateway resources of a cluster
pub const DATASOURCE_CLEANUP_FINALIZER: &str = "kubermatic.k8c.io/mla-cleanup-datasources";

/// Finalizer guarding the Cortex alertmanager configuration of a cluster
pub const ALERTMANAGER_FINALIZER: &str = "kubermatic.k8c.io/mla-alertmanager";

/// Finalizer guarding the Grafana user of a platform `User`
pub const GRAFANA_USER_FINALIZER: &str = "kubermatic.k8c.io/mla-grafana-user";

/// Finalizer guarding the Grafana dashboards of a dashboard `ConfigMap`
pub const GRAFANA_DASHBOARD_FINALIZER: &str = "kubermatic.k8c.io/mla-grafana-dashboard";

/// Finalizer guarding a rule group pushed to Cortex or Loki
pub const RULE_GROUP_FINALIZER: &str = "kubermatic.k8c.io/mla-rule-group";

/// Finalizer guarding the per-cluster copies of a template `RuleGroup`
pub const RULE_GROUP_SYNC_FINALIZER: &str = "kubermatic.k8c.io/mla-rule-group-sync";

/// Finalizer guarding a cluster's entry in the Cortex runtime config
pub const RATELIMIT_CORTEX_FINALIZER: &str = "kubermatic.k8c.io/mla-ratelimit-cortex";

// ============================================================================
// Grafana Constants
// ============================================================================

/// Name of the single Grafana organization shared by every tenant cluster
pub const GRAFANA_ORG_NAME: &str = "KKP";

/// Grafana's built-in default organization, users are removed from it after bootstrap
pub const GRAFANA_DEFAULT_ORG_ID: i64 = 1;

/// Header carrying the organization a Grafana request is scoped to
pub const GRAFANA_ORG_ID_HEADER: &str = "X-Grafana-Org-Id";

/// Name prefix of `ConfigMap`s in the MLA namespace that hold Grafana dashboards
pub const GRAFANA_DASHBOARD_CONFIGMAP_PREFIX: &str = "grafana-dashboards";

/// Key in the Grafana credentials `Secret` holding the admin user name
pub const GRAFANA_SECRET_USER_KEY: &str = "admin-user";

/// Key in the Grafana credentials `Secret` holding the admin password
pub const GRAFANA_SECRET_PASSWORD_KEY: &str = "admin-password";

/// Datasource type for the Cortex alertmanager
pub const DATASOURCE_TYPE_ALERTMANAGER: &str = "alertmanager";

/// Datasource type for Loki
pub const DATASOURCE_TYPE_LOKI: &str = "loki";

/// Datasource type for Cortex (Prometheus compatible)
pub const DATASOURCE_TYPE_PROMETHEUS: &str = "prometheus";

/// Datasource access mode, Grafana's backend proxies every query
pub const DATASOURCE_ACCESS_PROXY: &str = "proxy";

// ============================================================================
// Cortex / Loki Constants
// ============================================================================

/// Header carrying the tenant (cluster name) for Cortex and Loki requests
pub const SCOPE_ORG_ID_HEADER: &str = "X-Scope-OrgID";

/// Path of the per-tenant alertmanager configuration endpoint
pub const ALERTMANAGER_CONFIG_ENDPOINT: &str = "/api/v1/alerts";

/// Rule group namespace path on the Cortex ruler
pub const METRICS_RULE_GROUP_ENDPOINT: &str = "/api/v1/rules/default";

/// Rule group namespace path on the Loki ruler
pub const LOGS_RULE_GROUP_ENDPOINT: &str = "/loki/api/v1/rules/default";

/// Name of the Cortex runtime configuration `ConfigMap` in the MLA namespace
pub const RUNTIME_CONFIG_CONFIGMAP_NAME: &str = "cortex-runtime-config";

/// Key of the runtime configuration document inside the `ConfigMap`
pub const RUNTIME_CONFIG_KEY: &str = "runtime-config.yaml";

// ============================================================================
// Alertmanager Constants
// ============================================================================

/// Name of the per-cluster `Alertmanager` object
pub const ALERTMANAGER_NAME: &str = "alertmanager";

/// Default name of the `Secret` holding a cluster's alertmanager configuration
pub const DEFAULT_ALERTMANAGER_CONFIG_SECRET_NAME: &str = "alertmanager";

/// Key of the alertmanager configuration inside the config `Secret`
pub const ALERTMANAGER_CONFIG_SECRET_KEY: &str = "alertmanager.yaml";

/// Configuration pushed for clusters that never customised their alertmanager
pub const DEFAULT_ALERTMANAGER_CONFIG: &str = r"template_files: {}
alertmanager_config: |
  route:
    receiver: 'null'
  receivers:
    - name: 'null'
";

// ============================================================================
// MLA Gateway Constants
// ============================================================================

/// Name of the gateway `Deployment`, internal `Service` and `ConfigMap`
pub const GATEWAY_NAME: &str = "mla-gateway";

/// Name of the externally exposed gateway `Service`
pub const GATEWAY_EXTERNAL_NAME: &str = "mla-gateway-ext";

/// Name of the `Secret` holding the gateway CA
pub const GATEWAY_CA_SECRET_NAME: &str = "mla-gateway-ca";

/// Name of the `Secret` holding the gateway serving certificate
pub const GATEWAY_CERTIFICATES_SECRET_NAME: &str = "mla-gateway-certificates";

/// SNI prefix of the gateway's external hostname
pub const GATEWAY_SNI_PREFIX: &str = "mla-gateway.";

/// Key of the nginx configuration in the gateway `ConfigMap`
pub const GATEWAY_CONFIG_KEY: &str = "nginx.conf";

/// CA certificate key in the CA `Secret`
pub const GATEWAY_CA_CERT_KEY: &str = "ca.crt";

/// CA private key in the CA `Secret`
pub const GATEWAY_CA_KEY_KEY: &str = "ca.key";

/// Serving certificate key in the certificates `Secret`
pub const GATEWAY_CERT_KEY: &str = "gateway.crt";

/// Serving private key in the certificates `Secret`
pub const GATEWAY_KEY_KEY: &str = "gateway.key";

/// Gateway container image (registry is prepended)
pub const GATEWAY_IMAGE: &str = "nginxinc/nginx-unprivileged:1.27-alpine";

/// Default registry of the gateway image
pub const GATEWAY_DEFAULT_REGISTRY: &str = "docker.io";

/// Port the gateway listens on for in-cluster (unauthenticated) traffic
pub const GATEWAY_INTERNAL_PORT: i32 = 8080;

/// Port the gateway listens on for mTLS traffic from outside the cluster
pub const GATEWAY_EXTERNAL_PORT: i32 = 8443;

/// Name of the external gateway `Service` port, used in SNI port mappings
pub const GATEWAY_EXTERNAL_PORT_NAME: &str = "mla-gateway-ext";

/// Port of the internal gateway `Service`
pub const GATEWAY_INTERNAL_SERVICE_PORT: i32 = 80;

/// Port of the external gateway `Service`
pub const GATEWAY_EXTERNAL_SERVICE_PORT: i32 = 443;

/// Replicas of the gateway `Deployment`
pub const GATEWAY_REPLICAS: i32 = 1;

/// Minimum ready replicas for the gateway to be considered up
pub const GATEWAY_MIN_READY_REPLICAS: i32 = 1;

/// Validity of the gateway CA certificate in days
pub const GATEWAY_CA_VALIDITY_DAYS: i64 = 3650;

/// Validity of the gateway serving certificate in days
pub const GATEWAY_CERT_VALIDITY_DAYS: i64 = 730;

// ============================================================================
// Controller Timing Constants
// ============================================================================

/// Requeue delay while a cluster has no namespace or external address yet
pub const NOT_READY_REQUEUE_SECS: u64 = 5;

/// Requeue duration for error conditions (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Delay before the whole cleanup pass is retried after a failure
pub const CLEANUP_RETRY_DELAY_SECS: u64 = 10;

/// Default timeout for outbound Grafana and Cortex requests
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

/// Default number of concurrent reconciles per controller
pub const DEFAULT_WORKER_COUNT: u16 = 4;

// ============================================================================
// Runtime Configuration Constants
// ============================================================================

/// Number of Tokio worker threads for the operator runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

/// Default bind address of the Prometheus metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Field manager / reporting controller name for events
pub const CONTROLLER_NAME: &str = "mla-operator";

/// Event reason used when a reconcile fails
pub const EVENT_REASON_RECONCILING_ERROR: &str = "ReconcilingError";

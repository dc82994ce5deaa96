// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) read and written by the MLA controllers.
//!
//! The platform owns these kinds; the MLA controllers only read the fields
//! modelled here and write status sub-fields and finalizers.
//!
//! # Resource Types
//!
//! - [`Cluster`] - a tenant ("user") cluster, cluster-scoped
//! - [`User`] - a platform user, cluster-scoped
//! - [`Alertmanager`] - per-cluster alertmanager configuration reference
//! - [`RuleGroup`] - a Prometheus or Loki rule group, or a template of one
//! - [`MLAAdminSetting`] - per-cluster MLA rate limits
//!
//! # Example: Reading MLA settings of a cluster
//!
//! ```rust,no_run
//! use mla_operator::crd::{Cluster, ClusterSpec, MLASettings};
//!
//! let cluster = Cluster::new(
//!     "test",
//!     ClusterSpec {
//!         mla: Some(MLASettings {
//!             monitoring_enabled: true,
//!             logging_enabled: false,
//!         }),
//!         ..Default::default()
//!     },
//! );
//! assert!(cluster.mla_enabled());
//! ```

use crate::constants::{
    ALERTMANAGER_FINALIZER, CLUSTER_NAMESPACE_PREFIX, DATASOURCE_CLEANUP_FINALIZER,
};
use crate::errors::UnknownRuleGroupType;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::ByteString;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Cluster
// ============================================================================

/// How the control plane of a tenant cluster is exposed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ExposeStrategy {
    /// Every service gets its own node port, fronted by the nodeport proxy
    #[default]
    NodePort,
    /// Services are exposed behind one load balancer per cluster
    LoadBalancer,
    /// Services are reached through the SNI tunneling listener
    Tunneling,
}

/// Monitoring and logging switches of a cluster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MLASettings {
    /// Scrape and ship metrics of the user cluster
    #[serde(default)]
    pub monitoring_enabled: bool,

    /// Ship logs of the user cluster
    #[serde(default)]
    pub logging_enabled: bool,
}

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kubermatic.k8c.io",
    version = "v1",
    kind = "Cluster",
    doc = "Cluster is a tenant (user) cluster managed by the platform. The MLA controllers use its name as the Grafana/Cortex tenant key."
)]
#[kube(status = "ClusterStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Display name shown in Grafana datasource names
    #[serde(default)]
    pub human_readable_name: String,

    /// Paused clusters are ignored by every controller
    #[serde(default)]
    pub pause: bool,

    /// Exposure of control plane services
    #[serde(default)]
    pub expose_strategy: ExposeStrategy,

    /// Monitoring, logging and alerting settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mla: Option<MLASettings>,
}

/// Tri-state health as written to `status.extendedHealth`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum HealthStatus {
    #[serde(rename = "HealthStatusDown")]
    Down,
    #[serde(rename = "HealthStatusUp")]
    Up,
    #[serde(rename = "HealthStatusProvisioning")]
    Provisioning,
}

impl HealthStatus {
    /// Wire representation of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Down => "HealthStatusDown",
            Self::Up => "HealthStatusUp",
            Self::Provisioning => "HealthStatusProvisioning",
        }
    }
}

/// Health of the MLA owned components of a cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedClusterHealth {
    /// Whether the alertmanager configuration reached Cortex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alertmanager_config: Option<HealthStatus>,

    /// Whether the MLA gateway is serving
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mla_gateway: Option<HealthStatus>,
}

/// Which `extendedHealth` field a health update targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthField {
    AlertmanagerConfig,
    MlaGateway,
}

impl HealthField {
    /// JSON field name below `status.extendedHealth`.
    #[must_use]
    pub fn json_name(self) -> &'static str {
        match self {
            Self::AlertmanagerConfig => "alertmanagerConfig",
            Self::MlaGateway => "mlaGateway",
        }
    }

    /// Current value of this field in `health`.
    #[must_use]
    pub fn get(self, health: &ExtendedClusterHealth) -> Option<HealthStatus> {
        match self {
            Self::AlertmanagerConfig => health.alertmanager_config,
            Self::MlaGateway => health.mla_gateway,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAddress {
    /// DNS name under which the cluster's services are reachable from outside
    #[serde(default)]
    pub external_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Namespace holding the cluster's control plane, empty until provisioned
    #[serde(default)]
    pub namespace_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<ClusterAddress>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_health: Option<ExtendedClusterHealth>,
}

impl Cluster {
    /// Namespace of the cluster, `None` until one has been assigned.
    #[must_use]
    pub fn namespace_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.namespace_name.as_str())
            .filter(|ns| !ns.is_empty())
    }

    /// External address of the cluster, `None` until one has been assigned.
    #[must_use]
    pub fn external_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.address.as_ref())
            .map(|a| a.external_name.as_str())
            .filter(|name| !name.is_empty())
    }

    /// MLA settings, all disabled when unset.
    #[must_use]
    pub fn mla_settings(&self) -> MLASettings {
        self.spec.mla.unwrap_or_default()
    }

    /// Monitoring or logging is enabled.
    #[must_use]
    pub fn mla_enabled(&self) -> bool {
        let mla = self.mla_settings();
        mla.monitoring_enabled || mla.logging_enabled
    }

    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Current extended health, empty when never written.
    #[must_use]
    pub fn extended_health(&self) -> ExtendedClusterHealth {
        self.status
            .as_ref()
            .and_then(|s| s.extended_health.clone())
            .unwrap_or_default()
    }

    /// Name shown to humans, falls back to the cluster name.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.spec.human_readable_name.is_empty() {
            self.name_any()
        } else {
            self.spec.human_readable_name.clone()
        }
    }

    /// Whether an MLA reconciler has adopted the cluster.
    #[must_use]
    pub fn has_mla_finalizer(&self) -> bool {
        self.finalizers()
            .iter()
            .any(|f| f == DATASOURCE_CLEANUP_FINALIZER || f == ALERTMANAGER_FINALIZER)
    }

    /// Whether template rule groups should be fanned out into this cluster.
    #[must_use]
    pub fn accepts_rule_groups(&self) -> bool {
        !self.spec.pause
            && !self.is_deleting()
            && self.namespace_name().is_some()
            && self.mla_enabled()
            && self.has_mla_finalizer()
    }
}

/// Cluster name for a tenant namespace (`cluster-{name}`).
#[must_use]
pub fn cluster_name_from_namespace(namespace: &str) -> Option<&str> {
    namespace
        .strip_prefix(CLUSTER_NAMESPACE_PREFIX)
        .filter(|name| !name.is_empty())
}

// ============================================================================
// User
// ============================================================================

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kubermatic.k8c.io",
    version = "v1",
    kind = "User",
    doc = "User is a platform user. Each user is mirrored into Grafana and made a member of the shared organization."
)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// Full name of the user
    #[serde(default)]
    pub name: String,

    /// Email address, also the Grafana login
    pub email: String,

    /// Platform administrators become Grafana server admins and org admins
    #[serde(default)]
    pub is_admin: bool,
}

// ============================================================================
// Alertmanager
// ============================================================================

/// Reference to a `Secret` in the same namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LocalSecretReference {
    #[serde(default)]
    pub name: String,
}

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kubermatic.k8c.io",
    version = "v1",
    kind = "Alertmanager",
    namespaced,
    doc = "Alertmanager points at the Secret holding the alertmanager configuration of a user cluster."
)]
#[kube(status = "AlertmanagerStatus")]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerSpec {
    /// Secret with the configuration under key `alertmanager.yaml`
    #[serde(default)]
    pub config_secret: LocalSecretReference,
}

/// Outcome of the last configuration push.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerConfigurationStatus {
    /// RFC3339 time of the last successful push
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,

    /// `True` when Cortex holds the configuration, `False` otherwise
    #[serde(default)]
    pub status: String,

    /// Error of the last failed push
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerStatus {
    #[serde(default)]
    pub config_status: AlertmanagerConfigurationStatus,
}

// ============================================================================
// RuleGroup
// ============================================================================

/// Backend a rule group is evaluated by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuleGroupType {
    /// Prometheus rules evaluated by the Cortex ruler
    Metrics,
    /// LogQL rules evaluated by the Loki ruler
    Logs,
}

impl RuleGroupType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metrics => "Metrics",
            Self::Logs => "Logs",
        }
    }
}

impl fmt::Display for RuleGroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleGroupType {
    type Err = UnknownRuleGroupType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Metrics" => Ok(Self::Metrics),
            "Logs" => Ok(Self::Logs),
            other => Err(UnknownRuleGroupType(other.to_string())),
        }
    }
}

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kubermatic.k8c.io",
    version = "v1",
    kind = "RuleGroup",
    namespaced,
    doc = "RuleGroup holds a Prometheus (Metrics) or Loki (Logs) rule group. RuleGroups in the MLA namespace are templates copied into every MLA enabled cluster."
)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroupSpec {
    /// `Metrics` or `Logs`
    pub rule_group_type: String,

    /// Owning cluster, empty for templates
    #[serde(default)]
    pub cluster: ObjectReference,

    /// Rule group in Prometheus/Loki ruler YAML format
    #[schemars(with = "String")]
    pub data: ByteString,
}

impl RuleGroup {
    /// Parsed `spec.ruleGroupType`.
    ///
    /// # Errors
    ///
    /// Returns an error for any value other than `Metrics` or `Logs`.
    pub fn rule_group_type(&self) -> Result<RuleGroupType, UnknownRuleGroupType> {
        self.spec.rule_group_type.parse()
    }

    /// Name of the referenced cluster, `None` for templates.
    #[must_use]
    pub fn cluster_name(&self) -> Option<&str> {
        self.spec
            .cluster
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

// ============================================================================
// MLAAdminSetting
// ============================================================================

/// Cortex limits of a tenant. Zero means "use the Cortex default".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringRateLimitSettings {
    #[serde(default)]
    pub ingestion_rate: i64,
    #[serde(default)]
    pub ingestion_burst_size: i64,
    #[serde(default)]
    pub max_series_per_metric: i64,
    #[serde(default)]
    pub max_series_per_query: i64,
    #[serde(default)]
    pub max_samples_per_query: i64,
    #[serde(default)]
    pub max_series_total: i64,
    /// Queries per second accepted by the gateway
    #[serde(default)]
    pub query_rate: i64,
    #[serde(default)]
    pub query_burst_size: i64,
}

/// Loki limits of a tenant, enforced by the MLA gateway.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoggingRateLimitSettings {
    /// Push requests per second
    #[serde(default)]
    pub ingestion_rate: i64,
    #[serde(default)]
    pub ingestion_burst_size: i64,
    /// Queries per second
    #[serde(default)]
    pub query_rate: i64,
    #[serde(default)]
    pub query_burst_size: i64,
}

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kubermatic.k8c.io",
    version = "v1",
    kind = "MLAAdminSetting",
    namespaced,
    doc = "MLAAdminSetting carries administrator controlled MLA limits for a single user cluster."
)]
#[serde(rename_all = "camelCase")]
pub struct MLAAdminSettingSpec {
    /// Name of the cluster the limits apply to
    pub cluster_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring_rate_limits: Option<MonitoringRateLimitSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging_rate_limits: Option<LoggingRateLimitSettings>,
}

impl MLAAdminSetting {
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;

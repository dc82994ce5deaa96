// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # MLA Operator - Monitoring, Logging and Alerting for Kubernetes user clusters
//!
//! The MLA operator keeps a shared Grafana, Cortex and Loki stack in sync with
//! the user clusters of a platform. For every cluster that enables monitoring
//! or logging it provisions Grafana datasources, an authenticating gateway,
//! per-tenant Alertmanager configuration, alerting and recording rules and
//! per-tenant rate limits. Platform users are mirrored into a shared Grafana
//! organization.
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definitions consumed and owned by the operator
//! - [`grafana`] - Grafana HTTP API client
//! - [`cortex`] - Cortex alertmanager and Cortex/Loki ruler client
//! - [`reconcilers`] - Reconciliation logic for each concern
//! - [`controllers`] - Controller wiring and watch mappings
//! - [`context`] - Shared context passed to all controllers
//! - [`options`] - Command line and environment configuration
//! - [`metrics`] - Prometheus metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use mla_operator::crd::{ClusterSpec, MLASettings};
//!
//! let spec = ClusterSpec {
//!     human_readable_name: "production".to_string(),
//!     mla: Some(MLASettings {
//!         monitoring_enabled: true,
//!         logging_enabled: false,
//!     }),
//!     ..Default::default()
//! };
//! assert!(spec.mla.is_some());
//! ```

pub mod constants;
pub mod context;
pub mod controllers;
pub mod cortex;
pub mod crd;
pub mod errors;
pub mod grafana;
pub mod labels;
pub mod metrics;
pub mod options;
pub mod reconcilers;

#[cfg(test)]
pub mod test_support;

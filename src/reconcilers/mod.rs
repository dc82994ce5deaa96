// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation logic for user cluster MLA.
//!
//! Each reconciler brings one slice of the MLA stack in line with the
//! Kubernetes objects describing it. Reconcilers are plain structs holding the
//! shared [`Context`](crate::context::Context); the controllers in
//! [`crate::controllers`] drive them.
//!
//! # Reconciliation Architecture
//!
//! 1. **Watch** - the controller watches the primary resource and maps
//!    related objects onto it
//! 2. **Reconcile** - compare desired state with Grafana, Cortex or the
//!    cluster namespace
//! 3. **Update** - issue only the calls needed to converge
//! 4. **Status** - report health on the `Cluster` status
//!
//! Remote state is only created while a reconciler-owned finalizer is held on
//! the object, and removed before that finalizer is released.
//!
//! # Available Reconcilers
//!
//! ## Grafana
//!
//! - [`GrafanaOrgReconciler`] - the shared organization and its dashboards
//! - [`GrafanaUserReconciler`] - users and their organization role
//! - [`GrafanaDashboardReconciler`] - dashboards from `ConfigMap`s
//! - [`GrafanaDatasourceReconciler`] - per-cluster datasources and the MLA gateway
//!
//! ## Cortex and Loki
//!
//! - [`AlertmanagerReconciler`] - per-tenant Alertmanager configuration
//! - [`RuleGroupReconciler`] - rule groups pushed to the rulers
//! - [`RuleGroupSyncReconciler`] - template rule groups fanned out to clusters
//! - [`RatelimitReconciler`] - per-tenant limits in the runtime config
//!
//! ## Global
//!
//! - [`CleanupReconciler`] - removes everything when MLA is disabled

pub mod alertmanager;
pub mod cleanup;
pub mod finalizers;
pub mod gateway;
pub mod grafana_dashboard;
pub mod grafana_datasource;
pub mod grafana_org;
pub mod grafana_user;
pub mod ratelimit;
pub mod resources;
pub mod rulegroup;
pub mod rulegroup_sync;
pub mod status;

pub use alertmanager::AlertmanagerReconciler;
pub use cleanup::{Cleaner, CleanupReconciler};
pub use grafana_dashboard::GrafanaDashboardReconciler;
pub use grafana_datasource::GrafanaDatasourceReconciler;
pub use grafana_org::GrafanaOrgReconciler;
pub use grafana_user::GrafanaUserReconciler;
pub use ratelimit::RatelimitReconciler;
pub use rulegroup::RuleGroupReconciler;
pub use rulegroup_sync::RuleGroupSyncReconciler;

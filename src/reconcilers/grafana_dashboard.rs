// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Grafana dashboards shipped as `ConfigMap`s.
//!
//! Every `ConfigMap` in the MLA namespace whose name starts with
//! `grafana-dashboards` carries one JSON dashboard per data entry. Dashboards
//! are written with overwrite into the shared organization and removed by
//! their `uid` when the `ConfigMap` goes away.

use crate::constants::{GRAFANA_DASHBOARD_CONFIGMAP_PREFIX, GRAFANA_DASHBOARD_FINALIZER};
use crate::context::Context;
use crate::reconcilers::cleanup::Cleaner;
use crate::reconcilers::finalizers::{ensure_finalizer, remove_finalizer};
use crate::reconcilers::grafana_org::{find_shared_org_id, shared_org_id};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Whether `cm` is a dashboard `ConfigMap` of the MLA namespace.
#[must_use]
pub fn is_dashboard_config_map(cm: &ConfigMap, mla_namespace: &str) -> bool {
    cm.namespace().as_deref() == Some(mla_namespace)
        && cm.name_any().starts_with(GRAFANA_DASHBOARD_CONFIGMAP_PREFIX)
}

/// Dashboards of a `ConfigMap`, one per data entry.
///
/// # Errors
///
/// Returns an error naming the entry that is not valid JSON.
pub fn parse_dashboards(cm: &ConfigMap) -> Result<Vec<Value>> {
    cm.data
        .iter()
        .flatten()
        .map(|(key, raw)| {
            serde_json::from_str(raw).with_context(|| {
                format!(
                    "dashboard {key} in ConfigMap {} is not valid JSON",
                    cm.name_any()
                )
            })
        })
        .collect()
}

pub struct GrafanaDashboardReconciler {
    ctx: Arc<Context>,
}

impl GrafanaDashboardReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// # Errors
    ///
    /// Returns an error if a dashboard is malformed or Grafana fails.
    pub async fn reconcile(&self, cm: &ConfigMap) -> Result<Action> {
        if !is_dashboard_config_map(cm, &self.ctx.mla_namespace) {
            return Ok(Action::await_change());
        }
        if cm.metadata.deletion_timestamp.is_some() {
            self.handle_deletion(cm).await?;
            return Ok(Action::await_change());
        }

        ensure_finalizer(&self.ctx.client, cm, GRAFANA_DASHBOARD_FINALIZER).await?;
        let org_id = shared_org_id(self.ctx.grafana.as_ref()).await?;
        for board in parse_dashboards(cm)? {
            self.ctx
                .grafana
                .set_dashboard(org_id, &board, true)
                .await
                .with_context(|| format!("failed to set dashboard from ConfigMap {}", cm.name_any()))?;
        }
        Ok(Action::await_change())
    }

    /// Delete the dashboards of `cm`, then release it.
    async fn handle_deletion(&self, cm: &ConfigMap) -> Result<()> {
        if let Some(org_id) = find_shared_org_id(self.ctx.grafana.as_ref()).await? {
            for (key, raw) in cm.data.iter().flatten() {
                // Entries that never parsed were never uploaded.
                let Ok(board) = serde_json::from_str::<Value>(raw) else {
                    warn!(configmap = %cm.name_any(), key = %key, "Skipping malformed dashboard");
                    continue;
                };
                let Some(uid) = board.get("uid").and_then(Value::as_str) else {
                    debug!(configmap = %cm.name_any(), key = %key, "Dashboard has no uid");
                    continue;
                };
                match self.ctx.grafana.delete_dashboard_by_uid(org_id, uid).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        return Err(e)
                            .with_context(|| format!("failed to delete dashboard {uid}"));
                    }
                }
            }
        }
        remove_finalizer(&self.ctx.client, cm, GRAFANA_DASHBOARD_FINALIZER).await
    }
}

#[async_trait]
impl Cleaner for GrafanaDashboardReconciler {
    fn name(&self) -> &'static str {
        "grafana-dashboard"
    }

    async fn cleanup(&self) -> Result<()> {
        let config_maps: Api<ConfigMap> =
            Api::namespaced(self.ctx.client.clone(), &self.ctx.mla_namespace);
        let list = config_maps
            .list(&ListParams::default())
            .await
            .context("failed to list dashboard ConfigMaps")?;
        for cm in list
            .items
            .iter()
            .filter(|cm| is_dashboard_config_map(cm, &self.ctx.mla_namespace))
        {
            self.handle_deletion(cm).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "grafana_dashboard_tests.rs"]
mod grafana_dashboard_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared Grafana organization.
//!
//! All tenant clusters live in a single Grafana organization. This reconciler
//! keeps it present and re-applies the dashboards of every dashboard
//! `ConfigMap`, which covers an organization recreated behind our back.
//! It holds no finalizer and takes no part in cleanup: the organization
//! outlives MLA being switched off.

use crate::constants::{GRAFANA_DASHBOARD_CONFIGMAP_PREFIX, GRAFANA_ORG_NAME};
use crate::context::Context;
use crate::crd::Cluster;
use crate::grafana::GrafanaApi;
use crate::reconcilers::grafana_dashboard::parse_dashboards;
use anyhow::{Context as _, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use std::sync::Arc;
use tracing::{debug, info};

/// ID of the shared organization.
///
/// # Errors
///
/// Returns an error if the organization does not exist or Grafana fails.
pub async fn shared_org_id(grafana: &dyn GrafanaApi) -> Result<i64> {
    let org = grafana
        .get_org_by_name(GRAFANA_ORG_NAME)
        .await
        .with_context(|| format!("failed to get Grafana organization {GRAFANA_ORG_NAME}"))?;
    Ok(org.id)
}

/// ID of the shared organization, `None` when it does not exist.
///
/// # Errors
///
/// Returns an error if Grafana fails for any reason other than not-found.
pub async fn find_shared_org_id(grafana: &dyn GrafanaApi) -> Result<Option<i64>> {
    match grafana.get_org_by_name(GRAFANA_ORG_NAME).await {
        Ok(org) => Ok(Some(org.id)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e)
            .with_context(|| format!("failed to get Grafana organization {GRAFANA_ORG_NAME}")),
    }
}

/// Look the organization up, creating it only when it does not exist.
///
/// # Errors
///
/// Returns an error if Grafana fails.
pub async fn ensure_shared_org(grafana: &dyn GrafanaApi) -> Result<i64> {
    if let Some(id) = find_shared_org_id(grafana).await? {
        return Ok(id);
    }
    info!("Creating Grafana organization {}", GRAFANA_ORG_NAME);
    grafana
        .create_org(GRAFANA_ORG_NAME)
        .await
        .with_context(|| format!("failed to create Grafana organization {GRAFANA_ORG_NAME}"))
}

pub struct GrafanaOrgReconciler {
    ctx: Arc<Context>,
}

impl GrafanaOrgReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Ensure the organization and its dashboards. The cluster only triggers.
    ///
    /// # Errors
    ///
    /// Returns an error if Grafana fails or a dashboard is not valid JSON.
    pub async fn reconcile(&self, cluster: &Cluster) -> Result<Action> {
        debug!(cluster = %cluster.name_any(), "Ensuring Grafana organization");
        let grafana = self.ctx.grafana.as_ref();
        let org_id = ensure_shared_org(grafana).await?;

        let config_maps: Api<ConfigMap> =
            Api::namespaced(self.ctx.client.clone(), &self.ctx.mla_namespace);
        let list = config_maps
            .list(&ListParams::default())
            .await
            .context("failed to list dashboard ConfigMaps")?;

        for cm in list
            .items
            .iter()
            .filter(|cm| cm.name_any().starts_with(GRAFANA_DASHBOARD_CONFIGMAP_PREFIX))
        {
            for board in parse_dashboards(cm)? {
                grafana
                    .set_dashboard(org_id, &board, true)
                    .await
                    .with_context(|| {
                        format!("failed to set dashboard from ConfigMap {}", cm.name_any())
                    })?;
            }
        }
        Ok(Action::await_change())
    }
}

#[cfg(test)]
#[path = "grafana_org_tests.rs"]
mod grafana_org_tests;

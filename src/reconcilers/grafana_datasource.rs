// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-cluster Grafana datasources and the MLA gateway in front of them.
//!
//! For every MLA enabled cluster this reconciler runs the gateway in the
//! cluster namespace and registers up to three datasources in the shared
//! organization, all pointing at the gateway's internal Service:
//!
//! | Datasource | Enabled when |
//! |---|---|
//! | `alertmanager-{cluster}` | monitoring or logging |
//! | `loki-{cluster}` | logging |
//! | `prometheus-{cluster}` | monitoring |
//!
//! The finalizer `kubermatic.k8c.io/mla-cleanup-datasources` is held for as
//! long as any of them may exist.

use crate::constants::{
    DATASOURCE_ACCESS_PROXY, DATASOURCE_CLEANUP_FINALIZER, DATASOURCE_TYPE_ALERTMANAGER,
    DATASOURCE_TYPE_LOKI, DATASOURCE_TYPE_PROMETHEUS, GATEWAY_MIN_READY_REPLICAS, GATEWAY_NAME,
    MLA_ADMIN_SETTING_NAME, NOT_READY_REQUEUE_SECS,
};
use crate::context::Context;
use crate::crd::{Cluster, HealthField, HealthStatus, MLAAdminSetting};
use crate::errors::GrafanaError;
use crate::grafana::{Datasource, GrafanaApi};
use crate::reconcilers::cleanup::Cleaner;
use crate::reconcilers::finalizers::{
    ensure_cluster_finalizer, has_finalizer, remove_cluster_finalizer,
};
use crate::reconcilers::gateway::{reconcile_gateway, GatewayResource};
use crate::reconcilers::grafana_org::{find_shared_org_id, shared_org_id};
use crate::reconcilers::status::{deployment_health, patch_cluster_health};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Grafana datasource UID of `kind` for `cluster`.
#[must_use]
pub fn datasource_uid(kind: &str, cluster: &str) -> String {
    format!("{kind}-{cluster}")
}

fn gateway_url(namespace: &str) -> String {
    format!("http://{GATEWAY_NAME}.{namespace}.svc.cluster.local")
}

/// The three datasources of `cluster`, paired with whether each is enabled.
#[must_use]
pub fn desired_datasources(cluster: &Cluster, org_id: i64, namespace: &str) -> Vec<(bool, Datasource)> {
    let name = cluster.name_any();
    let display = cluster.display_name();
    let mla = cluster.mla_settings();
    let alertmanager_uid = datasource_uid(DATASOURCE_TYPE_ALERTMANAGER, &name);

    let datasource = |kind: &str, title: &str, url: String, json_data| Datasource {
        id: 0,
        org_id,
        uid: datasource_uid(kind, &name),
        name: format!("{title} {display} ({name})"),
        kind: kind.to_string(),
        access: DATASOURCE_ACCESS_PROXY.to_string(),
        url,
        is_default: false,
        json_data,
    };

    vec![
        (
            mla.monitoring_enabled || mla.logging_enabled,
            datasource(
                DATASOURCE_TYPE_ALERTMANAGER,
                "Alertmanager",
                format!("{}/api/prom", gateway_url(namespace)),
                json!({
                    "handleGrafanaManagedAlerts": true,
                    "implementation": "cortex",
                }),
            ),
        ),
        (
            mla.logging_enabled,
            datasource(
                DATASOURCE_TYPE_LOKI,
                "Loki",
                gateway_url(namespace),
                json!({ "alertmanagerUid": alertmanager_uid }),
            ),
        ),
        (
            mla.monitoring_enabled,
            datasource(
                DATASOURCE_TYPE_PROMETHEUS,
                "Prometheus",
                format!("{}/api/prom", gateway_url(namespace)),
                json!({
                    "alertmanagerUid": alertmanager_uid,
                    "httpMethod": "POST",
                }),
            ),
        ),
    ]
}

/// Bring one datasource to its desired state.
///
/// # Errors
///
/// Returns an error if Grafana fails.
pub async fn reconcile_datasource(
    grafana: &dyn GrafanaApi,
    org_id: i64,
    enabled: bool,
    desired: &Datasource,
) -> Result<()> {
    let uid = desired.uid.as_str();
    if !enabled {
        match grafana.get_datasource_by_uid(org_id, uid).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("failed to get datasource {uid}")),
        }
        return match grafana.delete_datasource_by_uid(org_id, uid).await {
            Ok(()) => {
                info!("Deleted Grafana datasource {}", uid);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete datasource {uid}")),
        };
    }

    let current = match grafana.get_datasource_by_uid(org_id, uid).await {
        Ok(current) => current,
        Err(e) if e.is_not_found() => match grafana.create_datasource(org_id, desired).await {
            Ok(_) => {
                info!("Created Grafana datasource {}", uid);
                return Ok(());
            }
            Err(GrafanaError::Conflict { .. }) => grafana
                .get_datasource_by_name(org_id, &desired.name)
                .await
                .with_context(|| format!("failed to get datasource by name {}", desired.name))?,
            Err(e) => {
                return Err(e).with_context(|| format!("failed to create datasource {uid}"))
            }
        },
        Err(e) => return Err(e).with_context(|| format!("failed to get datasource {uid}")),
    };

    if current.same_settings(desired) {
        return Ok(());
    }
    info!("Updating Grafana datasource {}", uid);
    let update = Datasource {
        id: current.id,
        ..desired.clone()
    };
    grafana
        .update_datasource(org_id, &update)
        .await
        .with_context(|| format!("failed to update datasource {uid}"))
}

pub struct GrafanaDatasourceReconciler {
    ctx: Arc<Context>,
}

impl GrafanaDatasourceReconciler {
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
    /// Returns an error if Grafana, the gateway or the Kubernetes API fails.
    pub async fn reconcile(&self, cluster: &Cluster) -> Result<Action> {
        if cluster.spec.pause {
            debug!(cluster = %cluster.name_any(), "Cluster is paused");
            return Ok(Action::await_change());
        }
        if cluster.is_deleting() {
            self.teardown_if_owned(cluster).await?;
            return Ok(Action::await_change());
        }
        let (Some(namespace), Some(_)) = (cluster.namespace_name(), cluster.external_name())
        else {
            debug!(cluster = %cluster.name_any(), "Cluster has no namespace or address yet");
            return Ok(Action::requeue(Duration::from_secs(NOT_READY_REQUEUE_SECS)));
        };
        if !cluster.mla_enabled() {
            self.teardown_if_owned(cluster).await?;
            return Ok(Action::await_change());
        }

        let client = &self.ctx.client;
        ensure_cluster_finalizer(client, cluster, DATASOURCE_CLEANUP_FINALIZER).await?;

        // Health reflects the running Deployment, even when this pass fails to update it.
        let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
        let deployment = deployments
            .get_opt(GATEWAY_NAME)
            .await
            .context("failed to get gateway Deployment")?;
        let health = deployment_health(deployment.as_ref(), GATEWAY_MIN_READY_REPLICAS);
        patch_cluster_health(client, cluster, HealthField::MlaGateway, Some(health)).await?;

        let settings: Api<MLAAdminSetting> = Api::namespaced(client.clone(), namespace);
        let settings = settings
            .get_opt(MLA_ADMIN_SETTING_NAME)
            .await
            .context("failed to get MLAAdminSetting")?;
        reconcile_gateway(
            client,
            cluster,
            &self.ctx.mla_namespace,
            self.ctx.registry(),
            settings.as_ref(),
        )
        .await?;

        let grafana = self.ctx.grafana.as_ref();
        let org_id = shared_org_id(grafana).await?;
        for (enabled, desired) in desired_datasources(cluster, org_id, namespace) {
            reconcile_datasource(grafana, org_id, enabled, &desired).await?;
        }
        Ok(Action::await_change())
    }

    /// Without the finalizer nothing of ours is left to remove.
    async fn teardown_if_owned(&self, cluster: &Cluster) -> Result<()> {
        if has_finalizer(cluster, DATASOURCE_CLEANUP_FINALIZER) {
            self.teardown(cluster).await?;
        }
        Ok(())
    }

    /// Remove the datasources and, for a live cluster, the gateway.
    async fn teardown(&self, cluster: &Cluster) -> Result<()> {
        let name = cluster.name_any();
        let grafana = self.ctx.grafana.as_ref();
        if let Some(org_id) = find_shared_org_id(grafana).await? {
            for kind in [
                DATASOURCE_TYPE_ALERTMANAGER,
                DATASOURCE_TYPE_LOKI,
                DATASOURCE_TYPE_PROMETHEUS,
            ] {
                let uid = datasource_uid(kind, &name);
                match grafana.delete_datasource_by_uid(org_id, &uid).await {
                    Ok(()) => info!("Deleted Grafana datasource {}", uid),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        return Err(e).with_context(|| format!("failed to delete datasource {uid}"))
                    }
                }
            }
        }

        if let (false, Some(namespace)) = (cluster.is_deleting(), cluster.namespace_name()) {
            let client = &self.ctx.client;
            for resource in GatewayResource::ALL {
                let result = resource.delete(client, namespace).await;
                let health = result.as_ref().err().map(|_| HealthStatus::Down);
                patch_cluster_health(client, cluster, HealthField::MlaGateway, health)
                    .await
                    .context("failed to update mlaGateway health")?;
                result.with_context(|| {
                    format!("failed to delete gateway {:?} {}", resource, resource.name())
                })?;
            }
        }

        remove_cluster_finalizer(&self.ctx.client, cluster, DATASOURCE_CLEANUP_FINALIZER).await
    }
}

#[async_trait]
impl Cleaner for GrafanaDatasourceReconciler {
    fn name(&self) -> &'static str {
        "grafana-datasource"
    }

    async fn cleanup(&self) -> Result<()> {
        let clusters: Api<Cluster> = Api::all(self.ctx.client.clone());
        let list = clusters
            .list(&ListParams::default())
            .await
            .context("failed to list clusters")?;
        for cluster in &list.items {
            self.teardown(cluster).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "grafana_datasource_tests.rs"]
mod grafana_datasource_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Pushes each cluster's alertmanager configuration to Cortex.
//!
//! The configuration lives in the `Secret` named by the cluster's
//! `Alertmanager` object (`alertmanager` in the cluster namespace). Both are
//! created with a do-nothing default the first time a cluster enables MLA.
//! The outcome of every push is reflected in the `Alertmanager` status and in
//! `status.extendedHealth.alertmanagerConfig` of the cluster.

use crate::constants::{
    ALERTMANAGER_CONFIG_SECRET_KEY, ALERTMANAGER_FINALIZER, ALERTMANAGER_NAME,
    DEFAULT_ALERTMANAGER_CONFIG, DEFAULT_ALERTMANAGER_CONFIG_SECRET_NAME, NOT_READY_REQUEUE_SECS,
};
use crate::context::Context;
use crate::crd::{
    Alertmanager, AlertmanagerConfigurationStatus, AlertmanagerSpec, Cluster, HealthField,
    HealthStatus, LocalSecretReference,
};
use crate::reconcilers::cleanup::Cleaner;
use crate::reconcilers::finalizers::{
    ensure_cluster_finalizer, has_finalizer, remove_cluster_finalizer,
};
use crate::reconcilers::resources::{delete_ignoring_not_found, yaml_equal};
use crate::reconcilers::status::patch_cluster_health;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Condition value of a configuration that reached Cortex.
const CONFIG_STATUS_TRUE: &str = "True";
const CONFIG_STATUS_FALSE: &str = "False";

/// Configuration status after a push attempt.
///
/// `lastUpdated` only moves when a push happened or the previous attempt
/// failed; a failure keeps the time of the last success.
#[must_use]
pub fn next_config_status(
    previous: &AlertmanagerConfigurationStatus,
    outcome: Result<bool, &anyhow::Error>,
    now: &str,
) -> AlertmanagerConfigurationStatus {
    match outcome {
        Ok(pushed) => AlertmanagerConfigurationStatus {
            last_updated: if pushed || previous.status != CONFIG_STATUS_TRUE {
                Some(now.to_string())
            } else {
                previous.last_updated.clone()
            },
            status: CONFIG_STATUS_TRUE.to_string(),
            error_message: None,
        },
        Err(e) => AlertmanagerConfigurationStatus {
            last_updated: previous.last_updated.clone(),
            status: CONFIG_STATUS_FALSE.to_string(),
            error_message: Some(format!("{e:#}")),
        },
    }
}

pub struct AlertmanagerReconciler {
    ctx: Arc<Context>,
}

impl AlertmanagerReconciler {
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
    /// Returns an error if Cortex or the Kubernetes API fails. Push failures
    /// are reported after the statuses have been updated.
    pub async fn reconcile(&self, cluster: &Cluster) -> Result<Action> {
        if cluster.spec.pause {
            debug!(cluster = %cluster.name_any(), "Cluster is paused");
            return Ok(Action::await_change());
        }
        if cluster.is_deleting() {
            self.handle_deletion_if_owned(cluster).await?;
            return Ok(Action::await_change());
        }
        let Some(namespace) = cluster.namespace_name() else {
            debug!(cluster = %cluster.name_any(), "Cluster has no namespace yet");
            return Ok(Action::requeue(Duration::from_secs(NOT_READY_REQUEUE_SECS)));
        };
        if !cluster.mla_enabled() {
            self.handle_deletion_if_owned(cluster).await?;
            return Ok(Action::await_change());
        }

        ensure_cluster_finalizer(&self.ctx.client, cluster, ALERTMANAGER_FINALIZER).await?;

        let outcome = self.ensure_configuration(cluster, namespace).await;
        self.update_config_status(cluster, namespace, outcome.as_ref().map(|pushed| *pushed))
            .await
            .context("failed to update alertmanager configuration status")?;
        outcome.context("failed to create alertmanager configuration")?;
        Ok(Action::await_change())
    }

    /// Push the configuration if Cortex differs. Returns whether it pushed.
    async fn ensure_configuration(&self, cluster: &Cluster, namespace: &str) -> Result<bool> {
        let tenant = cluster.name_any();
        let config = self.desired_config(namespace).await?;
        let current = self
            .ctx
            .cortex
            .get_alertmanager_config(&tenant)
            .await
            .context("failed to get Cortex alertmanager configuration")?;
        if yaml_equal(&config, current.as_deref())
            .context("failed to compare alertmanager configurations")?
        {
            return Ok(false);
        }

        info!("Pushing alertmanager configuration of cluster {}", tenant);
        self.ctx
            .cortex
            .set_alertmanager_config(&tenant, &config)
            .await
            .context("failed to update Cortex alertmanager configuration")?;
        Ok(true)
    }

    /// Configuration from the referenced `Secret`, creating the
    /// `Alertmanager` object and the `Secret` with defaults when missing.
    async fn desired_config(&self, namespace: &str) -> Result<Vec<u8>> {
        let client = &self.ctx.client;
        let alertmanagers: Api<Alertmanager> = Api::namespaced(client.clone(), namespace);
        let secret_name = match alertmanagers
            .get_opt(ALERTMANAGER_NAME)
            .await
            .context("failed to get alertmanager")?
        {
            None => {
                info!("Creating Alertmanager {}/{}", namespace, ALERTMANAGER_NAME);
                let mut alertmanager = Alertmanager::new(
                    ALERTMANAGER_NAME,
                    AlertmanagerSpec {
                        config_secret: LocalSecretReference {
                            name: DEFAULT_ALERTMANAGER_CONFIG_SECRET_NAME.to_string(),
                        },
                    },
                );
                alertmanager.metadata.namespace = Some(namespace.to_string());
                alertmanagers
                    .create(&PostParams::default(), &alertmanager)
                    .await
                    .context("failed to create alertmanager object")?;
                DEFAULT_ALERTMANAGER_CONFIG_SECRET_NAME.to_string()
            }
            Some(existing) if existing.spec.config_secret.name.is_empty() => {
                let patch = json!({
                    "spec": {"configSecret": {"name": DEFAULT_ALERTMANAGER_CONFIG_SECRET_NAME}}
                });
                alertmanagers
                    .patch(ALERTMANAGER_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .context("failed to update alertmanager object")?;
                DEFAULT_ALERTMANAGER_CONFIG_SECRET_NAME.to_string()
            }
            Some(existing) => existing.spec.config_secret.name,
        };

        let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
        let secret = secrets
            .get_opt(&secret_name)
            .await
            .context("failed to get alertmanager config secret")?;
        let stored = secret
            .as_ref()
            .and_then(|s| s.data.as_ref())
            .and_then(|data| data.get(ALERTMANAGER_CONFIG_SECRET_KEY))
            .map(|value| value.0.clone())
            .filter(|value| !value.is_empty());
        if let Some(config) = stored {
            return Ok(config);
        }

        let default = DEFAULT_ALERTMANAGER_CONFIG.as_bytes().to_vec();
        if secret.is_some() {
            let patch = json!({
                "data": {ALERTMANAGER_CONFIG_SECRET_KEY: ByteString(default.clone())}
            });
            secrets
                .patch(&secret_name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .context("failed to update alertmanager config secret")?;
        } else {
            info!("Creating default alertmanager config Secret {}/{}", namespace, secret_name);
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(secret_name.clone()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                data: Some(BTreeMap::from([(
                    ALERTMANAGER_CONFIG_SECRET_KEY.to_string(),
                    ByteString(default.clone()),
                )])),
                ..Default::default()
            };
            secrets
                .create(&PostParams::default(), &secret)
                .await
                .context("failed to create alertmanager config secret")?;
        }
        Ok(default)
    }

    /// Record `outcome` on the `Alertmanager` object and the cluster.
    async fn update_config_status(
        &self,
        cluster: &Cluster,
        namespace: &str,
        outcome: Result<bool, &anyhow::Error>,
    ) -> Result<()> {
        let health = if outcome.is_ok() {
            HealthStatus::Up
        } else {
            HealthStatus::Down
        };

        let alertmanagers: Api<Alertmanager> =
            Api::namespaced(self.ctx.client.clone(), namespace);
        if let Some(alertmanager) = alertmanagers
            .get_opt(ALERTMANAGER_NAME)
            .await
            .context("failed to get alertmanager")?
        {
            let previous = alertmanager
                .status
                .map(|s| s.config_status)
                .unwrap_or_default();
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            let next = next_config_status(&previous, outcome, &now);
            if next != previous {
                let patch = json!({
                    "status": {
                        "configStatus": {
                            "status": next.status,
                            "errorMessage": next.error_message,
                            "lastUpdated": next.last_updated,
                        }
                    }
                });
                alertmanagers
                    .patch_status(ALERTMANAGER_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .context("failed to patch alertmanager config status")?;
            }
        }

        patch_cluster_health(
            &self.ctx.client,
            cluster,
            HealthField::AlertmanagerConfig,
            Some(health),
        )
        .await
    }

    async fn handle_deletion_if_owned(&self, cluster: &Cluster) -> Result<()> {
        if has_finalizer(cluster, ALERTMANAGER_FINALIZER) {
            self.handle_deletion(cluster).await?;
        }
        Ok(())
    }

    /// Remove the Cortex configuration and, for a live cluster, the local
    /// objects. The finalizer goes last.
    async fn handle_deletion(&self, cluster: &Cluster) -> Result<()> {
        if let Some(namespace) = cluster.namespace_name() {
            let tenant = cluster.name_any();
            let deleted = match self.ctx.cortex.delete_alertmanager_config(&tenant).await {
                Ok(()) => {
                    info!("Deleted alertmanager configuration of cluster {}", tenant);
                    Ok(())
                }
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(anyhow::Error::new(e)
                    .context("failed to delete alertmanager configuration")),
            };
            if let Err(e) = &deleted {
                self.update_config_status(cluster, namespace, Err(e))
                    .await
                    .context("failed to update alertmanager configuration status")?;
            }
            deleted?;

            if !cluster.is_deleting() {
                let removed = self.delete_objects(namespace).await;
                let health = removed.as_ref().err().map(|_| HealthStatus::Down);
                patch_cluster_health(
                    &self.ctx.client,
                    cluster,
                    HealthField::AlertmanagerConfig,
                    health,
                )
                .await
                .context("failed to update alertmanagerConfig health")?;
                removed.context("failed to remove alertmanager objects")?;
            }
        }
        remove_cluster_finalizer(&self.ctx.client, cluster, ALERTMANAGER_FINALIZER).await
    }

    async fn delete_objects(&self, namespace: &str) -> Result<()> {
        let client = &self.ctx.client;
        let alertmanagers: Api<Alertmanager> = Api::namespaced(client.clone(), namespace);
        let Some(alertmanager) = alertmanagers.get_opt(ALERTMANAGER_NAME).await? else {
            return Ok(());
        };
        let secret_name = &alertmanager.spec.config_secret.name;
        if !secret_name.is_empty() {
            let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
            delete_ignoring_not_found(&secrets, secret_name).await?;
        }
        delete_ignoring_not_found(&alertmanagers, ALERTMANAGER_NAME).await?;
        Ok(())
    }
}

#[async_trait]
impl Cleaner for AlertmanagerReconciler {
    fn name(&self) -> &'static str {
        "alertmanager"
    }

    async fn cleanup(&self) -> Result<()> {
        let clusters: Api<Cluster> = Api::all(self.ctx.client.clone());
        let list = clusters
            .list(&ListParams::default())
            .await
            .context("failed to list clusters")?;
        for cluster in &list.items {
            self.handle_deletion(cluster).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "alertmanager_tests.rs"]
mod alertmanager_tests;

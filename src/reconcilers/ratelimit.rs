// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-tenant Cortex limits from `MLAAdminSetting`s.
//!
//! Cortex reads tenant overrides from a runtime configuration document kept
//! in the `cortex-runtime-config` `ConfigMap` of the MLA namespace. Every
//! cluster with an `MLAAdminSetting` owns one entry of `overrides`, keyed by
//! the cluster name. All settings share the document, so the controller runs
//! with a single worker.

use crate::constants::{
    RATELIMIT_CORTEX_FINALIZER, RUNTIME_CONFIG_CONFIGMAP_NAME, RUNTIME_CONFIG_KEY,
};
use crate::context::Context;
use crate::crd::{MLAAdminSetting, MonitoringRateLimitSettings};
use crate::reconcilers::cleanup::Cleaner;
use crate::reconcilers::finalizers::{ensure_finalizer, remove_finalizer};
use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{ListParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cortex limits of one tenant. Unset limits fall back to Cortex defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Overrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_rate: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_burst_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_series_per_metric: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_series_per_query: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_samples_per_query: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_series_per_user: Option<i64>,
}

impl Overrides {
    /// Overrides for the non-zero limits of `limits`.
    #[must_use]
    pub fn from_limits(limits: &MonitoringRateLimitSettings) -> Self {
        let set = |v: i64| (v != 0).then_some(v);
        Self {
            ingestion_rate: set(limits.ingestion_rate),
            ingestion_burst_size: set(limits.ingestion_burst_size),
            max_series_per_metric: set(limits.max_series_per_metric),
            max_series_per_query: set(limits.max_series_per_query),
            max_samples_per_query: set(limits.max_samples_per_query),
            max_series_per_user: set(limits.max_series_total),
        }
    }
}

/// The Cortex runtime configuration document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub overrides: BTreeMap<String, Overrides>,
}

impl RuntimeConfig {
    /// # Errors
    ///
    /// Returns an error on malformed YAML or unknown fields.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).context("failed to decode Cortex runtime config")
    }

    /// # Errors
    ///
    /// Returns an error if the document cannot be encoded.
    pub fn render(&self) -> Result<String> {
        serde_yaml::to_string(self).context("failed to encode Cortex runtime config")
    }
}

pub struct RatelimitReconciler {
    ctx: Arc<Context>,
}

impl RatelimitReconciler {
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
    /// Returns an error if the runtime config is missing or malformed, or if
    /// the Kubernetes API fails.
    pub async fn reconcile(&self, setting: &MLAAdminSetting) -> Result<Action> {
        if setting.is_deleting() {
            self.handle_deletion(setting).await?;
            return Ok(Action::await_change());
        }

        ensure_finalizer(&self.ctx.client, setting, RATELIMIT_CORTEX_FINALIZER).await?;
        let tenant = setting.spec.cluster_name.clone();
        let overrides = Overrides::from_limits(
            &setting
                .spec
                .monitoring_rate_limits
                .clone()
                .unwrap_or_default(),
        );
        self.update_runtime_config(|config| {
            config.overrides.insert(tenant.clone(), overrides.clone());
        })
        .await?;
        Ok(Action::await_change())
    }

    /// Drop the tenant's entry, then release the setting even if that failed.
    async fn handle_deletion(&self, setting: &MLAAdminSetting) -> Result<()> {
        let tenant = setting.spec.cluster_name.clone();
        let result = self
            .update_runtime_config(|config| {
                config.overrides.remove(&tenant);
            })
            .await;
        if let Err(e) = &result {
            warn!(
                setting = %setting.name_any(),
                "Failed to remove Cortex overrides of {}: {:#}", tenant, e
            );
        }
        remove_finalizer(&self.ctx.client, setting, RATELIMIT_CORTEX_FINALIZER).await?;
        result
    }

    /// Read-modify-write the runtime config, writing only on change.
    async fn update_runtime_config<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut RuntimeConfig),
    {
        let config_maps: Api<ConfigMap> =
            Api::namespaced(self.ctx.client.clone(), &self.ctx.mla_namespace);
        let mut cm = config_maps
            .get_opt(RUNTIME_CONFIG_CONFIGMAP_NAME)
            .await
            .context("failed to get Cortex runtime config")?
            .ok_or_else(|| {
                anyhow!(
                    "ConfigMap {}/{} does not exist",
                    self.ctx.mla_namespace,
                    RUNTIME_CONFIG_CONFIGMAP_NAME
                )
            })?;

        let raw = cm
            .data
            .as_ref()
            .and_then(|data| data.get(RUNTIME_CONFIG_KEY))
            .cloned()
            .unwrap_or_default();
        let current = RuntimeConfig::parse(&raw)?;
        let mut desired = current.clone();
        mutate(&mut desired);
        if desired == current {
            debug!("Cortex runtime config up to date");
            return Ok(());
        }

        info!("Updating Cortex runtime config");
        cm.data
            .get_or_insert_with(BTreeMap::new)
            .insert(RUNTIME_CONFIG_KEY.to_string(), desired.render()?);
        config_maps
            .replace(RUNTIME_CONFIG_CONFIGMAP_NAME, &PostParams::default(), &cm)
            .await
            .context("failed to update Cortex runtime config")?;
        Ok(())
    }
}

#[async_trait]
impl Cleaner for RatelimitReconciler {
    fn name(&self) -> &'static str {
        "ratelimit"
    }

    async fn cleanup(&self) -> Result<()> {
        let settings: Api<MLAAdminSetting> = Api::all(self.ctx.client.clone());
        let list = settings
            .list(&ListParams::default())
            .await
            .context("failed to list MLAAdminSettings")?;
        for setting in &list.items {
            self.handle_deletion(setting).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod ratelimit_tests;

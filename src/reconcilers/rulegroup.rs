// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Pushes per-cluster `RuleGroup`s to the Cortex or Loki ruler.
//!
//! A `RuleGroup` in a cluster namespace is owned by the cluster it references
//! and pushed under that cluster's tenant. `RuleGroup`s in the MLA namespace
//! are templates handled by [`crate::reconcilers::rulegroup_sync`] and never
//! pushed themselves.

use crate::constants::RULE_GROUP_FINALIZER;
use crate::context::Context;
use crate::crd::{Cluster, RuleGroup};
use crate::reconcilers::cleanup::Cleaner;
use crate::reconcilers::finalizers::{ensure_finalizer, remove_finalizer};
use crate::reconcilers::resources::{delete_ignoring_not_found, yaml_equal};
use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether `rule_group` is pushed by this reconciler rather than fanned out.
#[must_use]
pub fn is_cluster_rule_group(rule_group: &RuleGroup, mla_namespace: &str) -> bool {
    rule_group.namespace().as_deref() != Some(mla_namespace) && rule_group.cluster_name().is_some()
}

pub struct RuleGroupReconciler {
    ctx: Arc<Context>,
}

impl RuleGroupReconciler {
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
    /// Returns an error for an unknown rule group type, malformed YAML or a
    /// failing ruler or Kubernetes API.
    pub async fn reconcile(&self, rule_group: &RuleGroup) -> Result<Action> {
        if !is_cluster_rule_group(rule_group, &self.ctx.mla_namespace) {
            return Ok(Action::await_change());
        }
        if rule_group.is_deleting() {
            self.handle_deletion(rule_group).await?;
            return Ok(Action::await_change());
        }

        let namespace = rule_group.namespace().unwrap_or_default();
        let name = rule_group.name_any();
        let cluster_name = rule_group.cluster_name().unwrap_or_default();
        let clusters: Api<Cluster> = Api::all(self.ctx.client.clone());
        let cluster = clusters
            .get_opt(cluster_name)
            .await
            .with_context(|| format!("failed to get Cluster {cluster_name}"))?;
        if !cluster.is_some_and(|c| !c.is_deleting() && c.mla_enabled()) {
            // The deletion reconcile that follows cleans up the ruler.
            info!(
                "Deleting RuleGroup {}/{} of inactive cluster {}",
                namespace, name, cluster_name
            );
            let rule_groups: Api<RuleGroup> = Api::namespaced(self.ctx.client.clone(), &namespace);
            delete_ignoring_not_found(&rule_groups, &name).await?;
            return Ok(Action::await_change());
        }

        ensure_finalizer(&self.ctx.client, rule_group, RULE_GROUP_FINALIZER).await?;

        let kind = rule_group.rule_group_type()?;
        let desired = &rule_group.spec.data.0;
        let current = self
            .ctx
            .cortex
            .get_rule_group(cluster_name, kind, &name)
            .await
            .with_context(|| format!("failed to get {kind} rule group {name}"))?;
        if yaml_equal(desired, current.as_deref())
            .with_context(|| format!("failed to compare rule group {namespace}/{name}"))?
        {
            debug!(rule_group = %name, tenant = %cluster_name, "Rule group up to date");
            return Ok(Action::await_change());
        }

        info!("Pushing {} rule group {} for cluster {}", kind, name, cluster_name);
        self.ctx
            .cortex
            .set_rule_group(cluster_name, kind, desired)
            .await
            .with_context(|| format!("failed to set {kind} rule group {name}"))?;
        Ok(Action::await_change())
    }

    /// Remove the group from the ruler, then release the object.
    async fn handle_deletion(&self, rule_group: &RuleGroup) -> Result<()> {
        let name = rule_group.name_any();
        let tenant = rule_group
            .cluster_name()
            .ok_or_else(|| anyhow!("RuleGroup {name} has no cluster"))?;
        match rule_group.rule_group_type() {
            Ok(kind) => match self.ctx.cortex.delete_rule_group(tenant, kind, &name).await {
                Ok(()) => info!("Deleted {} rule group {} of cluster {}", kind, name, tenant),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to delete {kind} rule group {name}"))
                }
            },
            Err(e) => warn!(rule_group = %name, "{e}, nothing to delete"),
        }
        remove_finalizer(&self.ctx.client, rule_group, RULE_GROUP_FINALIZER).await
    }
}

#[async_trait]
impl Cleaner for RuleGroupReconciler {
    fn name(&self) -> &'static str {
        "rule-group"
    }

    async fn cleanup(&self) -> Result<()> {
        let rule_groups: Api<RuleGroup> = Api::all(self.ctx.client.clone());
        let list = rule_groups
            .list(&ListParams::default())
            .await
            .context("failed to list rule groups")?;
        for rule_group in list
            .items
            .iter()
            .filter(|rg| is_cluster_rule_group(rg, &self.ctx.mla_namespace))
        {
            self.handle_deletion(rule_group).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "rulegroup_tests.rs"]
mod rulegroup_tests;

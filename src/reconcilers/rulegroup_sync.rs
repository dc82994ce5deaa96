// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Fans template `RuleGroup`s out into every MLA enabled cluster.
//!
//! A `RuleGroup` in the MLA namespace is a template. For each cluster that
//! accepts rule groups a copy with the same name, type and data is kept in the
//! cluster namespace, pointing at the cluster. The copies are then pushed by
//! [`crate::reconcilers::rulegroup`].

use crate::constants::{API_GROUP_VERSION, KIND_CLUSTER, RULE_GROUP_SYNC_FINALIZER};
use crate::context::Context;
use crate::crd::{Cluster, RuleGroup, RuleGroupSpec};
use crate::reconcilers::cleanup::Cleaner;
use crate::reconcilers::finalizers::{ensure_finalizer, remove_finalizer};
use crate::reconcilers::resources::{delete_ignoring_not_found, reconcile_object};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use std::sync::Arc;
use tracing::info;

/// Copy of `template` for `cluster`, living in `namespace`.
#[must_use]
pub fn build_rule_group_copy(template: &RuleGroup, cluster: &Cluster, namespace: &str) -> RuleGroup {
    let mut copy = RuleGroup::new(
        &template.name_any(),
        RuleGroupSpec {
            rule_group_type: template.spec.rule_group_type.clone(),
            cluster: ObjectReference {
                api_version: Some(API_GROUP_VERSION.to_string()),
                kind: Some(KIND_CLUSTER.to_string()),
                name: Some(cluster.name_any()),
                uid: cluster.metadata.uid.clone(),
                ..Default::default()
            },
            data: template.spec.data.clone(),
        },
    );
    copy.metadata.namespace = Some(namespace.to_string());
    copy
}

pub struct RuleGroupSyncReconciler {
    ctx: Arc<Context>,
}

impl RuleGroupSyncReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Clusters that should receive copies of templates.
    async fn eligible_clusters(&self) -> Result<Vec<Cluster>> {
        let clusters: Api<Cluster> = Api::all(self.ctx.client.clone());
        let list = clusters
            .list(&ListParams::default())
            .await
            .context("failed to list clusters")?;
        Ok(list
            .items
            .into_iter()
            .filter(Cluster::accepts_rule_groups)
            .collect())
    }

    /// # Errors
    ///
    /// Returns an error if the Kubernetes API fails.
    pub async fn reconcile(&self, template: &RuleGroup) -> Result<Action> {
        if template.namespace().as_deref() != Some(self.ctx.mla_namespace.as_str()) {
            return Ok(Action::await_change());
        }
        if template.is_deleting() {
            self.handle_deletion(template).await?;
            return Ok(Action::await_change());
        }

        ensure_finalizer(&self.ctx.client, template, RULE_GROUP_SYNC_FINALIZER).await?;
        for cluster in self.eligible_clusters().await? {
            let Some(namespace) = cluster.namespace_name() else {
                continue;
            };
            let copy = build_rule_group_copy(template, &cluster, namespace);
            if reconcile_object(&self.ctx.client, namespace, &copy)
                .await
                .with_context(|| {
                    format!("failed to sync RuleGroup {} into {namespace}", template.name_any())
                })?
            {
                info!(
                    "Synced RuleGroup {} into cluster {}",
                    template.name_any(),
                    cluster.name_any()
                );
            }
        }
        Ok(Action::await_change())
    }

    /// Delete the copies of `template`, then release it.
    async fn handle_deletion(&self, template: &RuleGroup) -> Result<()> {
        let name = template.name_any();
        for cluster in self.eligible_clusters().await? {
            let Some(namespace) = cluster.namespace_name() else {
                continue;
            };
            let rule_groups: Api<RuleGroup> = Api::namespaced(self.ctx.client.clone(), namespace);
            delete_ignoring_not_found(&rule_groups, &name).await?;
        }
        remove_finalizer(&self.ctx.client, template, RULE_GROUP_SYNC_FINALIZER).await
    }
}

#[async_trait]
impl Cleaner for RuleGroupSyncReconciler {
    fn name(&self) -> &'static str {
        "rule-group-sync"
    }

    async fn cleanup(&self) -> Result<()> {
        let templates: Api<RuleGroup> =
            Api::namespaced(self.ctx.client.clone(), &self.ctx.mla_namespace);
        let list = templates
            .list(&ListParams::default())
            .await
            .context("failed to list template rule groups")?;
        for template in &list.items {
            self.handle_deletion(template).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "rulegroup_sync_tests.rs"]
mod rulegroup_sync_tests;

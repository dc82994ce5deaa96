// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Mirrors platform `User`s into Grafana.
//!
//! Each user gets a Grafana account keyed by email and a membership in the
//! shared organization. Platform admins become Grafana server admins and
//! organization `Admin`s, everyone else is an `Editor`.

use crate::constants::{GRAFANA_DEFAULT_ORG_ID, GRAFANA_USER_FINALIZER};
use crate::context::Context;
use crate::crd::User;
use crate::grafana::{GrafanaApi, OrgRole};
use crate::reconcilers::cleanup::Cleaner;
use crate::reconcilers::finalizers::{ensure_cluster_finalizer, remove_cluster_finalizer};
use crate::reconcilers::grafana_org::shared_org_id;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use std::sync::Arc;
use tracing::{debug, info};

pub struct GrafanaUserReconciler {
    ctx: Arc<Context>,
}

impl GrafanaUserReconciler {
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
    /// Returns an error if Grafana or the Kubernetes API fails.
    pub async fn reconcile(&self, user: &User) -> Result<Action> {
        if user.metadata.deletion_timestamp.is_some() {
            self.handle_deletion(user).await?;
            return Ok(Action::await_change());
        }

        ensure_cluster_finalizer(&self.ctx.client, user, GRAFANA_USER_FINALIZER).await?;
        let grafana = self.ctx.grafana.as_ref();
        let org_id = shared_org_id(grafana).await?;
        let email = user.spec.email.as_str();

        let grafana_user = match grafana.lookup_user(email).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => bootstrap(grafana, email).await?,
            Err(e) => {
                return Err(e).with_context(|| format!("failed to look up Grafana user {email}"))
            }
        };

        if grafana_user.is_grafana_admin != user.spec.is_admin {
            info!(
                "Setting Grafana server admin of {} to {}",
                email, user.spec.is_admin
            );
            grafana
                .update_user_permissions(grafana_user.id, user.spec.is_admin)
                .await
                .with_context(|| format!("failed to update permissions of Grafana user {email}"))?;
        }

        let role = OrgRole::for_admin(user.spec.is_admin);
        let members = grafana
            .get_org_users(org_id)
            .await
            .context("failed to list members of the Grafana organization")?;
        match members.iter().find(|m| m.user_id == grafana_user.id) {
            None => {
                info!("Adding {} to the Grafana organization as {}", email, role);
                grafana
                    .add_org_user(org_id, email, role)
                    .await
                    .with_context(|| format!("failed to add {email} to the Grafana organization"))?;
            }
            Some(member) if member.role != role => {
                info!(
                    "Changing Grafana organization role of {} from {} to {}",
                    email, member.role, role
                );
                grafana
                    .update_org_user(org_id, grafana_user.id, role)
                    .await
                    .with_context(|| format!("failed to update organization role of {email}"))?;
            }
            Some(_) => debug!(user = %user.name_any(), "Grafana membership up to date"),
        }

        Ok(Action::await_change())
    }

    async fn handle_deletion(&self, user: &User) -> Result<()> {
        let email = user.spec.email.as_str();
        match self.ctx.grafana.lookup_user(email).await {
            Ok(found) => match self.ctx.grafana.delete_user(found.id).await {
                Ok(()) => info!("Deleted Grafana user {}", email),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to delete Grafana user {email}"))
                }
            },
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to look up Grafana user {email}"))
            }
        }
        remove_cluster_finalizer(&self.ctx.client, user, GRAFANA_USER_FINALIZER).await
    }
}

/// Create `email` through the auth proxy and drop it from the default org.
async fn bootstrap(grafana: &dyn GrafanaApi, email: &str) -> Result<crate::grafana::User> {
    info!("Creating Grafana user {}", email);
    let created = grafana
        .bootstrap_user(email)
        .await
        .with_context(|| format!("failed to create Grafana user {email}"))?;
    match grafana.delete_org_user(GRAFANA_DEFAULT_ORG_ID, created.id).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => {
            return Err(e).with_context(|| {
                format!("failed to remove {email} from the default Grafana organization")
            })
        }
    }
    Ok(created)
}

#[async_trait]
impl Cleaner for GrafanaUserReconciler {
    fn name(&self) -> &'static str {
        "grafana-user"
    }

    async fn cleanup(&self) -> Result<()> {
        let users: Api<User> = Api::all(self.ctx.client.clone());
        let list = users
            .list(&ListParams::default())
            .await
            .context("failed to list users")?;
        for user in &list.items {
            self.handle_deletion(user).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "grafana_user_tests.rs"]
mod grafana_user_tests;

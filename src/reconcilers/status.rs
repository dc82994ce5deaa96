// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster health helpers.
//!
//! The MLA controllers own two fields of a cluster's status:
//! `status.extendedHealth.alertmanagerConfig` and
//! `status.extendedHealth.mlaGateway`. Both are written with a JSON merge patch
//! against the status subresource, and only when the value actually changes.
//!
//! # Example
//!
//! ```rust,no_run
//! use mla_operator::crd::{Cluster, HealthField, HealthStatus};
//! use mla_operator::reconcilers::status::patch_cluster_health;
//! use kube::Client;
//!
//! # async fn example(client: &Client, cluster: &Cluster) -> anyhow::Result<()> {
//! patch_cluster_health(client, cluster, HealthField::MlaGateway, Some(HealthStatus::Up)).await?;
//! # Ok(())
//! # }
//! ```

use crate::crd::{Cluster, HealthField, HealthStatus};
use anyhow::{Context as _, Result};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::debug;

/// Set one `extendedHealth` field of `cluster`; `None` clears it.
///
/// The current value is read from the API server, not from `cluster`, so
/// several updates within one reconcile compare against what was last
/// written. A cluster that no longer exists is left alone.
///
/// # Errors
///
/// Returns an error if the cluster cannot be read or patched.
pub async fn patch_cluster_health(
    client: &Client,
    cluster: &Cluster,
    field: HealthField,
    value: Option<HealthStatus>,
) -> Result<()> {
    let name = cluster.name_any();
    let api: Api<Cluster> = Api::all(client.clone());
    let Some(current) = api
        .get_opt(&name)
        .await
        .with_context(|| format!("failed to get Cluster {name}"))?
    else {
        debug!(cluster = %name, "Cluster gone, skipping health update");
        return Ok(());
    };

    if field.get(&current.extended_health()) == value {
        return Ok(());
    }

    debug!(
        cluster = %name,
        field = field.json_name(),
        value = value.map_or("<none>", HealthStatus::as_str),
        "Updating cluster health"
    );
    let patch = json!({
        "status": {
            "extendedHealth": {
                field.json_name(): value,
            }
        }
    });
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .with_context(|| format!("failed to update {} health of Cluster {name}", field.json_name()))?;
    Ok(())
}

/// Health of a `Deployment`: up once at least `min_ready` replicas are ready.
#[must_use]
pub fn deployment_health(deployment: Option<&Deployment>, min_ready: i32) -> HealthStatus {
    let ready = deployment
        .and_then(|d| d.status.as_ref())
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    if deployment.is_some() && ready >= min_ready {
        HealthStatus::Up
    } else {
        HealthStatus::Down
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;

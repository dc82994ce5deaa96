// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management for namespaced and cluster-scoped resources.
//!
//! A reconciler-owned finalizer is the only record that remote (Grafana,
//! Cortex) or gateway state exists for an object, so both directions are
//! idempotent and never clobber finalizers owned by other controllers: the
//! list is re-read right before patching and the patch carries the
//! `resourceVersion` it was computed from.
//!
//! # Example
//!
//! ```rust,no_run
//! use mla_operator::reconcilers::finalizers::ensure_cluster_finalizer;
//! use mla_operator::crd::Cluster;
//! use kube::Client;
//!
//! # async fn example(client: Client, cluster: Cluster) -> anyhow::Result<()> {
//! ensure_cluster_finalizer(&client, &cluster, "kubermatic.k8c.io/mla-alertmanager").await?;
//! # Ok(())
//! # }
//! ```

use crate::errors::is_kube_not_found;
use anyhow::{Context as _, Result};
use kube::api::{Patch, PatchParams};
use kube::core::{ClusterResourceScope, NamespaceResourceScope};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use tracing::info;

/// Whether `resource` carries `finalizer`.
#[must_use]
pub fn has_finalizer<T: ResourceExt>(resource: &T, finalizer: &str) -> bool {
    resource.finalizers().iter().any(|f| f == finalizer)
}

#[derive(Clone, Copy)]
enum Change {
    Add,
    Remove,
}

/// Re-read the object and patch its finalizer list.
///
/// Returns without a write when the fresh object is already in the desired
/// state. A vanished object counts as "finalizer removed".
async fn patch_finalizers<T>(api: &Api<T>, name: &str, finalizer: &str, change: Change) -> Result<()>
where
    T: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
{
    let Some(current) = api
        .get_opt(name)
        .await
        .with_context(|| format!("failed to get {} {name}", T::kind(&())))?
    else {
        return match change {
            Change::Remove => Ok(()),
            Change::Add => Err(anyhow::anyhow!(
                "{} {name} disappeared before finalizer {finalizer} could be added",
                T::kind(&())
            )),
        };
    };

    let mut finalizers = current.meta().finalizers.clone().unwrap_or_default();
    let present = finalizers.iter().any(|f| f == finalizer);
    match change {
        Change::Add if present => return Ok(()),
        Change::Remove if !present => return Ok(()),
        Change::Add => finalizers.push(finalizer.to_string()),
        Change::Remove => finalizers.retain(|f| f != finalizer),
    }

    let patch = json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": current.meta().resource_version,
        }
    });
    match api
        .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if matches!(change, Change::Remove) && is_kube_not_found(&e) => Ok(()),
        Err(e) => Err(e).with_context(|| {
            format!(
                "failed to update finalizers of {} {name}",
                T::kind(&())
            )
        }),
    }
}

/// Add a finalizer to a namespaced resource if not already present.
///
/// # Errors
///
/// Returns an error if the object cannot be read or patched.
pub async fn ensure_finalizer<T>(client: &Client, resource: &T, finalizer: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned,
{
    if has_finalizer(resource, finalizer) {
        return Ok(());
    }
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();
    info!(
        "Adding finalizer {} to {}/{} {}",
        finalizer,
        namespace,
        name,
        T::kind(&())
    );

    let api: Api<T> = Api::namespaced(client.clone(), &namespace);
    patch_finalizers(&api, &name, finalizer, Change::Add).await
}

/// Remove a finalizer from a namespaced resource.
///
/// A resource that is already gone is treated as success.
///
/// # Errors
///
/// Returns an error if the object cannot be read or patched.
pub async fn remove_finalizer<T>(client: &Client, resource: &T, finalizer: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned,
{
    if !has_finalizer(resource, finalizer) {
        return Ok(());
    }
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();
    info!(
        "Removing finalizer {} from {}/{} {}",
        finalizer,
        namespace,
        name,
        T::kind(&())
    );

    let api: Api<T> = Api::namespaced(client.clone(), &namespace);
    patch_finalizers(&api, &name, finalizer, Change::Remove).await
}

/// Add a finalizer to a cluster-scoped resource if not already present.
///
/// # Errors
///
/// Returns an error if the object cannot be read or patched.
pub async fn ensure_cluster_finalizer<T>(
    client: &Client,
    resource: &T,
    finalizer: &str,
) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = ClusterResourceScope> + Clone + Debug + DeserializeOwned,
{
    if has_finalizer(resource, finalizer) {
        return Ok(());
    }
    let name = resource.name_any();
    info!(
        "Adding finalizer {} to {} {}",
        finalizer,
        T::kind(&()),
        name
    );

    let api: Api<T> = Api::all(client.clone());
    patch_finalizers(&api, &name, finalizer, Change::Add).await
}

/// Remove a finalizer from a cluster-scoped resource.
///
/// # Errors
///
/// Returns an error if the object cannot be read or patched.
pub async fn remove_cluster_finalizer<T>(
    client: &Client,
    resource: &T,
    finalizer: &str,
) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = ClusterResourceScope> + Clone + Debug + DeserializeOwned,
{
    if !has_finalizer(resource, finalizer) {
        return Ok(());
    }
    let name = resource.name_any();
    info!(
        "Removing finalizer {} from {} {}",
        finalizer,
        T::kind(&()),
        name
    );

    let api: Api<T> = Api::all(client.clone());
    patch_finalizers(&api, &name, finalizer, Change::Remove).await
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;

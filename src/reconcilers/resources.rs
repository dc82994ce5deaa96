// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic create-or-replace and delete helpers for Kubernetes resources.
//!
//! [`reconcile_object`] writes a SHA-256 of the desired object into the
//! [`CONFIG_HASH_ANNOTATION`] annotation. An existing object carrying the same
//! hash is left alone, so a reconcile pass with no change in desired state
//! issues no writes.
//!
//! # Example
//!
//! ```rust,no_run
//! use mla_operator::reconcilers::resources::reconcile_object;
//! use k8s_openapi::api::core::v1::ConfigMap;
//! use kube::Client;
//!
//! # async fn example(client: &Client, cm: ConfigMap) -> anyhow::Result<()> {
//! reconcile_object(client, "cluster-test", &cm).await?;
//! # Ok(())
//! # }
//! ```

use crate::errors::is_kube_not_found;
use crate::labels::CONFIG_HASH_ANNOTATION;
use anyhow::{Context as _, Result};
use kube::api::{DeleteParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use tracing::{debug, info};

/// Hex SHA-256 of the JSON form of `resource`.
///
/// # Errors
///
/// Returns an error if the resource cannot be serialized.
pub fn object_hash<T: Serialize>(resource: &T) -> Result<String> {
    let bytes = serde_json::to_vec(resource).context("failed to serialize object for hashing")?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Create `desired`, or replace the existing object when its content changed.
///
/// Server-assigned fields the API refuses to change on replace (the
/// `resourceVersion` and a `Service`'s cluster IPs) are carried over from the
/// existing object.
///
/// Returns `true` when a write was issued.
///
/// # Errors
///
/// Returns an error if the resource has no name or an API call fails.
pub async fn reconcile_object<T>(client: &Client, namespace: &str, desired: &T) -> Result<bool>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned,
{
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or_else(|| anyhow::anyhow!("Resource must have a name"))?;
    let kind = T::kind(&());
    let hash = object_hash(desired)?;

    let mut object = desired.clone();
    object
        .annotations_mut()
        .insert(CONFIG_HASH_ANNOTATION.to_string(), hash.clone());

    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let existing = api
        .get_opt(&name)
        .await
        .with_context(|| format!("failed to get {kind} {namespace}/{name}"))?;

    let Some(existing) = existing else {
        info!("Creating {} {}/{}", kind, namespace, name);
        api.create(&PostParams::default(), &object)
            .await
            .with_context(|| format!("failed to create {kind} {namespace}/{name}"))?;
        return Ok(true);
    };

    if existing.annotations().get(CONFIG_HASH_ANNOTATION) == Some(&hash) {
        debug!(
            namespace = %namespace,
            name = %name,
            kind = %kind,
            "Resource is up to date"
        );
        return Ok(false);
    }

    let object = carry_over_server_fields(&object, &existing)?;
    info!("Replacing {} {}/{}", kind, namespace, name);
    api.replace(&name, &PostParams::default(), &object)
        .await
        .with_context(|| format!("failed to replace {kind} {namespace}/{name}"))?;
    Ok(true)
}

fn carry_over_server_fields<T>(desired: &T, existing: &T) -> Result<T>
where
    T: Resource + Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(desired)?;
    let current = serde_json::to_value(existing)?;

    value["metadata"]["resourceVersion"] = current["metadata"]["resourceVersion"].clone();
    // Finalizers belong to whoever added them.
    if let Some(finalizers) = current.pointer("/metadata/finalizers") {
        value["metadata"]["finalizers"] = finalizers.clone();
    }
    if current.get("kind").and_then(|k| k.as_str()) == Some("Service") {
        for field in ["clusterIP", "clusterIPs"] {
            if let Some(ip) = current.pointer(&format!("/spec/{field}")) {
                value["spec"][field] = ip.clone();
            }
        }
    }
    Ok(serde_json::from_value(value)?)
}

/// Delete `name`, treating a missing object as success.
///
/// Returns `true` when the object existed.
///
/// # Errors
///
/// Returns an error if the API call fails for any reason other than not-found.
pub async fn delete_ignoring_not_found<T>(api: &Api<T>, name: &str) -> Result<bool>
where
    T: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!("Deleted {} {}", T::kind(&()), name);
            Ok(true)
        }
        Err(e) if is_kube_not_found(&e) => {
            debug!("{} {} already deleted", T::kind(&()), name);
            Ok(false)
        }
        Err(e) => Err(e).with_context(|| format!("failed to delete {} {name}", T::kind(&()))),
    }
}

/// Whether two YAML documents decode to the same value.
///
/// Remote state that is absent never equals the desired document.
///
/// # Errors
///
/// Returns an error if either document is not valid YAML.
pub fn yaml_equal(desired: &[u8], current: Option<&[u8]>) -> Result<bool> {
    let desired: serde_yaml::Value =
        serde_yaml::from_slice(desired).context("failed to decode desired YAML")?;
    let Some(current) = current else {
        return Ok(false);
    };
    let current: serde_yaml::Value =
        serde_yaml::from_slice(current).context("failed to decode remote YAML")?;
    Ok(desired == current)
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;

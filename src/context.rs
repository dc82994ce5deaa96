// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all MLA controllers.
//!
//! Every controller receives an `Arc<Context>` holding:
//! - the Kubernetes client
//! - the Grafana and Cortex clients, built once at start up
//! - the MLA namespace and image registry settings
//! - the event recorder used to surface reconcile failures
//!
//! Grafana and Cortex are held behind their traits so tests can substitute
//! in-memory implementations.

use crate::constants::{CONTROLLER_NAME, EVENT_REASON_RECONCILING_ERROR, GATEWAY_DEFAULT_REGISTRY};
use crate::cortex::CortexApi;
use crate::grafana::GrafanaApi;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use std::sync::Arc;
use tracing::{debug, warn};

/// Install `ring` as the process-wide rustls provider.
///
/// kube and reqwest both link rustls with different backends, so rustls cannot
/// pick one on its own and every kube `Client` needs this to have run first.
/// Calling it again is a no-op.
///
/// # Errors
///
/// Returns an error if no provider is installed afterwards.
pub fn install_crypto_provider() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        anyhow::bail!("no rustls crypto provider installed");
    }
    Ok(())
}

/// Shared context passed to all controllers.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client for API operations
    pub client: Client,

    /// Grafana API (organization, users, datasources, dashboards)
    pub grafana: Arc<dyn GrafanaApi>,

    /// Cortex alertmanager, Cortex ruler and Loki ruler
    pub cortex: Arc<dyn CortexApi>,

    /// Namespace holding the MLA stack, dashboards, templates and runtime config
    pub mla_namespace: String,

    /// Registry replacing the default one in gateway images
    pub overwrite_registry: Option<String>,

    recorder: Recorder,
}

impl Context {
    #[must_use]
    pub fn new(
        client: Client,
        grafana: Arc<dyn GrafanaApi>,
        cortex: Arc<dyn CortexApi>,
        mla_namespace: impl Into<String>,
        overwrite_registry: Option<String>,
    ) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
            grafana,
            cortex,
            mla_namespace: mla_namespace.into(),
            overwrite_registry,
        }
    }

    /// Registry gateway images are pulled from.
    #[must_use]
    pub fn registry(&self) -> &str {
        self.overwrite_registry
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(GATEWAY_DEFAULT_REGISTRY)
    }

    /// Publish a `ReconcilingError` warning on `object`.
    ///
    /// Events are fire-and-forget; a failure to publish is only logged.
    pub async fn publish_reconcile_error(&self, object: &ObjectReference, controller: &str, note: String) {
        let event = Event {
            type_: EventType::Warning,
            reason: EVENT_REASON_RECONCILING_ERROR.to_string(),
            note: Some(note),
            action: controller.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, object).await {
            warn!(
                controller,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command line / environment configuration of the operator.

use crate::constants::{
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_WORKER_COUNT,
    GRAFANA_SECRET_PASSWORD_KEY, GRAFANA_SECRET_USER_KEY, METRICS_SERVER_BIND_ADDRESS,
};
use anyhow::{anyhow, bail, Context as _, Result};
use clap::Parser;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, ResourceExt};
use std::time::Duration;

/// MLA operator options. Every flag can also be set through the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "mla-operator", version, about = "Monitoring, Logging and Alerting operator")]
pub struct Options {
    /// Run the MLA controllers; when disabled, remove everything they ever created
    #[arg(long, env = "ENABLE_USER_CLUSTER_MLA", default_value_t = false)]
    pub enable_user_cluster_mla: bool,

    /// Namespace of the shared MLA stack
    #[arg(long, env = "MLA_NAMESPACE", default_value = "mla")]
    pub mla_namespace: String,

    /// Base URL of Grafana
    #[arg(
        long,
        env = "GRAFANA_URL",
        default_value = "http://grafana.mla.svc.cluster.local"
    )]
    pub grafana_url: String,

    /// Header Grafana's auth proxy reads the user identity from
    #[arg(long, env = "GRAFANA_HEADER_NAME", default_value = "X-Forwarded-Email")]
    pub grafana_header_name: String,

    /// `namespace/name` of the Secret holding Grafana admin credentials
    #[arg(long, env = "GRAFANA_SECRET_NAME", default_value = "mla/grafana")]
    pub grafana_secret_name: String,

    /// Base URL of the Cortex alertmanager
    #[arg(
        long,
        env = "CORTEX_ALERTMANAGER_URL",
        default_value = "http://cortex-alertmanager.mla.svc.cluster.local:8080"
    )]
    pub cortex_alertmanager_url: String,

    /// Base URL of the Cortex ruler
    #[arg(
        long,
        env = "CORTEX_RULER_URL",
        default_value = "http://cortex-ruler.mla.svc.cluster.local:8080"
    )]
    pub cortex_ruler_url: String,

    /// Base URL of the Loki ruler
    #[arg(
        long,
        env = "LOKI_RULER_URL",
        default_value = "http://loki-distributed-ruler.mla.svc.cluster.local:3100"
    )]
    pub loki_ruler_url: String,

    /// Concurrent reconciles per controller
    #[arg(long, env = "WORKER_COUNT", default_value_t = DEFAULT_WORKER_COUNT)]
    pub worker_count: u16,

    /// Registry to pull the gateway image from
    #[arg(long, env = "OVERWRITE_REGISTRY")]
    pub overwrite_registry: Option<String>,

    /// Timeout of outbound Grafana/Cortex requests, in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)]
    pub http_timeout_secs: u64,

    /// Address the Prometheus metrics server binds to
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = METRICS_SERVER_BIND_ADDRESS)]
    pub metrics_bind_address: String,
}

impl Options {
    /// Reject option combinations clap cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error when a value is syntactically valid but unusable.
    pub fn validate(&self) -> Result<()> {
        if self.mla_namespace.is_empty() {
            bail!("--mla-namespace must not be empty");
        }
        if self.worker_count == 0 {
            bail!("--worker-count must be at least 1");
        }
        self.grafana_secret()?;
        for (flag, value) in [
            ("--grafana-url", &self.grafana_url),
            ("--cortex-alertmanager-url", &self.cortex_alertmanager_url),
            ("--cortex-ruler-url", &self.cortex_ruler_url),
            ("--loki-ruler-url", &self.loki_ruler_url),
        ] {
            if let Err(e) = url::Url::parse(value) {
                bail!("{flag} is not a valid URL ({value}): {e}");
            }
        }
        Ok(())
    }

    /// Namespace and name of the Grafana credentials Secret.
    ///
    /// # Errors
    ///
    /// Returns an error unless the flag has the form `namespace/name`.
    pub fn grafana_secret(&self) -> Result<(&str, &str)> {
        match self.grafana_secret_name.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok((ns, name))
            }
            _ => bail!(
                "--grafana-secret-name must be in the form namespace/name, got '{}'",
                self.grafana_secret_name
            ),
        }
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Grafana admin credentials.
#[derive(Clone)]
pub struct GrafanaCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for GrafanaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrafanaCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl GrafanaCredentials {
    /// Extract the credentials from the `admin-user` and `admin-password` keys.
    ///
    /// # Errors
    ///
    /// Returns an error if a key is missing, empty or not UTF-8.
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        let value = |key: &str| -> Result<String> {
            let raw = secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .filter(|v| !v.0.is_empty())
                .ok_or_else(|| anyhow!("Secret {} has no {key}", secret.name_any()))?;
            String::from_utf8(raw.0.clone())
                .with_context(|| format!("{key} of Secret {} is not UTF-8", secret.name_any()))
        };
        Ok(Self {
            username: value(GRAFANA_SECRET_USER_KEY)?,
            password: value(GRAFANA_SECRET_PASSWORD_KEY)?,
        })
    }

    /// Read the credentials Secret named by `--grafana-secret-name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the Secret cannot be read or is incomplete.
    pub async fn load(client: &Client, options: &Options) -> Result<Self> {
        let (namespace, name) = options.grafana_secret()?;
        let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
        let secret = secrets
            .get(name)
            .await
            .with_context(|| format!("failed to get Grafana Secret {namespace}/{name}"))?;
        Self::from_secret(&secret)
    }
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod options_tests;

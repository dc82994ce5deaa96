// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `reqwest` implementation of [`CortexApi`].
//!
//! Three endpoints are involved:
//!
//! - the Cortex alertmanager for per-tenant alertmanager configuration
//! - the Cortex ruler for `Metrics` rule groups
//! - the Loki ruler for `Logs` rule groups

use super::CortexApi;
use crate::constants::{
    ALERTMANAGER_CONFIG_ENDPOINT, LOGS_RULE_GROUP_ENDPOINT, METRICS_RULE_GROUP_ENDPOINT,
    SCOPE_ORG_ID_HEADER,
};
use crate::crd::RuleGroupType;
use crate::errors::CortexError;
use crate::metrics::record_remote_request;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const BACKEND_ALERTMANAGER: &str = "cortex-alertmanager";
const BACKEND_RULER: &str = "cortex-ruler";
const BACKEND_LOKI: &str = "loki-ruler";

/// HTTP client for the Cortex alertmanager, the Cortex ruler and the Loki ruler.
#[derive(Clone, Debug)]
pub struct CortexClient {
    http: reqwest::Client,
    alertmanager_url: String,
    ruler_url: String,
    loki_ruler_url: String,
}

impl CortexClient {
    /// Build a client. URLs are base URLs without API paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        alertmanager_url: &str,
        ruler_url: &str,
        loki_ruler_url: &str,
        timeout: Duration,
    ) -> Result<Self, CortexError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            alertmanager_url: alertmanager_url.trim_end_matches('/').to_string(),
            ruler_url: ruler_url.trim_end_matches('/').to_string(),
            loki_ruler_url: loki_ruler_url.trim_end_matches('/').to_string(),
        })
    }

    fn alertmanager_endpoint(&self) -> String {
        format!("{}{ALERTMANAGER_CONFIG_ENDPOINT}", self.alertmanager_url)
    }

    fn rule_group_endpoint(&self, kind: RuleGroupType) -> (String, &'static str) {
        match kind {
            RuleGroupType::Metrics => (
                format!("{}{METRICS_RULE_GROUP_ENDPOINT}", self.ruler_url),
                BACKEND_RULER,
            ),
            RuleGroupType::Logs => (
                format!("{}{LOGS_RULE_GROUP_ENDPOINT}", self.loki_ruler_url),
                BACKEND_LOKI,
            ),
        }
    }

    /// Send a request for `tenant`, returning the body of a 2xx response.
    async fn send(
        &self,
        backend: &str,
        method: Method,
        url: String,
        tenant: &str,
        resource: &str,
        body: Option<&[u8]>,
    ) -> Result<Vec<u8>, CortexError> {
        debug!(backend, method = %method, url = %url, tenant, "Cortex request");

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(SCOPE_ORG_ID_HEADER, tenant);
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/yaml")
                .body(body.to_vec());
        }

        let start = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                record_remote_request(backend, method.as_str(), "error", start.elapsed());
                return Err(e.into());
            }
        };
        let status = response.status();
        let bytes = response.bytes().await?;
        let elapsed = start.elapsed();

        if status.is_success() {
            record_remote_request(backend, method.as_str(), "success", elapsed);
            return Ok(bytes.to_vec());
        }
        if status == StatusCode::NOT_FOUND {
            record_remote_request(backend, method.as_str(), "not_found", elapsed);
            return Err(CortexError::NotFound {
                tenant: tenant.to_string(),
                resource: resource.to_string(),
            });
        }

        record_remote_request(backend, method.as_str(), "error", elapsed);
        warn!(backend, method = %method, url = %url, tenant, status = %status, "Cortex request failed");
        Err(CortexError::Status {
            method: method.to_string(),
            url,
            tenant: tenant.to_string(),
            status: status.as_u16(),
            message: String::from_utf8_lossy(&bytes).trim().to_string(),
        })
    }
}

/// Map not-found to `None` on reads.
fn absent_as_none(result: Result<Vec<u8>, CortexError>) -> Result<Option<Vec<u8>>, CortexError> {
    match result {
        Ok(body) => Ok(Some(body)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl CortexApi for CortexClient {
    async fn get_alertmanager_config(&self, tenant: &str) -> Result<Option<Vec<u8>>, CortexError> {
        absent_as_none(
            self.send(
                BACKEND_ALERTMANAGER,
                Method::GET,
                self.alertmanager_endpoint(),
                tenant,
                "alertmanager configuration",
                None,
            )
            .await,
        )
    }

    async fn set_alertmanager_config(
        &self,
        tenant: &str,
        config: &[u8],
    ) -> Result<(), CortexError> {
        self.send(
            BACKEND_ALERTMANAGER,
            Method::POST,
            self.alertmanager_endpoint(),
            tenant,
            "alertmanager configuration",
            Some(config),
        )
        .await?;
        Ok(())
    }

    async fn delete_alertmanager_config(&self, tenant: &str) -> Result<(), CortexError> {
        self.send(
            BACKEND_ALERTMANAGER,
            Method::DELETE,
            self.alertmanager_endpoint(),
            tenant,
            "alertmanager configuration",
            None,
        )
        .await?;
        Ok(())
    }

    async fn get_rule_group(
        &self,
        tenant: &str,
        kind: RuleGroupType,
        name: &str,
    ) -> Result<Option<Vec<u8>>, CortexError> {
        let (base, backend) = self.rule_group_endpoint(kind);
        absent_as_none(
            self.send(
                backend,
                Method::GET,
                format!("{base}/{name}"),
                tenant,
                &format!("rule group '{name}'"),
                None,
            )
            .await,
        )
    }

    async fn set_rule_group(
        &self,
        tenant: &str,
        kind: RuleGroupType,
        data: &[u8],
    ) -> Result<(), CortexError> {
        let (base, backend) = self.rule_group_endpoint(kind);
        self.send(
            backend,
            Method::POST,
            base,
            tenant,
            "rule group",
            Some(data),
        )
        .await?;
        Ok(())
    }

    async fn delete_rule_group(
        &self,
        tenant: &str,
        kind: RuleGroupType,
        name: &str,
    ) -> Result<(), CortexError> {
        let (base, backend) = self.rule_group_endpoint(kind);
        self.send(
            backend,
            Method::DELETE,
            format!("{base}/{name}"),
            tenant,
            &format!("rule group '{name}'"),
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod client_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the Grafana and Cortex/Loki HTTP APIs.
//!
//! The reconcilers need to tell "the remote object does not exist" apart from
//! every other failure, because not-found is a success on every delete path.
//! Both error enums therefore expose [`GrafanaError::is_not_found`] and
//! [`CortexError::is_not_found`].

use thiserror::Error;

/// Errors returned by the Grafana HTTP API.
#[derive(Error, Debug)]
pub enum GrafanaError {
    /// The addressed Grafana object does not exist (HTTP 404)
    #[error("Grafana {resource} not found")]
    NotFound {
        /// Description of what was looked up (e.g. `datasource uid=loki-test`)
        resource: String,
    },

    /// Grafana refused a create because an object with the same name exists (HTTP 409)
    #[error("Grafana conflict: {message}")]
    Conflict {
        /// Message returned by Grafana
        message: String,
    },

    /// Any other non-success status
    #[error("Grafana request {method} {path} failed with HTTP {status}: {message}")]
    Status {
        /// HTTP method of the failing request
        method: String,
        /// Request path
        path: String,
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// The request could not be sent or the response could not be read
    #[error("Grafana request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body was not the expected JSON
    #[error("failed to decode Grafana response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The configured base URL cannot be joined with an API path
    #[error("invalid Grafana URL: {0}")]
    Url(#[from] url::ParseError),
}

impl GrafanaError {
    /// Whether the error means the remote object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors returned by the Cortex and Loki HTTP APIs.
#[derive(Error, Debug)]
pub enum CortexError {
    /// The tenant has no such configuration or rule group (HTTP 404)
    #[error("{resource} not found for tenant '{tenant}'")]
    NotFound {
        /// Tenant (cluster name)
        tenant: String,
        /// Description of what was addressed
        resource: String,
    },

    /// Any other non-success status
    #[error("{method} {url} for tenant '{tenant}' failed with HTTP {status}: {message}")]
    Status {
        /// HTTP method of the failing request
        method: String,
        /// Full request URL
        url: String,
        /// Tenant (cluster name)
        tenant: String,
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// The request could not be sent or the response could not be read
    #[error("Cortex request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl CortexError {
    /// Whether the error means the remote object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Rejected `spec.ruleGroupType` values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown rule group type '{0}', expected 'Metrics' or 'Logs'")]
pub struct UnknownRuleGroupType(pub String);

/// Whether a Kubernetes API error is a 404.
#[must_use]
pub fn is_kube_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;

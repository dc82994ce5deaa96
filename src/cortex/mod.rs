// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cortex and Loki API access.
//!
//! Every call is made on behalf of a tenant, identified by the cluster name in
//! the `X-Scope-OrgID` header. Payloads are opaque YAML; callers compare them
//! semantically before pushing.

pub mod client;

#[cfg(test)]
pub mod fake;

pub use client::CortexClient;

use crate::crd::RuleGroupType;
use crate::errors::CortexError;
use async_trait::async_trait;

/// Operations the MLA controllers perform against Cortex and Loki.
#[async_trait]
pub trait CortexApi: Send + Sync {
    /// Alertmanager configuration of `tenant`, `None` when Cortex has none.
    async fn get_alertmanager_config(&self, tenant: &str) -> Result<Option<Vec<u8>>, CortexError>;

    async fn set_alertmanager_config(&self, tenant: &str, config: &[u8])
        -> Result<(), CortexError>;

    /// Remove the alertmanager configuration of `tenant`.
    ///
    /// A missing configuration yields [`CortexError::NotFound`].
    async fn delete_alertmanager_config(&self, tenant: &str) -> Result<(), CortexError>;

    /// Rule group `name` of `tenant`, `None` when absent.
    async fn get_rule_group(
        &self,
        tenant: &str,
        kind: RuleGroupType,
        name: &str,
    ) -> Result<Option<Vec<u8>>, CortexError>;

    /// Create or replace a rule group; the group name is read from `data`.
    async fn set_rule_group(
        &self,
        tenant: &str,
        kind: RuleGroupType,
        data: &[u8],
    ) -> Result<(), CortexError>;

    async fn delete_rule_group(
        &self,
        tenant: &str,
        kind: RuleGroupType,
        name: &str,
    ) -> Result<(), CortexError>;
}

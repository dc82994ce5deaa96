// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory Cortex/Loki used by reconciler tests.

use super::CortexApi;
use crate::crd::RuleGroupType;
use crate::errors::CortexError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct FakeCortexState {
    /// Alertmanager configuration by tenant
    pub alertmanager: BTreeMap<String, Vec<u8>>,
    /// Rule groups by (tenant, type, group name)
    pub rule_groups: BTreeMap<(String, &'static str, String), Vec<u8>>,
    pub mutations: Vec<String>,
    pub failure: Option<u16>,
}

#[derive(Default)]
pub struct FakeCortex {
    state: Mutex<FakeCortexState>,
}

/// Group name of a rule group document.
fn group_name(data: &[u8]) -> String {
    serde_yaml::from_slice::<serde_yaml::Value>(data)
        .ok()
        .and_then(|v| v.get("name").and_then(|n| n.as_str()).map(String::from))
        .unwrap_or_default()
}

impl FakeCortex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeCortexState> {
        self.state.lock().expect("fake cortex lock")
    }

    pub fn set_failure(&self, status: Option<u16>) {
        self.state().failure = status;
    }

    pub fn mutations(&self) -> Vec<String> {
        self.state().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.state().mutations.clear();
    }

    pub fn alertmanager_config(&self, tenant: &str) -> Option<Vec<u8>> {
        self.state().alertmanager.get(tenant).cloned()
    }

    pub fn rule_group(&self, tenant: &str, kind: RuleGroupType, name: &str) -> Option<Vec<u8>> {
        self.state()
            .rule_groups
            .get(&(tenant.to_string(), kind.as_str(), name.to_string()))
            .cloned()
    }

    fn check(
        &self,
        tenant: &str,
        call: Option<String>,
    ) -> Result<MutexGuard<'_, FakeCortexState>, CortexError> {
        let mut state = self.state();
        if let Some(status) = state.failure {
            return Err(CortexError::Status {
                method: call.unwrap_or_else(|| "GET".to_string()),
                url: "fake://cortex".to_string(),
                tenant: tenant.to_string(),
                status,
                message: "injected failure".to_string(),
            });
        }
        if let Some(call) = call {
            state.mutations.push(call);
        }
        Ok(state)
    }
}

fn not_found(tenant: &str, resource: &str) -> CortexError {
    CortexError::NotFound {
        tenant: tenant.to_string(),
        resource: resource.to_string(),
    }
}

#[async_trait]
impl CortexApi for FakeCortex {
    async fn get_alertmanager_config(&self, tenant: &str) -> Result<Option<Vec<u8>>, CortexError> {
        let state = self.check(tenant, None)?;
        Ok(state.alertmanager.get(tenant).cloned())
    }

    async fn set_alertmanager_config(
        &self,
        tenant: &str,
        config: &[u8],
    ) -> Result<(), CortexError> {
        let mut state = self.check(tenant, Some(format!("set_alertmanager_config {tenant}")))?;
        state
            .alertmanager
            .insert(tenant.to_string(), config.to_vec());
        Ok(())
    }

    async fn delete_alertmanager_config(&self, tenant: &str) -> Result<(), CortexError> {
        let mut state =
            self.check(tenant, Some(format!("delete_alertmanager_config {tenant}")))?;
        state
            .alertmanager
            .remove(tenant)
            .map(|_| ())
            .ok_or_else(|| not_found(tenant, "alertmanager configuration"))
    }

    async fn get_rule_group(
        &self,
        tenant: &str,
        kind: RuleGroupType,
        name: &str,
    ) -> Result<Option<Vec<u8>>, CortexError> {
        let state = self.check(tenant, None)?;
        Ok(state
            .rule_groups
            .get(&(tenant.to_string(), kind.as_str(), name.to_string()))
            .cloned())
    }

    async fn set_rule_group(
        &self,
        tenant: &str,
        kind: RuleGroupType,
        data: &[u8],
    ) -> Result<(), CortexError> {
        let name = group_name(data);
        let mut state =
            self.check(tenant, Some(format!("set_rule_group {tenant} {kind} {name}")))?;
        state
            .rule_groups
            .insert((tenant.to_string(), kind.as_str(), name), data.to_vec());
        Ok(())
    }

    async fn delete_rule_group(
        &self,
        tenant: &str,
        kind: RuleGroupType,
        name: &str,
    ) -> Result<(), CortexError> {
        let mut state =
            self.check(tenant, Some(format!("delete_rule_group {tenant} {kind} {name}")))?;
        state
            .rule_groups
            .remove(&(tenant.to_string(), kind.as_str(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(tenant, name))
    }
}

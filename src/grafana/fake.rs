// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory Grafana used by reconciler tests.
//!
//! Mirrors the behaviour the reconcilers rely on: users created through the
//! auth proxy land in the default organization, datasource names are unique
//! per organization, and every mutating call is recorded.

use super::types::{Datasource, Org, OrgRole, OrgUser, User};
use super::GrafanaApi;
use crate::constants::GRAFANA_DEFAULT_ORG_ID;
use crate::errors::GrafanaError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeGrafanaState {
    pub orgs: BTreeMap<String, i64>,
    pub users: BTreeMap<i64, User>,
    pub memberships: BTreeMap<(i64, i64), OrgRole>,
    pub datasources: BTreeMap<(i64, String), Datasource>,
    pub dashboards: BTreeMap<(i64, String), serde_json::Value>,
    pub mutations: Vec<String>,
    pub failure: Option<u16>,
    next_id: i64,
}

impl FakeGrafanaState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        // IDs 1.. are reserved for the default org and its admin.
        self.next_id + 10
    }
}

#[derive(Default)]
pub struct FakeGrafana {
    state: Mutex<FakeGrafanaState>,
}

fn not_found(resource: impl Into<String>) -> GrafanaError {
    GrafanaError::NotFound {
        resource: resource.into(),
    }
}

impl FakeGrafana {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grafana with the shared organization already present.
    pub fn with_org(name: &str, id: i64) -> Self {
        let fake = Self::new();
        fake.state().orgs.insert(name.to_string(), id);
        fake
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, FakeGrafanaState> {
        self.state.lock().expect("fake grafana lock")
    }

    /// Make every subsequent call fail with `status`, `None` to recover.
    pub fn set_failure(&self, status: Option<u16>) {
        self.state().failure = status;
    }

    pub fn mutations(&self) -> Vec<String> {
        self.state().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.state().mutations.clear();
    }

    pub fn datasource(&self, org_id: i64, uid: &str) -> Option<Datasource> {
        self.state()
            .datasources
            .get(&(org_id, uid.to_string()))
            .cloned()
    }

    pub fn add_user(&self, email: &str, is_grafana_admin: bool) -> i64 {
        let mut state = self.state();
        let id = state.next_id();
        state.users.insert(
            id,
            User {
                id,
                email: email.to_string(),
                login: email.to_string(),
                is_grafana_admin,
            },
        );
        id
    }

    fn check(
        &self,
        call: &str,
        mutating: bool,
    ) -> Result<std::sync::MutexGuard<'_, FakeGrafanaState>, GrafanaError> {
        let mut state = self.state();
        if let Some(status) = state.failure {
            return Err(GrafanaError::Status {
                method: call.to_string(),
                path: String::new(),
                status,
                message: "injected failure".to_string(),
            });
        }
        if mutating {
            state.mutations.push(call.to_string());
        }
        Ok(state)
    }
}

#[async_trait]
impl GrafanaApi for FakeGrafana {
    async fn get_org_by_name(&self, name: &str) -> Result<Org, GrafanaError> {
        let state = self.check("get_org_by_name", false)?;
        state
            .orgs
            .get(name)
            .map(|id| Org {
                id: *id,
                name: name.to_string(),
            })
            .ok_or_else(|| not_found(format!("org {name}")))
    }

    async fn create_org(&self, name: &str) -> Result<i64, GrafanaError> {
        let mut state = self.check(&format!("create_org {name}"), true)?;
        if state.orgs.contains_key(name) {
            return Err(GrafanaError::Conflict {
                message: "Organization name taken".to_string(),
            });
        }
        let id = state.next_id();
        state.orgs.insert(name.to_string(), id);
        Ok(id)
    }

    async fn bootstrap_user(&self, email: &str) -> Result<User, GrafanaError> {
        let mut state = self.check(&format!("bootstrap_user {email}"), true)?;
        if let Some(user) = state.users.values().find(|u| u.email == email) {
            return Ok(user.clone());
        }
        let id = state.next_id();
        let user = User {
            id,
            email: email.to_string(),
            login: email.to_string(),
            is_grafana_admin: false,
        };
        state.users.insert(id, user.clone());
        state
            .memberships
            .insert((GRAFANA_DEFAULT_ORG_ID, id), OrgRole::Viewer);
        Ok(user)
    }

    async fn lookup_user(&self, login_or_email: &str) -> Result<User, GrafanaError> {
        let state = self.check("lookup_user", false)?;
        state
            .users
            .values()
            .find(|u| u.email == login_or_email || u.login == login_or_email)
            .cloned()
            .ok_or_else(|| not_found(format!("user {login_or_email}")))
    }

    async fn update_user_permissions(
        &self,
        user_id: i64,
        is_grafana_admin: bool,
    ) -> Result<(), GrafanaError> {
        let mut state = self.check(
            &format!("update_user_permissions {user_id} {is_grafana_admin}"),
            true,
        )?;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| not_found(format!("user {user_id}")))?;
        user.is_grafana_admin = is_grafana_admin;
        Ok(())
    }

    async fn delete_user(&self, user_id: i64) -> Result<(), GrafanaError> {
        let mut state = self.check(&format!("delete_user {user_id}"), true)?;
        state
            .users
            .remove(&user_id)
            .ok_or_else(|| not_found(format!("user {user_id}")))?;
        state.memberships.retain(|(_, uid), _| *uid != user_id);
        Ok(())
    }

    async fn get_org_users(&self, org_id: i64) -> Result<Vec<OrgUser>, GrafanaError> {
        let state = self.check("get_org_users", false)?;
        Ok(state
            .memberships
            .iter()
            .filter(|((org, _), _)| *org == org_id)
            .filter_map(|((org, user_id), role)| {
                state.users.get(user_id).map(|u| OrgUser {
                    org_id: *org,
                    user_id: *user_id,
                    email: u.email.clone(),
                    login: u.login.clone(),
                    role: *role,
                })
            })
            .collect())
    }

    async fn add_org_user(
        &self,
        org_id: i64,
        login_or_email: &str,
        role: OrgRole,
    ) -> Result<(), GrafanaError> {
        let mut state = self.check(
            &format!("add_org_user {org_id} {login_or_email} {role}"),
            true,
        )?;
        let user_id = state
            .users
            .values()
            .find(|u| u.email == login_or_email || u.login == login_or_email)
            .map(|u| u.id)
            .ok_or_else(|| not_found(format!("user {login_or_email}")))?;
        if state.memberships.contains_key(&(org_id, user_id)) {
            return Err(GrafanaError::Conflict {
                message: "User is already member of this organization".to_string(),
            });
        }
        state.memberships.insert((org_id, user_id), role);
        Ok(())
    }

    async fn update_org_user(
        &self,
        org_id: i64,
        user_id: i64,
        role: OrgRole,
    ) -> Result<(), GrafanaError> {
        let mut state = self.check(&format!("update_org_user {org_id} {user_id} {role}"), true)?;
        let entry = state
            .memberships
            .get_mut(&(org_id, user_id))
            .ok_or_else(|| not_found(format!("org user {user_id}")))?;
        *entry = role;
        Ok(())
    }

    async fn delete_org_user(&self, org_id: i64, user_id: i64) -> Result<(), GrafanaError> {
        let mut state = self.check(&format!("delete_org_user {org_id} {user_id}"), true)?;
        state
            .memberships
            .remove(&(org_id, user_id))
            .map(|_| ())
            .ok_or_else(|| not_found(format!("org user {user_id}")))
    }

    async fn create_datasource(
        &self,
        org_id: i64,
        datasource: &Datasource,
    ) -> Result<i64, GrafanaError> {
        let mut state = self.check(&format!("create_datasource {}", datasource.uid), true)?;
        if state
            .datasources
            .iter()
            .any(|((org, _), ds)| *org == org_id && ds.name == datasource.name)
        {
            return Err(GrafanaError::Conflict {
                message: "data source with the same name already exists".to_string(),
            });
        }
        let id = state.next_id();
        let mut stored = datasource.clone();
        stored.id = id;
        stored.org_id = org_id;
        state
            .datasources
            .insert((org_id, datasource.uid.clone()), stored);
        Ok(id)
    }

    async fn get_datasource_by_name(
        &self,
        org_id: i64,
        name: &str,
    ) -> Result<Datasource, GrafanaError> {
        let state = self.check("get_datasource_by_name", false)?;
        state
            .datasources
            .iter()
            .find(|((org, _), ds)| *org == org_id && ds.name == name)
            .map(|(_, ds)| ds.clone())
            .ok_or_else(|| not_found(format!("datasource name={name}")))
    }

    async fn get_datasource_by_uid(
        &self,
        org_id: i64,
        uid: &str,
    ) -> Result<Datasource, GrafanaError> {
        let state = self.check("get_datasource_by_uid", false)?;
        state
            .datasources
            .get(&(org_id, uid.to_string()))
            .cloned()
            .ok_or_else(|| not_found(format!("datasource uid={uid}")))
    }

    async fn update_datasource(
        &self,
        org_id: i64,
        datasource: &Datasource,
    ) -> Result<(), GrafanaError> {
        let mut state = self.check(&format!("update_datasource {}", datasource.uid), true)?;
        let key = state
            .datasources
            .iter()
            .find(|((org, _), ds)| *org == org_id && ds.id == datasource.id)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| not_found(format!("datasource id={}", datasource.id)))?;
        state.datasources.remove(&key);
        state
            .datasources
            .insert((org_id, datasource.uid.clone()), datasource.clone());
        Ok(())
    }

    async fn delete_datasource_by_uid(&self, org_id: i64, uid: &str) -> Result<(), GrafanaError> {
        let mut state = self.check(&format!("delete_datasource {uid}"), true)?;
        state
            .datasources
            .remove(&(org_id, uid.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(format!("datasource uid={uid}")))
    }

    async fn set_dashboard(
        &self,
        org_id: i64,
        board: &serde_json::Value,
        _overwrite: bool,
    ) -> Result<(), GrafanaError> {
        let uid = board
            .get("uid")
            .and_then(|u| u.as_str())
            .unwrap_or_default()
            .to_string();
        let mut state = self.check(&format!("set_dashboard {uid}"), true)?;
        state.dashboards.insert((org_id, uid), board.clone());
        Ok(())
    }

    async fn delete_dashboard_by_uid(&self, org_id: i64, uid: &str) -> Result<(), GrafanaError> {
        let mut state = self.check(&format!("delete_dashboard {uid}"), true)?;
        state
            .dashboards
            .remove(&(org_id, uid.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(format!("dashboard uid={uid}")))
    }
}

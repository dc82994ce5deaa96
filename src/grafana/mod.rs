// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Grafana API access.
//!
//! [`GrafanaApi`] is the seam between the reconcilers and Grafana. The
//! production implementation is [`client::GrafanaClient`]; tests substitute an
//! in-memory implementation.
//!
//! Every datasource and dashboard call is scoped to an organization through the
//! `X-Grafana-Org-Id` header rather than through the URL.

pub mod client;
pub mod types;

#[cfg(test)]
pub mod fake;

pub use client::GrafanaClient;
pub use types::{Datasource, Org, OrgRole, OrgUser, User};

use crate::errors::GrafanaError;
use async_trait::async_trait;

/// Operations the MLA controllers perform against Grafana.
#[async_trait]
pub trait GrafanaApi: Send + Sync {
    /// Look up an organization by its name.
    async fn get_org_by_name(&self, name: &str) -> Result<Org, GrafanaError>;

    /// Create an organization, returning its ID.
    async fn create_org(&self, name: &str) -> Result<i64, GrafanaError>;

    /// Create a user through the auth proxy.
    ///
    /// Grafana creates the user as a side effect of `GET /api/user` when the
    /// auth proxy header carries an unknown identity.
    async fn bootstrap_user(&self, email: &str) -> Result<User, GrafanaError>;

    async fn lookup_user(&self, login_or_email: &str) -> Result<User, GrafanaError>;

    /// Grant or revoke Grafana server admin.
    async fn update_user_permissions(
        &self,
        user_id: i64,
        is_grafana_admin: bool,
    ) -> Result<(), GrafanaError>;

    /// Delete a user globally, removing it from every organization.
    async fn delete_user(&self, user_id: i64) -> Result<(), GrafanaError>;

    async fn get_org_users(&self, org_id: i64) -> Result<Vec<OrgUser>, GrafanaError>;

    async fn add_org_user(
        &self,
        org_id: i64,
        login_or_email: &str,
        role: OrgRole,
    ) -> Result<(), GrafanaError>;

    async fn update_org_user(
        &self,
        org_id: i64,
        user_id: i64,
        role: OrgRole,
    ) -> Result<(), GrafanaError>;

    async fn delete_org_user(&self, org_id: i64, user_id: i64) -> Result<(), GrafanaError>;

    /// Create a datasource, returning the ID Grafana assigned.
    ///
    /// A datasource with the same name yields [`GrafanaError::Conflict`].
    async fn create_datasource(
        &self,
        org_id: i64,
        datasource: &Datasource,
    ) -> Result<i64, GrafanaError>;

    async fn get_datasource_by_name(
        &self,
        org_id: i64,
        name: &str,
    ) -> Result<Datasource, GrafanaError>;

    async fn get_datasource_by_uid(
        &self,
        org_id: i64,
        uid: &str,
    ) -> Result<Datasource, GrafanaError>;

    /// Update the datasource identified by `datasource.id`.
    async fn update_datasource(
        &self,
        org_id: i64,
        datasource: &Datasource,
    ) -> Result<(), GrafanaError>;

    async fn delete_datasource_by_uid(&self, org_id: i64, uid: &str) -> Result<(), GrafanaError>;

    /// Create or update a dashboard from its JSON model.
    async fn set_dashboard(
        &self,
        org_id: i64,
        board: &serde_json::Value,
        overwrite: bool,
    ) -> Result<(), GrafanaError>;

    async fn delete_dashboard_by_uid(&self, org_id: i64, uid: &str) -> Result<(), GrafanaError>;
}

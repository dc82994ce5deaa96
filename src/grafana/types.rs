// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Grafana API payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Org {
    pub id: i64,
    pub name: String,
}

/// A Grafana user as returned by `/api/user` and `/api/users/lookup`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub is_grafana_admin: bool,
}

/// Membership of a user in an organization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgUser {
    pub org_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub login: String,
    pub role: OrgRole,
}

/// Role of a user inside an organization.
///
/// Grafana reports members without a basic role as `"None"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrgRole {
    #[serde(rename = "None")]
    NoBasicRole,
    Viewer,
    Editor,
    Admin,
}

impl OrgRole {
    /// Role a platform user gets in the shared organization.
    #[must_use]
    pub fn for_admin(is_admin: bool) -> Self {
        if is_admin {
            Self::Admin
        } else {
            Self::Editor
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoBasicRole => "None",
            Self::Viewer => "Viewer",
            Self::Editor => "Editor",
            Self::Admin => "Admin",
        }
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Grafana datasource.
///
/// `id` is assigned by Grafana and is zero for datasources that have not been
/// created yet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datasource {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub id: i64,
    #[serde(default)]
    pub org_id: i64,
    pub uid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub access: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub json_data: serde_json::Value,
}

impl Datasource {
    /// Compare the fields the operator owns, ignoring server assigned ones.
    #[must_use]
    pub fn same_settings(&self, other: &Self) -> bool {
        self.org_id == other.org_id
            && self.uid == other.uid
            && self.name == other.name
            && self.kind == other.kind
            && self.access == other.access
            && self.url == other.url
            && json_data_eq(&self.json_data, &other.json_data)
    }
}

// Grafana returns `{}` for datasources created without jsonData.
fn json_data_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    let empty = |v: &serde_json::Value| v.is_null() || v.as_object().is_some_and(|m| m.is_empty());
    (empty(a) && empty(b)) || a == b
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if passes a reference
fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Response of `POST /api/datasources`.
#[derive(Debug, Deserialize)]
pub(crate) struct CreateDatasourceResponse {
    #[serde(default)]
    pub id: Option<i64>,
}

/// Response of `POST /api/orgs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateOrgResponse {
    pub org_id: i64,
}

/// Body of `POST /api/orgs/{org}/users`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddOrgUserRequest<'a> {
    pub login_or_email: &'a str,
    pub role: OrgRole,
}

/// Body of `PUT /api/admin/users/{id}/permissions`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PermissionsRequest {
    pub is_grafana_admin: bool,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `reqwest` implementation of [`GrafanaApi`].

use super::types::{
    AddOrgUserRequest, CreateDatasourceResponse, CreateOrgResponse, Datasource, Org, OrgRole,
    OrgUser, PermissionsRequest, User,
};
use super::GrafanaApi;
use crate::constants::GRAFANA_ORG_ID_HEADER;
use crate::errors::GrafanaError;
use crate::metrics::record_remote_request;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

const BACKEND: &str = "grafana";

/// Grafana HTTP client authenticating with basic auth.
#[derive(Clone)]
pub struct GrafanaClient {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
    auth_proxy_header: String,
}

impl std::fmt::Debug for GrafanaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrafanaClient")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .field("auth_proxy_header", &self.auth_proxy_header)
            .finish_non_exhaustive()
    }
}

/// How a request authenticates.
#[derive(Clone, Copy)]
enum Auth<'a> {
    Basic,
    /// Identity forwarded in the auth proxy header, no credentials
    Proxy(&'a str),
}

impl GrafanaClient {
    /// Build a client for the Grafana at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        auth_proxy_header: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GrafanaError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            username: username.into(),
            password: password.into(),
            auth_proxy_header: auth_proxy_header.into(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, GrafanaError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{path}"))?)
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        org_id: Option<i64>,
        auth: Auth<'_>,
        body: Option<&B>,
    ) -> Result<String, GrafanaError> {
        let path = url.path().to_string();
        debug!(method = %method, path = %path, org_id = ?org_id, "Grafana request");

        let mut request = self.http.request(method.clone(), url);
        request = match auth {
            Auth::Basic => request.basic_auth(&self.username, Some(&self.password)),
            Auth::Proxy(identity) => request.header(self.auth_proxy_header.as_str(), identity),
        };
        if let Some(org_id) = org_id {
            request = request.header(GRAFANA_ORG_ID_HEADER, org_id.to_string());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let start = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                record_remote_request(BACKEND, method.as_str(), "error", start.elapsed());
                return Err(e.into());
            }
        };
        let status = response.status();
        let text = response.text().await?;
        let elapsed = start.elapsed();

        if status.is_success() {
            record_remote_request(BACKEND, method.as_str(), "success", elapsed);
            return Ok(text);
        }

        match status {
            StatusCode::NOT_FOUND => {
                record_remote_request(BACKEND, method.as_str(), "not_found", elapsed);
                Err(GrafanaError::NotFound { resource: path })
            }
            StatusCode::CONFLICT => {
                record_remote_request(BACKEND, method.as_str(), "conflict", elapsed);
                Err(GrafanaError::Conflict {
                    message: error_message(&text),
                })
            }
            _ => {
                record_remote_request(BACKEND, method.as_str(), "error", elapsed);
                warn!(method = %method, path = %path, status = %status, "Grafana request failed");
                Err(GrafanaError::Status {
                    method: method.to_string(),
                    path,
                    status: status.as_u16(),
                    message: error_message(&text),
                })
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        org_id: Option<i64>,
        auth: Auth<'_>,
    ) -> Result<T, GrafanaError> {
        let text = self
            .send::<()>(Method::GET, url, org_id, auth, None)
            .await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Grafana wraps errors as `{"message": "..."}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Strip the numeric `id` of an exported dashboard; Grafana matches on `uid`.
fn prepare_dashboard(board: &serde_json::Value) -> serde_json::Value {
    let mut board = board.clone();
    if let Some(obj) = board.as_object_mut() {
        obj.remove("id");
    }
    board
}

#[async_trait]
impl GrafanaApi for GrafanaClient {
    async fn get_org_by_name(&self, name: &str) -> Result<Org, GrafanaError> {
        let mut url = self.url("/api/orgs/name/")?;
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .push(name);
        self.get_json(url, None, Auth::Basic).await
    }

    async fn create_org(&self, name: &str) -> Result<i64, GrafanaError> {
        let text = self
            .send(
                Method::POST,
                self.url("/api/orgs")?,
                None,
                Auth::Basic,
                Some(&json!({ "name": name })),
            )
            .await?;
        let created: CreateOrgResponse = serde_json::from_str(&text)?;
        Ok(created.org_id)
    }

    async fn bootstrap_user(&self, email: &str) -> Result<User, GrafanaError> {
        self.get_json(self.url("/api/user")?, None, Auth::Proxy(email))
            .await
    }

    async fn lookup_user(&self, login_or_email: &str) -> Result<User, GrafanaError> {
        let mut url = self.url("/api/users/lookup")?;
        url.query_pairs_mut()
            .append_pair("loginOrEmail", login_or_email);
        self.get_json(url, None, Auth::Basic).await
    }

    async fn update_user_permissions(
        &self,
        user_id: i64,
        is_grafana_admin: bool,
    ) -> Result<(), GrafanaError> {
        self.send(
            Method::PUT,
            self.url(&format!("/api/admin/users/{user_id}/permissions"))?,
            None,
            Auth::Basic,
            Some(&PermissionsRequest { is_grafana_admin }),
        )
        .await?;
        Ok(())
    }

    async fn delete_user(&self, user_id: i64) -> Result<(), GrafanaError> {
        self.send::<()>(
            Method::DELETE,
            self.url(&format!("/api/admin/users/{user_id}"))?,
            None,
            Auth::Basic,
            None,
        )
        .await?;
        Ok(())
    }

    async fn get_org_users(&self, org_id: i64) -> Result<Vec<OrgUser>, GrafanaError> {
        self.get_json(
            self.url(&format!("/api/orgs/{org_id}/users"))?,
            None,
            Auth::Basic,
        )
        .await
    }

    async fn add_org_user(
        &self,
        org_id: i64,
        login_or_email: &str,
        role: OrgRole,
    ) -> Result<(), GrafanaError> {
        self.send(
            Method::POST,
            self.url(&format!("/api/orgs/{org_id}/users"))?,
            None,
            Auth::Basic,
            Some(&AddOrgUserRequest {
                login_or_email,
                role,
            }),
        )
        .await?;
        Ok(())
    }

    async fn update_org_user(
        &self,
        org_id: i64,
        user_id: i64,
        role: OrgRole,
    ) -> Result<(), GrafanaError> {
        self.send(
            Method::PATCH,
            self.url(&format!("/api/orgs/{org_id}/users/{user_id}"))?,
            None,
            Auth::Basic,
            Some(&json!({ "role": role })),
        )
        .await?;
        Ok(())
    }

    async fn delete_org_user(&self, org_id: i64, user_id: i64) -> Result<(), GrafanaError> {
        self.send::<()>(
            Method::DELETE,
            self.url(&format!("/api/orgs/{org_id}/users/{user_id}"))?,
            None,
            Auth::Basic,
            None,
        )
        .await?;
        Ok(())
    }

    async fn create_datasource(
        &self,
        org_id: i64,
        datasource: &Datasource,
    ) -> Result<i64, GrafanaError> {
        let text = self
            .send(
                Method::POST,
                self.url("/api/datasources")?,
                Some(org_id),
                Auth::Basic,
                Some(datasource),
            )
            .await?;
        let created: CreateDatasourceResponse = serde_json::from_str(&text)?;
        match created.id {
            Some(id) => Ok(id),
            // Older Grafana versions do not echo the ID.
            None => Ok(self
                .get_datasource_by_name(org_id, &datasource.name)
                .await?
                .id),
        }
    }

    async fn get_datasource_by_name(
        &self,
        org_id: i64,
        name: &str,
    ) -> Result<Datasource, GrafanaError> {
        let mut url = self.url("/api/datasources/name/")?;
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .push(name);
        self.get_json(url, Some(org_id), Auth::Basic).await
    }

    async fn get_datasource_by_uid(
        &self,
        org_id: i64,
        uid: &str,
    ) -> Result<Datasource, GrafanaError> {
        self.get_json(
            self.url(&format!("/api/datasources/uid/{uid}"))?,
            Some(org_id),
            Auth::Basic,
        )
        .await
    }

    async fn update_datasource(
        &self,
        org_id: i64,
        datasource: &Datasource,
    ) -> Result<(), GrafanaError> {
        self.send(
            Method::PUT,
            self.url(&format!("/api/datasources/{}", datasource.id))?,
            Some(org_id),
            Auth::Basic,
            Some(datasource),
        )
        .await?;
        Ok(())
    }

    async fn delete_datasource_by_uid(&self, org_id: i64, uid: &str) -> Result<(), GrafanaError> {
        self.send::<()>(
            Method::DELETE,
            self.url(&format!("/api/datasources/uid/{uid}"))?,
            Some(org_id),
            Auth::Basic,
            None,
        )
        .await?;
        Ok(())
    }

    async fn set_dashboard(
        &self,
        org_id: i64,
        board: &serde_json::Value,
        overwrite: bool,
    ) -> Result<(), GrafanaError> {
        let body = json!({
            "dashboard": prepare_dashboard(board),
            "overwrite": overwrite,
        });
        self.send(
            Method::POST,
            self.url("/api/dashboards/db")?,
            Some(org_id),
            Auth::Basic,
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn delete_dashboard_by_uid(&self, org_id: i64, uid: &str) -> Result<(), GrafanaError> {
        self.send::<()>(
            Method::DELETE,
            self.url(&format!("/api/dashboards/uid/{uid}"))?,
            Some(org_id),
            Auth::Basic,
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod client_tests;

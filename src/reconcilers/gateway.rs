// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes resources of the per-cluster MLA gateway.
//!
//! The gateway is an nginx instance in the cluster namespace. It injects the
//! tenant header into every request towards Cortex and Loki, enforces the
//! logging rate limits, and terminates mutual TLS for agents running in the
//! user cluster.
//!
//! Resources:
//!
//! - `ConfigMap` `mla-gateway` with the rendered nginx configuration
//! - `Secret` `mla-gateway-ca` with a self-signed CA, generated once
//! - `Secret` `mla-gateway-certificates` with a serving certificate for
//!   `mla-gateway.{externalName}`, reissued when the hostname or CA changes
//! - `Deployment` `mla-gateway`
//! - `Service` `mla-gateway` (in-cluster) and `mla-gateway-ext` (exposed)

use crate::constants::{
    GATEWAY_CA_CERT_KEY, GATEWAY_CA_KEY_KEY, GATEWAY_CA_SECRET_NAME, GATEWAY_CA_VALIDITY_DAYS,
    GATEWAY_CERTIFICATES_SECRET_NAME, GATEWAY_CERT_KEY, GATEWAY_CERT_VALIDITY_DAYS,
    GATEWAY_CONFIG_KEY, GATEWAY_EXTERNAL_NAME, GATEWAY_EXTERNAL_PORT, GATEWAY_EXTERNAL_PORT_NAME,
    GATEWAY_EXTERNAL_SERVICE_PORT, GATEWAY_IMAGE, GATEWAY_INTERNAL_PORT,
    GATEWAY_INTERNAL_SERVICE_PORT, GATEWAY_KEY_KEY, GATEWAY_NAME, GATEWAY_REPLICAS,
    GATEWAY_SNI_PREFIX,
};
use crate::crd::{Cluster, ExposeStrategy, LoggingRateLimitSettings, MLAAdminSetting};
use crate::labels::{
    gateway_labels, gateway_selector, CERT_CA_HASH_ANNOTATION, CERT_HOSTNAME_ANNOTATION,
    CONFIG_HASH_ANNOTATION, NODEPORT_PROXY_EXPOSE, NODEPORT_PROXY_EXPOSE_NAMESPACED,
    NODEPORT_PROXY_PORT_MAPPING,
};
use crate::reconcilers::resources::{delete_ignoring_not_found, object_hash, reconcile_object};
use anyhow::{anyhow, Context as _, Result};
use chrono::{Datelike, Duration, Utc};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, HTTPGetAction, KeyToPath, PodSpec,
    PodTemplateSpec, Probe, Secret, SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client, ResourceExt};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{debug, info};

const NGINX_CONF_TEMPLATE: &str = include_str!("../../templates/mla-gateway.nginx.conf.tmpl");

const CONFIG_VOLUME: &str = "config";
const CERTIFICATES_VOLUME: &str = "certificates";
const CA_VOLUME: &str = "ca";

// ============================================================================
// Configuration
// ============================================================================

/// Render the nginx configuration for `tenant`.
///
/// Zero rate limits disable limiting for that direction.
#[must_use]
pub fn render_nginx_config(
    tenant: &str,
    mla_namespace: &str,
    settings: Option<&MLAAdminSetting>,
) -> String {
    let logging = settings
        .and_then(|s| s.spec.logging_rate_limits.clone())
        .unwrap_or_default();
    let metrics_query = settings
        .and_then(|s| s.spec.monitoring_rate_limits.as_ref())
        .map_or((0, 0), |m| (m.query_rate, m.query_burst_size));

    let mut zones = String::new();
    let mut limit = |zone: &str, rate: i64, burst: i64| -> String {
        if rate <= 0 {
            return String::new();
        }
        let _ = writeln!(
            zones,
            "  limit_req_zone $http_x_scope_orgid zone={zone}:1m rate={rate}r/s;"
        );
        format!("      limit_req zone={zone} burst={} nodelay;\n", burst.max(0))
    };
    let LoggingRateLimitSettings {
        ingestion_rate,
        ingestion_burst_size,
        query_rate,
        query_burst_size,
    } = logging;
    let logs_write = limit("logs_write", ingestion_rate, ingestion_burst_size);
    let logs_read = limit("logs_read", query_rate, query_burst_size);
    let metrics_read = limit("metrics_read", metrics_query.0, metrics_query.1);

    NGINX_CONF_TEMPLATE
        .replace("{{TENANT}}", tenant)
        .replace("{{MLA_NAMESPACE}}", mla_namespace)
        .replace("{{LIMIT_ZONES}}", &zones)
        .replace("{{LOGS_WRITE_LIMIT}}", &logs_write)
        .replace("{{LOGS_READ_LIMIT}}", &logs_read)
        .replace("{{METRICS_READ_LIMIT}}", &metrics_read)
}

fn metadata(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(gateway_labels()),
        ..Default::default()
    }
}

#[must_use]
pub fn build_config_map(namespace: &str, config: &str) -> ConfigMap {
    ConfigMap {
        metadata: metadata(GATEWAY_NAME, namespace),
        data: Some(BTreeMap::from([(
            GATEWAY_CONFIG_KEY.to_string(),
            config.to_string(),
        )])),
        ..Default::default()
    }
}

// ============================================================================
// Certificates
// ============================================================================

/// PEM encoded certificate and private key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PemPair {
    pub cert: String,
    pub key: String,
}

/// Calendar date `days` from now, as rcgen expects it.
fn expiry_date(days: i64) -> Result<(i32, u8, u8)> {
    let at = Utc::now() + Duration::days(days);
    let month = u8::try_from(at.month()).context("invalid month")?;
    let day = u8::try_from(at.day()).context("invalid day")?;
    Ok((at.year(), month, day))
}

/// Generate a self-signed gateway CA.
///
/// # Errors
///
/// Returns an error if key or certificate generation fails.
pub fn generate_ca(namespace: &str) -> Result<PemPair> {
    let key = KeyPair::generate().context("failed to generate CA key")?;
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(DnType::CommonName, format!("mla-gateway-ca.{namespace}"));
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
    ];
    let (year, month, day) = expiry_date(GATEWAY_CA_VALIDITY_DAYS)?;
    params.not_after = rcgen::date_time_ymd(year, month, day);
    let cert = params
        .self_signed(&key)
        .context("failed to self-sign CA certificate")?;
    Ok(PemPair {
        cert: cert.pem(),
        key: key.serialize_pem(),
    })
}

/// Issue a serving certificate for `hostname`, signed by `ca`.
///
/// # Errors
///
/// Returns an error if the CA cannot be parsed or signing fails.
pub fn issue_certificate(ca: &PemPair, hostname: &str) -> Result<PemPair> {
    let ca_key = KeyPair::from_pem(&ca.key).context("failed to parse CA key")?;
    let ca_params =
        CertificateParams::from_ca_cert_pem(&ca.cert).context("failed to parse CA certificate")?;
    let ca_cert = ca_params
        .self_signed(&ca_key)
        .context("failed to load CA certificate")?;

    let key = KeyPair::generate().context("failed to generate gateway key")?;
    let mut params = CertificateParams::new(vec![hostname.to_string()])
        .with_context(|| format!("invalid gateway hostname {hostname}"))?;
    params.distinguished_name.push(DnType::CommonName, hostname);
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    let (year, month, day) = expiry_date(GATEWAY_CERT_VALIDITY_DAYS)?;
    params.not_after = rcgen::date_time_ymd(year, month, day);
    let cert = params
        .signed_by(&key, &ca_cert, &ca_key)
        .context("failed to sign gateway certificate")?;
    Ok(PemPair {
        cert: cert.pem(),
        key: key.serialize_pem(),
    })
}

fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|v| String::from_utf8(v.0.clone()).ok())
        .filter(|v| !v.is_empty())
}

fn pem_secret(name: &str, namespace: &str, pair: &PemPair, keys: (&str, &str)) -> Secret {
    Secret {
        metadata: metadata(name, namespace),
        data: Some(BTreeMap::from([
            (keys.0.to_string(), ByteString(pair.cert.clone().into_bytes())),
            (keys.1.to_string(), ByteString(pair.key.clone().into_bytes())),
        ])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Load the gateway CA, generating it when missing or incomplete.
async fn ensure_ca(client: &Client, namespace: &str) -> Result<PemPair> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let existing = secrets
        .get_opt(GATEWAY_CA_SECRET_NAME)
        .await
        .context("failed to get gateway CA Secret")?;

    if let Some(secret) = &existing {
        if let (Some(cert), Some(key)) = (
            secret_value(secret, GATEWAY_CA_CERT_KEY),
            secret_value(secret, GATEWAY_CA_KEY_KEY),
        ) {
            return Ok(PemPair { cert, key });
        }
    }

    let ca = generate_ca(namespace)?;
    let mut secret = pem_secret(
        GATEWAY_CA_SECRET_NAME,
        namespace,
        &ca,
        (GATEWAY_CA_CERT_KEY, GATEWAY_CA_KEY_KEY),
    );
    match existing {
        Some(current) => {
            info!("Regenerating incomplete gateway CA in {}", namespace);
            secret.metadata.resource_version = current.resource_version();
            secrets
                .replace(GATEWAY_CA_SECRET_NAME, &PostParams::default(), &secret)
                .await
                .context("failed to replace gateway CA Secret")?;
        }
        None => {
            info!("Creating gateway CA in {}", namespace);
            secrets
                .create(&PostParams::default(), &secret)
                .await
                .context("failed to create gateway CA Secret")?;
        }
    }
    Ok(ca)
}

/// Ensure the serving certificate matches `hostname` and `ca`.
///
/// Returns the certificate currently stored.
async fn ensure_certificate(
    client: &Client,
    namespace: &str,
    hostname: &str,
    ca: &PemPair,
) -> Result<PemPair> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let ca_hash = object_hash(&ca.cert)?;
    let existing = secrets
        .get_opt(GATEWAY_CERTIFICATES_SECRET_NAME)
        .await
        .context("failed to get gateway certificate Secret")?;

    if let Some(secret) = &existing {
        let annotations = secret.annotations();
        let current = (
            secret_value(secret, GATEWAY_CERT_KEY),
            secret_value(secret, GATEWAY_KEY_KEY),
        );
        if annotations.get(CERT_HOSTNAME_ANNOTATION).map(String::as_str) == Some(hostname)
            && annotations.get(CERT_CA_HASH_ANNOTATION) == Some(&ca_hash)
        {
            if let (Some(cert), Some(key)) = current {
                debug!(namespace = %namespace, "Gateway certificate is up to date");
                return Ok(PemPair { cert, key });
            }
        }
    }

    let pair = issue_certificate(ca, hostname)?;
    let mut secret = pem_secret(
        GATEWAY_CERTIFICATES_SECRET_NAME,
        namespace,
        &pair,
        (GATEWAY_CERT_KEY, GATEWAY_KEY_KEY),
    );
    secret.metadata.annotations = Some(BTreeMap::from([
        (CERT_HOSTNAME_ANNOTATION.to_string(), hostname.to_string()),
        (CERT_CA_HASH_ANNOTATION.to_string(), ca_hash),
    ]));

    match existing {
        Some(current) => {
            info!("Reissuing gateway certificate for {} in {}", hostname, namespace);
            secret.metadata.resource_version = current.resource_version();
            secrets
                .replace(GATEWAY_CERTIFICATES_SECRET_NAME, &PostParams::default(), &secret)
                .await
                .context("failed to replace gateway certificate Secret")?;
        }
        None => {
            info!("Issuing gateway certificate for {} in {}", hostname, namespace);
            secrets
                .create(&PostParams::default(), &secret)
                .await
                .context("failed to create gateway certificate Secret")?;
        }
    }
    Ok(pair)
}

// ============================================================================
// Workload and Services
// ============================================================================

/// Gateway `Deployment`; `revision` changes whenever pods must restart.
#[must_use]
pub fn build_deployment(namespace: &str, registry: &str, revision: &str) -> Deployment {
    let container = Container {
        name: GATEWAY_NAME.to_string(),
        image: Some(format!("{registry}/{GATEWAY_IMAGE}")),
        ports: Some(vec![
            ContainerPort {
                name: Some("http".to_string()),
                container_port: GATEWAY_INTERNAL_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("https".to_string()),
                container_port: GATEWAY_EXTERNAL_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: "/etc/nginx/nginx.conf".to_string(),
                sub_path: Some(GATEWAY_CONFIG_KEY.to_string()),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: CERTIFICATES_VOLUME.to_string(),
                mount_path: "/etc/ssl/mla-gateway".to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: CA_VOLUME.to_string(),
                mount_path: "/etc/ssl/mla-gateway-ca".to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/healthz".to_string()),
                port: IntOrString::Int(GATEWAY_INTERNAL_PORT),
                ..Default::default()
            }),
            period_seconds: Some(10),
            ..Default::default()
        }),
        ..Default::default()
    };

    let volumes = vec![
        Volume {
            name: CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: GATEWAY_NAME.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: CERTIFICATES_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(GATEWAY_CERTIFICATES_SECRET_NAME.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: CA_VOLUME.to_string(),
            // The CA key never leaves the Secret.
            secret: Some(SecretVolumeSource {
                secret_name: Some(GATEWAY_CA_SECRET_NAME.to_string()),
                items: Some(vec![KeyToPath {
                    key: GATEWAY_CA_CERT_KEY.to_string(),
                    path: GATEWAY_CA_CERT_KEY.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    Deployment {
        metadata: metadata(GATEWAY_NAME, namespace),
        spec: Some(DeploymentSpec {
            replicas: Some(GATEWAY_REPLICAS),
            selector: LabelSelector {
                match_labels: Some(gateway_selector()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(gateway_labels()),
                    annotations: Some(BTreeMap::from([(
                        CONFIG_HASH_ANNOTATION.to_string(),
                        revision.to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[must_use]
pub fn build_internal_service(namespace: &str) -> Service {
    Service {
        metadata: metadata(GATEWAY_NAME, namespace),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(gateway_selector()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: GATEWAY_INTERNAL_SERVICE_PORT,
                target_port: Some(IntOrString::Int(GATEWAY_INTERNAL_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Externally exposed `Service`, shaped by the cluster's expose strategy.
#[must_use]
pub fn build_external_service(
    namespace: &str,
    strategy: ExposeStrategy,
    external_name: &str,
) -> Service {
    let (type_, annotations) = match strategy {
        ExposeStrategy::NodePort => (
            "NodePort",
            BTreeMap::from([(NODEPORT_PROXY_EXPOSE.to_string(), "NodePort".to_string())]),
        ),
        ExposeStrategy::LoadBalancer => (
            "NodePort",
            BTreeMap::from([(
                NODEPORT_PROXY_EXPOSE_NAMESPACED.to_string(),
                "true".to_string(),
            )]),
        ),
        ExposeStrategy::Tunneling => (
            "ClusterIP",
            BTreeMap::from([
                (NODEPORT_PROXY_EXPOSE.to_string(), "SNI".to_string()),
                (
                    NODEPORT_PROXY_PORT_MAPPING.to_string(),
                    serde_json::json!({
                        GATEWAY_EXTERNAL_PORT_NAME: gateway_hostname(external_name),
                    })
                    .to_string(),
                ),
            ]),
        ),
    };

    let mut meta = metadata(GATEWAY_EXTERNAL_NAME, namespace);
    meta.annotations = Some(annotations);
    Service {
        metadata: meta,
        spec: Some(ServiceSpec {
            type_: Some(type_.to_string()),
            selector: Some(gateway_selector()),
            ports: Some(vec![ServicePort {
                name: Some(GATEWAY_EXTERNAL_PORT_NAME.to_string()),
                port: GATEWAY_EXTERNAL_SERVICE_PORT,
                target_port: Some(IntOrString::Int(GATEWAY_EXTERNAL_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Hostname agents use to reach the gateway of a cluster.
#[must_use]
pub fn gateway_hostname(external_name: &str) -> String {
    format!("{GATEWAY_SNI_PREFIX}{external_name}")
}

// ============================================================================
// Reconcile / Teardown
// ============================================================================

/// Create or update every gateway resource of `cluster`.
///
/// # Errors
///
/// Returns an error if the cluster lacks a namespace or address, or if any
/// resource cannot be reconciled.
pub async fn reconcile_gateway(
    client: &Client,
    cluster: &Cluster,
    mla_namespace: &str,
    registry: &str,
    settings: Option<&MLAAdminSetting>,
) -> Result<()> {
    let namespace = cluster
        .namespace_name()
        .ok_or_else(|| anyhow!("cluster {} has no namespace", cluster.name_any()))?;
    let external_name = cluster
        .external_name()
        .ok_or_else(|| anyhow!("cluster {} has no external address", cluster.name_any()))?;

    let config = render_nginx_config(&cluster.name_any(), mla_namespace, settings);
    reconcile_object(client, namespace, &build_config_map(namespace, &config))
        .await
        .context("failed to reconcile gateway ConfigMap")?;

    let ca = ensure_ca(client, namespace).await?;
    let certificate =
        ensure_certificate(client, namespace, &gateway_hostname(external_name), &ca).await?;

    let revision = object_hash(&(&config, &certificate.cert, &ca.cert))?;
    reconcile_object(client, namespace, &build_deployment(namespace, registry, &revision))
        .await
        .context("failed to reconcile gateway Deployment")?;

    reconcile_object(client, namespace, &build_internal_service(namespace))
        .await
        .context("failed to reconcile gateway Service")?;
    reconcile_object(
        client,
        namespace,
        &build_external_service(namespace, cluster.spec.expose_strategy, external_name),
    )
    .await
    .context("failed to reconcile external gateway Service")?;
    Ok(())
}

/// A gateway resource removed on teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayResource {
    Deployment,
    InternalService,
    ExternalService,
    ConfigMap,
    CertificateSecret,
    CaSecret,
}

impl GatewayResource {
    /// Teardown order.
    pub const ALL: [Self; 6] = [
        Self::Deployment,
        Self::InternalService,
        Self::ExternalService,
        Self::ConfigMap,
        Self::CertificateSecret,
        Self::CaSecret,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Deployment | Self::InternalService | Self::ConfigMap => GATEWAY_NAME,
            Self::ExternalService => GATEWAY_EXTERNAL_NAME,
            Self::CertificateSecret => GATEWAY_CERTIFICATES_SECRET_NAME,
            Self::CaSecret => GATEWAY_CA_SECRET_NAME,
        }
    }

    /// Delete this resource from `namespace`, tolerating not-found.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails for any other reason.
    pub async fn delete(self, client: &Client, namespace: &str) -> Result<()> {
        let name = self.name();
        match self {
            Self::Deployment => {
                let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
                delete_ignoring_not_found(&api, name).await?;
            }
            Self::InternalService | Self::ExternalService => {
                let api: Api<Service> = Api::namespaced(client.clone(), namespace);
                delete_ignoring_not_found(&api, name).await?;
            }
            Self::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
                delete_ignoring_not_found(&api, name).await?;
            }
            Self::CertificateSecret | Self::CaSecret => {
                let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
                delete_ignoring_not_found(&api, name).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod gateway_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use kube::Client;
use mla_operator::{
    constants::TOKIO_WORKER_THREADS,
    context::{install_crypto_provider, Context},
    controllers,
    cortex::CortexClient,
    grafana::GrafanaClient,
    metrics,
    options::{GrafanaCredentials, Options},
    reconcilers::CleanupReconciler,
};
use std::sync::Arc;
use tracing::{debug, error, info};

fn main() -> Result<()> {
    install_crypto_provider()?;

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("mla-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

fn init_tracing() {
    // Respects RUST_LOG, defaulting to INFO, and RUST_LOG_FORMAT=json|text
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main() -> Result<()> {
    init_tracing();

    let options = Options::parse();
    options.validate()?;
    info!(
        mla_namespace = %options.mla_namespace,
        enabled = options.enable_user_cluster_mla,
        "Starting MLA operator"
    );

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    let credentials = GrafanaCredentials::load(&client, &options).await?;
    let grafana = GrafanaClient::new(
        &options.grafana_url,
        credentials.username,
        credentials.password,
        options.grafana_header_name.clone(),
        options.http_timeout(),
    )?;
    let cortex = CortexClient::new(
        &options.cortex_alertmanager_url,
        &options.cortex_ruler_url,
        &options.loki_ruler_url,
        options.http_timeout(),
    )?;
    debug!("Grafana and Cortex clients created");

    let ctx = Arc::new(Context::new(
        client,
        Arc::new(grafana),
        Arc::new(cortex),
        options.mla_namespace.clone(),
        options.overwrite_registry.clone(),
    ));

    let metrics_server = metrics::serve_metrics(&options.metrics_bind_address);

    if options.enable_user_cluster_mla {
        tokio::select! {
            result = controllers::run_all(ctx, options.worker_count) => {
                error!("CRITICAL: controller exited unexpectedly: {:?}", result);
                result
            }
            result = metrics_server => {
                error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
                result?;
                anyhow::bail!("metrics server exited unexpectedly without error")
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                Ok(())
            }
        }
    } else {
        info!("User cluster MLA is disabled, removing all MLA resources");
        let cleanup = CleanupReconciler::new(ctx);
        tokio::select! {
            () = async {
                cleanup.run().await;
                // Stay up so the Deployment does not restart the pass.
                futures::future::pending::<()>().await;
            } => Ok(()),
            result = metrics_server => {
                error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
                result?;
                anyhow::bail!("metrics server exited unexpectedly without error")
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                Ok(())
            }
        }
    }
}

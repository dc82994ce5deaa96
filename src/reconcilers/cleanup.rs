// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global removal of everything the MLA controllers ever created.
//!
//! When user cluster MLA is disabled none of the regular controllers run.
//! Instead a single pass asks every reconciler to apply its delete path to
//! all objects it may have touched. Each step is idempotent, so a failed pass
//! is simply started over.

use crate::constants::CLEANUP_RETRY_DELAY_SECS;
use crate::context::Context;
use crate::metrics::record_cleanup_run;
use crate::reconcilers::{
    AlertmanagerReconciler, GrafanaDashboardReconciler, GrafanaDatasourceReconciler,
    GrafanaUserReconciler, RatelimitReconciler, RuleGroupReconciler, RuleGroupSyncReconciler,
};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// A reconciler able to remove all state it manages.
#[async_trait]
pub trait Cleaner: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Apply the delete path to every object this reconciler may own.
    async fn cleanup(&self) -> Result<()>;
}

pub struct CleanupReconciler {
    cleaners: Vec<Arc<dyn Cleaner>>,
    retry_delay: Duration,
}

impl CleanupReconciler {
    /// All cleaners, in the order users, datasources, dashboards,
    /// alertmanager, rule groups, rule group templates, rate limits.
    ///
    /// The Grafana organization is left in place.
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self::with_cleaners(vec![
            Arc::new(GrafanaUserReconciler::new(ctx.clone())),
            Arc::new(GrafanaDatasourceReconciler::new(ctx.clone())),
            Arc::new(GrafanaDashboardReconciler::new(ctx.clone())),
            Arc::new(AlertmanagerReconciler::new(ctx.clone())),
            Arc::new(RuleGroupReconciler::new(ctx.clone())),
            Arc::new(RuleGroupSyncReconciler::new(ctx.clone())),
            Arc::new(RatelimitReconciler::new(ctx)),
        ])
    }

    #[must_use]
    pub fn with_cleaners(cleaners: Vec<Arc<dyn Cleaner>>) -> Self {
        Self {
            cleaners,
            retry_delay: Duration::from_secs(CLEANUP_RETRY_DELAY_SECS),
        }
    }

    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Names of the cleaners in execution order.
    #[must_use]
    pub fn cleaner_names(&self) -> Vec<&'static str> {
        self.cleaners.iter().map(|c| c.name()).collect()
    }

    /// One pass over all cleaners, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first cleaner error, naming the cleaner.
    pub async fn run_once(&self) -> Result<()> {
        for cleaner in &self.cleaners {
            info!("Running {} cleanup", cleaner.name());
            cleaner
                .cleanup()
                .await
                .with_context(|| format!("{} cleanup failed", cleaner.name()))?;
        }
        Ok(())
    }

    /// Repeat passes until one succeeds.
    pub async fn run(&self) {
        loop {
            let start = Instant::now();
            match self.run_once().await {
                Ok(()) => {
                    record_cleanup_run(true);
                    info!(
                        "MLA cleanup finished in {:.3}s",
                        start.elapsed().as_secs_f64()
                    );
                    return;
                }
                Err(e) => {
                    record_cleanup_run(false);
                    error!(
                        "MLA cleanup failed, retrying in {:?}: {:#}",
                        self.retry_delay, e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "cleanup_tests.rs"]
mod cleanup_tests;

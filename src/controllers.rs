// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller wiring for the MLA reconcilers.
//!
//! Every reconciler runs in its own [`Controller`] with its own work queue.
//! Related objects are mapped back onto the primary resource:
//!
//! | Controller | Primary | Also triggered by |
//! |---|---|---|
//! | `grafana-org` | `Cluster` | |
//! | `grafana-user` | `User` | |
//! | `grafana-dashboard` | `ConfigMap` (MLA namespace) | |
//! | `grafana-datasource` | `Cluster` | gateway `Deployment`, `mla-admin-setting` |
//! | `alertmanager` | `Cluster` | `Alertmanager`, referenced `Secret`s |
//! | `rule-group` | `RuleGroup` | `Cluster` (its namespace's rule groups) |
//! | `rule-group-sync` | `RuleGroup` (MLA namespace) | `Cluster` (all templates) |
//! | `ratelimit` | `MLAAdminSetting` | |

use crate::constants::{
    ERROR_REQUEUE_DURATION_SECS, GATEWAY_NAME, MLA_ADMIN_SETTING_NAME, NOT_READY_REQUEUE_SECS,
};
use crate::context::Context;
use crate::crd::{cluster_name_from_namespace, Alertmanager, Cluster, MLAAdminSetting, RuleGroup, User};
use crate::metrics::{
    record_reconciliation_error, record_reconciliation_requeue, record_reconciliation_success,
};
use crate::reconcilers::{
    AlertmanagerReconciler, GrafanaDashboardReconciler, GrafanaDatasourceReconciler,
    GrafanaOrgReconciler, GrafanaUserReconciler, RatelimitReconciler, RuleGroupReconciler,
    RuleGroupSyncReconciler,
};
use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::runtime::controller::{Action, Config as ControllerConfig};
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::{Controller, WatchStreamExt};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Reconciliation error wrapper
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ReconcileError(#[from] anyhow::Error);

/// A reconciler driven by a controller for resources of kind `K`.
pub trait Reconciler<K>: Send + Sync + 'static {
    /// Controller name used in metrics, logs and events
    const NAME: &'static str;

    fn context(&self) -> &Context;

    fn reconcile(&self, obj: &K) -> impl Future<Output = Result<Action>> + Send;
}

macro_rules! impl_reconciler {
    ($reconciler:ty, $kind:ty, $name:literal) => {
        impl Reconciler<$kind> for $reconciler {
            const NAME: &'static str = $name;

            fn context(&self) -> &Context {
                <$reconciler>::context(self)
            }

            fn reconcile(&self, obj: &$kind) -> impl Future<Output = Result<Action>> + Send {
                <$reconciler>::reconcile(self, obj)
            }
        }
    };
}

impl_reconciler!(GrafanaOrgReconciler, Cluster, "grafana-org");
impl_reconciler!(GrafanaUserReconciler, User, "grafana-user");
impl_reconciler!(GrafanaDashboardReconciler, ConfigMap, "grafana-dashboard");
impl_reconciler!(GrafanaDatasourceReconciler, Cluster, "grafana-datasource");
impl_reconciler!(AlertmanagerReconciler, Cluster, "alertmanager");
impl_reconciler!(RuleGroupReconciler, RuleGroup, "rule-group");
impl_reconciler!(RuleGroupSyncReconciler, RuleGroup, "rule-group-sync");
impl_reconciler!(RatelimitReconciler, MLAAdminSetting, "ratelimit");

/// Run one reconcile, recording metrics and surfacing failures as events.
async fn reconcile_wrapper<K, R>(obj: Arc<K>, reconciler: Arc<R>) -> Result<Action, ReconcileError>
where
    K: Resource<DynamicType = ()> + Send + Sync + 'static,
    R: Reconciler<K>,
{
    let start = Instant::now();
    debug!(
        controller = R::NAME,
        name = %obj.name_any(),
        namespace = ?obj.namespace(),
        "Reconcile wrapper called"
    );

    let result = reconciler.reconcile(&obj).await;
    let duration = start.elapsed();
    match result {
        Ok(action) => {
            record_reconciliation_success(R::NAME, duration);
            if action == Action::requeue(Duration::from_secs(NOT_READY_REQUEUE_SECS)) {
                record_reconciliation_requeue(R::NAME, "not_ready");
            }
            Ok(action)
        }
        Err(e) => {
            record_reconciliation_error(R::NAME, duration);
            error!(
                controller = R::NAME,
                "Failed to reconcile {}: {:#}",
                obj.name_any(),
                e
            );
            reconciler
                .context()
                .publish_reconcile_error(&obj.object_ref(&()), R::NAME, format!("{e:#}"))
                .await;
            Err(e.into())
        }
    }
}

/// Error policy shared by all controllers.
#[allow(clippy::needless_pass_by_value)] // Signature required by kube::runtime::Controller
fn error_policy<K, R>(obj: Arc<K>, err: &ReconcileError, _reconciler: Arc<R>) -> Action
where
    K: Resource<DynamicType = ()>,
    R: Reconciler<K>,
{
    debug!(
        controller = R::NAME,
        name = %obj.name_any(),
        error = %err,
        "Reconciliation error - will retry in {}s",
        ERROR_REQUEUE_DURATION_SECS
    );
    record_reconciliation_requeue(R::NAME, "error");
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

/// Drive `controller` with `reconciler` until shutdown.
async fn run_controller<K, R>(controller: Controller<K>, reconciler: R, concurrency: u16)
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    R: Reconciler<K>,
{
    info!("Starting {} controller", R::NAME);
    controller
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .run(
            reconcile_wrapper::<K, R>,
            error_policy::<K, R>,
            Arc::new(reconciler),
        )
        .for_each(|_| futures::future::ready(()))
        .await;
}

// ============================================================================
// Mappers
// ============================================================================

/// The cluster owning tenant namespace `namespace`.
#[must_use]
pub fn cluster_for_namespace(namespace: Option<&str>) -> Option<ObjectRef<Cluster>> {
    namespace
        .and_then(cluster_name_from_namespace)
        .map(ObjectRef::new)
}

/// Cluster whose gateway `deployment` is.
#[must_use]
pub fn cluster_for_gateway_deployment(deployment: &Deployment) -> Option<ObjectRef<Cluster>> {
    if deployment.name_any() != GATEWAY_NAME {
        return None;
    }
    cluster_for_namespace(deployment.namespace().as_deref())
}

/// Cluster `setting` applies to. Only the well-known setting counts.
#[must_use]
pub fn cluster_for_admin_setting(setting: &MLAAdminSetting) -> Option<ObjectRef<Cluster>> {
    if setting.name_any() != MLA_ADMIN_SETTING_NAME || setting.spec.cluster_name.is_empty() {
        return None;
    }
    Some(ObjectRef::new(&setting.spec.cluster_name))
}

/// Clusters whose Alertmanager references `secret`.
#[must_use]
pub fn clusters_for_secret(
    secret: &Secret,
    alertmanagers: &[Arc<Alertmanager>],
) -> Vec<ObjectRef<Cluster>> {
    let namespace = secret.namespace();
    let name = secret.name_any();
    alertmanagers
        .iter()
        .filter(|am| am.namespace() == namespace && am.spec.config_secret.name == name)
        .filter_map(|am| cluster_for_namespace(am.namespace().as_deref()))
        .collect()
}

/// Rule groups living in the namespace of `cluster`.
#[must_use]
pub fn rule_groups_of_cluster(
    cluster: &Cluster,
    rule_groups: &[Arc<RuleGroup>],
) -> Vec<ObjectRef<RuleGroup>> {
    let Some(namespace) = cluster.namespace_name() else {
        return vec![];
    };
    rule_groups
        .iter()
        .filter(|rg| rg.namespace().as_deref() == Some(namespace))
        .map(|rg| ObjectRef::from_obj(rg.as_ref()))
        .collect()
}

fn refs<K: Resource<DynamicType = ()>>(objects: &[Arc<K>]) -> Vec<ObjectRef<K>> {
    objects
        .iter()
        .map(|obj| ObjectRef::from_obj(obj.as_ref()))
        .collect()
}

// ============================================================================
// Controllers
// ============================================================================

/// Run the Grafana organization controller
pub async fn run_grafana_org_controller(ctx: Arc<Context>, concurrency: u16) {
    let clusters = Api::<Cluster>::all(ctx.client.clone());
    let controller = Controller::new(clusters, WatcherConfig::default());
    run_controller(controller, GrafanaOrgReconciler::new(ctx), concurrency).await;
}

/// Run the Grafana user controller
pub async fn run_grafana_user_controller(ctx: Arc<Context>, concurrency: u16) {
    let users = Api::<User>::all(ctx.client.clone());
    let controller = Controller::new(users, WatcherConfig::default());
    run_controller(controller, GrafanaUserReconciler::new(ctx), concurrency).await;
}

/// Run the Grafana dashboard controller
pub async fn run_grafana_dashboard_controller(ctx: Arc<Context>, concurrency: u16) {
    let config_maps = Api::<ConfigMap>::namespaced(ctx.client.clone(), &ctx.mla_namespace);
    let controller = Controller::new(config_maps, WatcherConfig::default());
    run_controller(controller, GrafanaDashboardReconciler::new(ctx), concurrency).await;
}

/// Run the Grafana datasource and gateway controller
pub async fn run_grafana_datasource_controller(ctx: Arc<Context>, concurrency: u16) {
    let client = ctx.client.clone();
    let controller = Controller::new(Api::<Cluster>::all(client.clone()), WatcherConfig::default())
        .watches(
            Api::<Deployment>::all(client.clone()),
            WatcherConfig::default().fields(&format!("metadata.name={GATEWAY_NAME}")),
            |deployment| cluster_for_gateway_deployment(&deployment),
        )
        .watches(
            Api::<MLAAdminSetting>::all(client),
            WatcherConfig::default().fields(&format!("metadata.name={MLA_ADMIN_SETTING_NAME}")),
            |setting| cluster_for_admin_setting(&setting),
        );
    run_controller(controller, GrafanaDatasourceReconciler::new(ctx), concurrency).await;
}

/// Run the Alertmanager controller
pub async fn run_alertmanager_controller(ctx: Arc<Context>, concurrency: u16) {
    let client = ctx.client.clone();

    let (alertmanager_store, alertmanager_writer) = reflector::store();
    let alertmanager_reflector = reflector::reflector(
        alertmanager_writer,
        watcher::watcher(Api::<Alertmanager>::all(client.clone()), WatcherConfig::default()),
    )
    .touched_objects()
    .default_backoff();

    let controller = Controller::new(Api::<Cluster>::all(client.clone()), WatcherConfig::default())
        .watches_stream(alertmanager_reflector, |am| {
            cluster_for_namespace(am.namespace().as_deref())
        })
        .watches(
            Api::<Secret>::all(client),
            WatcherConfig::default(),
            move |secret| clusters_for_secret(&secret, &alertmanager_store.state()),
        );
    run_controller(controller, AlertmanagerReconciler::new(ctx), concurrency).await;
}

/// Run the rule group controller
pub async fn run_rulegroup_controller(ctx: Arc<Context>, concurrency: u16) {
    let client = ctx.client.clone();
    let controller = Controller::new(Api::<RuleGroup>::all(client.clone()), WatcherConfig::default());
    let rule_groups = controller.store();
    let controller = controller.watches(
        Api::<Cluster>::all(client),
        WatcherConfig::default(),
        move |cluster| rule_groups_of_cluster(&cluster, &rule_groups.state()),
    );
    run_controller(controller, RuleGroupReconciler::new(ctx), concurrency).await;
}

/// Run the rule group template controller
pub async fn run_rulegroup_sync_controller(ctx: Arc<Context>, concurrency: u16) {
    let client = ctx.client.clone();
    let controller = Controller::new(
        Api::<RuleGroup>::namespaced(client.clone(), &ctx.mla_namespace),
        WatcherConfig::default(),
    );
    let templates = controller.store();
    let controller = controller.watches(
        Api::<Cluster>::all(client),
        WatcherConfig::default(),
        move |_| refs(&templates.state()),
    );
    run_controller(controller, RuleGroupSyncReconciler::new(ctx), concurrency).await;
}

/// Run the Cortex rate limit controller.
///
/// All settings share one runtime config document, so this controller always
/// runs a single worker.
pub async fn run_ratelimit_controller(ctx: Arc<Context>) {
    let settings = Api::<MLAAdminSetting>::all(ctx.client.clone());
    let controller = Controller::new(settings, WatcherConfig::default());
    run_controller(controller, RatelimitReconciler::new(ctx), 1).await;
}

/// Run every MLA controller until one of them exits.
///
/// # Errors
///
/// Returns an error naming the controller that stopped.
pub async fn run_all(ctx: Arc<Context>, concurrency: u16) -> Result<()> {
    info!("Starting all controllers");
    let exited = tokio::select! {
        () = run_grafana_org_controller(ctx.clone(), concurrency) => "grafana-org",
        () = run_grafana_user_controller(ctx.clone(), concurrency) => "grafana-user",
        () = run_grafana_dashboard_controller(ctx.clone(), concurrency) => "grafana-dashboard",
        () = run_grafana_datasource_controller(ctx.clone(), concurrency) => "grafana-datasource",
        () = run_alertmanager_controller(ctx.clone(), concurrency) => "alertmanager",
        () = run_rulegroup_controller(ctx.clone(), concurrency) => "rule-group",
        () = run_rulegroup_sync_controller(ctx.clone(), concurrency) => "rule-group-sync",
        () = run_ratelimit_controller(ctx.clone()) => "ratelimit",
    };
    anyhow::bail!("{exited} controller exited")
}

#[cfg(test)]
#[path = "controllers_tests.rs"]
mod controllers_tests;

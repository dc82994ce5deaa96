// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#[cfg(test)]
mod tests {
    use crate::constants::{
        ALERTMANAGER_CONFIG_SECRET_KEY, ALERTMANAGER_FINALIZER, DEFAULT_ALERTMANAGER_CONFIG,
    };
    use crate::crd::{Alertmanager, AlertmanagerConfigurationStatus, Cluster, HealthStatus, MLASettings};
    use crate::reconcilers::alertmanager::{next_config_status, AlertmanagerReconciler};
    use crate::reconcilers::cleanup::Cleaner;
    use crate::test_support::{deleting, test_cluster, TestEnv};
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use kube::ResourceExt;

    const NS: Option<&str> = Some("cluster-test");

    fn config_status(env: &TestEnv) -> AlertmanagerConfigurationStatus {
        env.api
            .get::<Alertmanager>(NS, "alertmanager")
            .unwrap()
            .status
            .unwrap()
            .config_status
    }

    async fn reconciled(env: &TestEnv) -> Cluster {
        env.api.insert(&test_cluster("test", true, false));
        AlertmanagerReconciler::new(env.ctx.clone())
            .reconcile(&env.cluster("test"))
            .await
            .unwrap();
        env.cluster("test")
    }

    #[test]
    fn test_next_config_status() {
        let previous = AlertmanagerConfigurationStatus {
            last_updated: Some("2025-01-01T00:00:00Z".to_string()),
            status: "True".to_string(),
            error_message: None,
        };
        let now = "2025-06-01T00:00:00Z";

        let unchanged = next_config_status(&previous, Ok(false), now);
        assert_eq!(unchanged, previous);

        let pushed = next_config_status(&previous, Ok(true), now);
        assert_eq!(pushed.last_updated.as_deref(), Some(now));

        let err = anyhow::anyhow!("cortex down");
        let failed = next_config_status(&previous, Err(&err), now);
        assert_eq!(failed.status, "False");
        assert_eq!(failed.error_message.as_deref(), Some("cortex down"));
        assert_eq!(failed.last_updated, previous.last_updated);

        let recovered = next_config_status(&failed, Ok(false), now);
        assert_eq!(recovered.status, "True");
        assert_eq!(recovered.last_updated.as_deref(), Some(now));
        assert_eq!(recovered.error_message, None);
    }

    #[tokio::test]
    async fn test_first_reconcile_creates_defaults_and_pushes() {
        let env = TestEnv::new().await;
        let cluster = reconciled(&env).await;

        let secret: Secret = env.api.get(NS, "alertmanager").unwrap();
        assert_eq!(
            secret.data.unwrap()[ALERTMANAGER_CONFIG_SECRET_KEY].0,
            DEFAULT_ALERTMANAGER_CONFIG.as_bytes()
        );
        let alertmanager: Alertmanager = env.api.get(NS, "alertmanager").unwrap();
        assert_eq!(alertmanager.spec.config_secret.name, "alertmanager");
        assert_eq!(
            env.cortex.alertmanager_config("test").unwrap(),
            DEFAULT_ALERTMANAGER_CONFIG.as_bytes()
        );

        let status = config_status(&env);
        assert_eq!(status.status, "True");
        assert!(status.last_updated.is_some());
        assert_eq!(
            cluster.extended_health().alertmanager_config,
            Some(HealthStatus::Up)
        );
        assert!(cluster.finalizers().contains(&ALERTMANAGER_FINALIZER.to_string()));

        env.clear_mutations();
        AlertmanagerReconciler::new(env.ctx.clone())
            .reconcile(&cluster)
            .await
            .unwrap();
        env.assert_no_mutations();
    }

    #[tokio::test]
    async fn test_changed_secret_is_pushed() {
        let env = TestEnv::new().await;
        let cluster = reconciled(&env).await;

        let mut secret: Secret = env.api.get(NS, "alertmanager").unwrap();
        let custom = b"alertmanager_config: |\n  route:\n    receiver: team\n".to_vec();
        secret.data = Some(
            [(ALERTMANAGER_CONFIG_SECRET_KEY.to_string(), ByteString(custom.clone()))].into(),
        );
        env.api.insert(&secret);
        env.clear_mutations();

        AlertmanagerReconciler::new(env.ctx.clone())
            .reconcile(&cluster)
            .await
            .unwrap();
        assert_eq!(env.cortex.alertmanager_config("test").unwrap(), custom);
        assert_eq!(env.cortex.mutations(), vec!["set_alertmanager_config test"]);
    }

    #[tokio::test]
    async fn test_push_failure_is_recorded_before_returning() {
        let env = TestEnv::new().await;
        let cluster = reconciled(&env).await;
        let succeeded = config_status(&env);

        env.cortex.set_failure(Some(503));
        let result = AlertmanagerReconciler::new(env.ctx.clone())
            .reconcile(&cluster)
            .await;
        assert!(result.is_err());

        let status = config_status(&env);
        assert_eq!(status.status, "False");
        assert!(status.error_message.unwrap().contains("503"));
        assert_eq!(status.last_updated, succeeded.last_updated);
        assert_eq!(
            env.cluster("test").extended_health().alertmanager_config,
            Some(HealthStatus::Down)
        );
    }

    #[tokio::test]
    async fn test_disabling_removes_configuration_and_objects() {
        let env = TestEnv::new().await;
        let mut cluster = reconciled(&env).await;
        cluster.spec.mla = Some(MLASettings::default());
        env.api.insert(&cluster);

        let reconciler = AlertmanagerReconciler::new(env.ctx.clone());
        reconciler.reconcile(&env.cluster("test")).await.unwrap();

        let cluster = env.cluster("test");
        assert!(env.cortex.alertmanager_config("test").is_none());
        assert!(!env.api.contains::<Alertmanager>(NS, "alertmanager"));
        assert!(!env.api.contains::<Secret>(NS, "alertmanager"));
        assert_eq!(cluster.extended_health().alertmanager_config, None);
        assert!(cluster.finalizers().is_empty());

        env.clear_mutations();
        reconciler.reconcile(&cluster).await.unwrap();
        env.assert_no_mutations();
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_finalizer() {
        let env = TestEnv::new().await;
        let mut cluster = reconciled(&env).await;
        cluster.spec.mla = Some(MLASettings::default());
        env.api.insert(&cluster);
        env.cortex.set_failure(Some(500));

        let result = AlertmanagerReconciler::new(env.ctx.clone())
            .reconcile(&env.cluster("test"))
            .await;
        assert!(result.is_err());

        let cluster = env.cluster("test");
        assert!(cluster.finalizers().contains(&ALERTMANAGER_FINALIZER.to_string()));
        assert_eq!(
            cluster.extended_health().alertmanager_config,
            Some(HealthStatus::Down)
        );
        assert_eq!(config_status(&env).status, "False");
    }

    #[tokio::test]
    async fn test_deleted_cluster_releases_after_cortex_cleanup() {
        let env = TestEnv::new().await;
        let cluster = deleting(&reconciled(&env).await);
        env.api.insert(&cluster);

        AlertmanagerReconciler::new(env.ctx.clone())
            .reconcile(&cluster)
            .await
            .unwrap();

        assert!(env.cortex.alertmanager_config("test").is_none());
        assert!(env.api.contains::<Secret>(NS, "alertmanager"));
        assert!(!env.api.contains::<Cluster>(None, "test"));
    }

    #[tokio::test]
    async fn test_missing_remote_configuration_is_tolerated() {
        let env = TestEnv::new().await;
        let cluster = reconciled(&env).await;
        env.cortex.state().alertmanager.clear();

        AlertmanagerReconciler::new(env.ctx.clone())
            .cleanup()
            .await
            .unwrap();

        let cluster = env.api.get::<Cluster>(None, &cluster.name_any()).unwrap();
        assert!(cluster.finalizers().is_empty());
        assert!(!env.api.contains::<Alertmanager>(NS, "alertmanager"));
    }
}

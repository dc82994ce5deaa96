// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#[cfg(test)]
mod tests {
    use crate::constants::{
        DATASOURCE_CLEANUP_FINALIZER, RULE_GROUP_FINALIZER, RULE_GROUP_SYNC_FINALIZER,
    };
    use crate::crd::{Cluster, RuleGroup, RuleGroupSpec};
    use crate::reconcilers::cleanup::Cleaner;
    use crate::reconcilers::rulegroup_sync::{build_rule_group_copy, RuleGroupSyncReconciler};
    use crate::test_support::{deleting, test_cluster, TestEnv, TEST_MLA_NAMESPACE};
    use k8s_openapi::ByteString;
    use kube::ResourceExt;

    const DATA: &str = "name: node-alerts\nrules: []\n";

    fn template(data: &str) -> RuleGroup {
        let mut rg = RuleGroup::new(
            "node-alerts",
            RuleGroupSpec {
                rule_group_type: "Metrics".to_string(),
                cluster: Default::default(),
                data: ByteString(data.as_bytes().to_vec()),
            },
        );
        rg.metadata.namespace = Some(TEST_MLA_NAMESPACE.to_string());
        rg
    }

    fn adopted(mut cluster: Cluster) -> Cluster {
        cluster.metadata.finalizers = Some(vec![DATASOURCE_CLEANUP_FINALIZER.to_string()]);
        cluster
    }

    /// `a` and `b` are eligible. `paused` and `off` are not, and `fresh` has
    /// not been picked up by the datasource or alertmanager reconciler yet.
    async fn fleet() -> TestEnv {
        let env = TestEnv::new().await;
        env.api.insert(&adopted(test_cluster("a", true, false)));
        env.api.insert(&adopted(test_cluster("b", false, true)));
        let mut paused = adopted(test_cluster("paused", true, true));
        paused.spec.pause = true;
        env.api.insert(&paused);
        env.api.insert(&adopted(test_cluster("off", false, false)));
        env.api.insert(&test_cluster("fresh", true, true));
        env
    }

    fn copies(env: &TestEnv) -> Vec<&'static str> {
        ["a", "b", "paused", "off", "fresh"]
            .into_iter()
            .filter(|name| {
                env.api
                    .contains::<RuleGroup>(Some(format!("cluster-{name}").as_str()), "node-alerts")
            })
            .collect()
    }

    #[test]
    fn test_build_rule_group_copy() {
        let cluster = test_cluster("a", true, false);
        let copy = build_rule_group_copy(&template(DATA), &cluster, "cluster-a");
        assert_eq!(copy.namespace().as_deref(), Some("cluster-a"));
        assert_eq!(copy.cluster_name(), Some("a"));
        assert_eq!(copy.spec.cluster.kind.as_deref(), Some("Cluster"));
        assert_eq!(copy.spec.data.0, DATA.as_bytes());
    }

    #[tokio::test]
    async fn test_fan_out_reaches_exactly_eligible_clusters() {
        let env = fleet().await;
        let tmpl = template(DATA);
        env.api.insert(&tmpl);

        let reconciler = RuleGroupSyncReconciler::new(env.ctx.clone());
        reconciler.reconcile(&tmpl).await.unwrap();

        assert_eq!(copies(&env), vec!["a", "b"]);
        let stored: RuleGroup = env
            .api
            .get(Some(TEST_MLA_NAMESPACE), "node-alerts")
            .unwrap();
        assert!(stored
            .finalizers()
            .contains(&RULE_GROUP_SYNC_FINALIZER.to_string()));

        env.clear_mutations();
        reconciler.reconcile(&stored).await.unwrap();
        env.assert_no_mutations();
    }

    #[tokio::test]
    async fn test_fan_out_waits_for_cluster_adoption() {
        let env = fleet().await;
        let tmpl = template(DATA);
        env.api.insert(&tmpl);
        let reconciler = RuleGroupSyncReconciler::new(env.ctx.clone());

        reconciler.reconcile(&tmpl).await.unwrap();
        assert!(!env
            .api
            .contains::<RuleGroup>(Some("cluster-fresh"), "node-alerts"));

        env.api.insert(&adopted(env.cluster("fresh")));
        reconciler.reconcile(&tmpl).await.unwrap();
        assert!(env
            .api
            .contains::<RuleGroup>(Some("cluster-fresh"), "node-alerts"));
    }

    #[tokio::test]
    async fn test_template_change_updates_copies_and_keeps_finalizers() {
        let env = fleet().await;
        let tmpl = template(DATA);
        env.api.insert(&tmpl);
        let reconciler = RuleGroupSyncReconciler::new(env.ctx.clone());
        reconciler.reconcile(&tmpl).await.unwrap();

        let mut copy: RuleGroup = env.api.get(Some("cluster-a"), "node-alerts").unwrap();
        copy.metadata.finalizers = Some(vec![RULE_GROUP_FINALIZER.to_string()]);
        env.api.insert(&copy);

        let changed = "name: node-alerts\nrules:\n  - alert: X\n    expr: vector(1)\n";
        let mut stored: RuleGroup = env
            .api
            .get(Some(TEST_MLA_NAMESPACE), "node-alerts")
            .unwrap();
        stored.spec.data = ByteString(changed.as_bytes().to_vec());
        env.api.insert(&stored);
        reconciler.reconcile(&stored).await.unwrap();

        let copy: RuleGroup = env.api.get(Some("cluster-a"), "node-alerts").unwrap();
        assert_eq!(copy.spec.data.0, changed.as_bytes());
        assert!(copy.finalizers().contains(&RULE_GROUP_FINALIZER.to_string()));
    }

    #[tokio::test]
    async fn test_template_deletion_removes_only_copies() {
        let env = fleet().await;
        let tmpl = template(DATA);
        env.api.insert(&tmpl);
        let reconciler = RuleGroupSyncReconciler::new(env.ctx.clone());
        reconciler.reconcile(&tmpl).await.unwrap();

        let mut unrelated = template(DATA);
        unrelated.metadata.name = Some("team-alerts".to_string());
        unrelated.metadata.namespace = Some("cluster-a".to_string());
        env.api.insert(&unrelated);

        let stored = deleting(
            &env.api
                .get::<RuleGroup>(Some(TEST_MLA_NAMESPACE), "node-alerts")
                .unwrap(),
        );
        env.api.insert(&stored);
        reconciler.reconcile(&stored).await.unwrap();

        assert!(copies(&env).is_empty());
        assert!(env.api.contains::<RuleGroup>(Some("cluster-a"), "team-alerts"));
        assert!(!env
            .api
            .contains::<RuleGroup>(Some(TEST_MLA_NAMESPACE), "node-alerts"));
    }

    #[tokio::test]
    async fn test_non_templates_are_ignored() {
        let env = fleet().await;
        let mut rg = template(DATA);
        rg.metadata.namespace = Some("cluster-a".to_string());
        env.api.insert(&rg);

        RuleGroupSyncReconciler::new(env.ctx.clone())
            .reconcile(&rg)
            .await
            .unwrap();
        env.assert_no_mutations();
    }

    #[tokio::test]
    async fn test_cleanup_removes_copies_and_finalizers() {
        let env = fleet().await;
        let tmpl = template(DATA);
        env.api.insert(&tmpl);
        let reconciler = RuleGroupSyncReconciler::new(env.ctx.clone());
        reconciler.reconcile(&tmpl).await.unwrap();

        reconciler.cleanup().await.unwrap();

        assert!(copies(&env).is_empty());
        let stored: RuleGroup = env
            .api
            .get(Some(TEST_MLA_NAMESPACE), "node-alerts")
            .unwrap();
        assert!(stored.finalizers().is_empty());
    }
}

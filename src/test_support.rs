// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-process Kubernetes API server for reconciler tests.
//!
//! A `wiremock` server with a single stateful responder that understands the
//! subset of the API the controllers use: get, list, create, replace, JSON
//! merge patch (including `/status`) and delete, with finalizer-aware deletion
//! and `resourceVersion` conflicts. Every mutating call except event creation
//! is recorded so tests can assert idempotence.

use crate::cortex::fake::FakeCortex;
use crate::context::Context;
use crate::crd::{Cluster, ClusterAddress, ClusterSpec, ClusterStatus, MLASettings};
use crate::grafana::fake::FakeGrafana;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const TEST_MLA_NAMESPACE: &str = "mla";

/// Object key: (API prefix, plural, namespace, name).
type Key = (String, String, String, String);

#[derive(Default)]
struct ApiState {
    objects: BTreeMap<Key, Value>,
    mutations: Vec<String>,
    resource_version: u64,
    /// Plurals whose writes are answered with 500.
    failing_writes: BTreeSet<String>,
}

impl ApiState {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// A parsed API request path.
struct Target {
    prefix: String,
    namespace: Option<String>,
    plural: String,
    name: Option<String>,
    subresource: Option<String>,
}

impl Target {
    fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let (prefix, rest) = match segments.first()? {
            &"api" => (format!("/api/{}", segments.get(1)?), &segments[2..]),
            &"apis" => (
                format!("/apis/{}/{}", segments.get(1)?, segments.get(2)?),
                &segments[3..],
            ),
            _ => return None,
        };
        let (namespace, rest) = match rest {
            ["namespaces", ns, tail @ ..] if !tail.is_empty() => (Some((*ns).to_string()), tail),
            _ => (None, rest),
        };
        Some(Self {
            prefix,
            namespace,
            plural: (*rest.first()?).to_string(),
            name: rest.get(1).map(|s| (*s).to_string()),
            subresource: rest.get(2).map(|s| (*s).to_string()),
        })
    }

    fn key(&self, name: &str) -> Key {
        (
            self.prefix.clone(),
            self.plural.clone(),
            self.namespace.clone().unwrap_or_default(),
            name.to_string(),
        )
    }

    fn describe(&self, name: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{} {ns}/{name}", self.plural),
            None => format!("{} {name}", self.plural),
        }
    }
}

fn status_response(code: u16, reason: &str, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(code).set_body_json(json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code,
    }))
}

/// RFC 7386 JSON merge patch.
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn finalizers_of(obj: &Value) -> usize {
    obj.pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

fn is_deleting(obj: &Value) -> bool {
    obj.pointer("/metadata/deletionTimestamp")
        .is_some_and(|v| !v.is_null())
}

fn now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

struct Responder {
    state: Arc<Mutex<ApiState>>,
}

impl Responder {
    fn handle(&self, request: &Request) -> ResponseTemplate {
        let Some(target) = Target::parse(request.url.path()) else {
            return status_response(404, "NotFound", "unknown path");
        };
        let mut state = self.state.lock().expect("fake apiserver lock");
        let method = request.method.as_str();
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);

        if method != "GET" && target.plural != "events" {
            let name = target
                .name
                .clone()
                .or_else(|| {
                    body.pointer("/metadata/name")
                        .and_then(Value::as_str)
                        .map(String::from)
                })
                .unwrap_or_default();
            let sub = target
                .subresource
                .as_ref()
                .map(|s| format!("/{s}"))
                .unwrap_or_default();
            state
                .mutations
                .push(format!("{method} {}{sub}", target.describe(&name)));
            if state.failing_writes.contains(&target.plural) {
                return status_response(500, "InternalError", "injected write failure");
            }
        }

        match (method, target.name.clone()) {
            ("GET", Some(name)) => match state.objects.get(&target.key(&name)) {
                Some(obj) => ResponseTemplate::new(200).set_body_json(obj),
                None => status_response(404, "NotFound", &format!("{} not found", target.describe(&name))),
            },
            ("GET", None) => {
                let items: Vec<Value> = state
                    .objects
                    .iter()
                    .filter(|((prefix, plural, ns, _), _)| {
                        *prefix == target.prefix
                            && *plural == target.plural
                            && target.namespace.as_ref().is_none_or(|want| want == ns)
                    })
                    .map(|(_, obj)| obj.clone())
                    .collect();
                ResponseTemplate::new(200).set_body_json(json!({
                    "apiVersion": "v1",
                    "kind": "List",
                    "metadata": { "resourceVersion": state.resource_version.to_string() },
                    "items": items,
                }))
            }
            ("POST", None) => {
                let mut obj = body;
                let name = obj
                    .pointer("/metadata/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let key = target.key(&name);
                if state.objects.contains_key(&key) {
                    return status_response(
                        409,
                        "AlreadyExists",
                        &format!("{} already exists", target.describe(&name)),
                    );
                }
                let rv = state.next_resource_version();
                let meta = &mut obj["metadata"];
                if let Some(ns) = &target.namespace {
                    meta["namespace"] = json!(ns);
                }
                meta["resourceVersion"] = json!(rv);
                meta["uid"] = json!(format!("uid-{rv}"));
                meta["creationTimestamp"] = json!(now());
                state.objects.insert(key, obj.clone());
                ResponseTemplate::new(201).set_body_json(obj)
            }
            ("PUT", Some(name)) => {
                let key = target.key(&name);
                let Some(current) = state.objects.get(&key).cloned() else {
                    return status_response(404, "NotFound", &format!("{} not found", target.describe(&name)));
                };
                let sent_rv = body.pointer("/metadata/resourceVersion").cloned();
                if sent_rv.as_ref().is_some_and(|rv| {
                    !rv.is_null() && Some(rv) != current.pointer("/metadata/resourceVersion")
                }) {
                    return status_response(409, "Conflict", "the object has been modified");
                }
                let mut obj = if target.subresource.as_deref() == Some("status") {
                    let mut obj = current.clone();
                    obj["status"] = body.get("status").cloned().unwrap_or(Value::Null);
                    obj
                } else {
                    let mut obj = body;
                    if let Some(status) = current.get("status") {
                        obj["status"] = status.clone();
                    }
                    for field in ["uid", "creationTimestamp", "deletionTimestamp", "namespace"] {
                        if let Some(v) = current.pointer(&format!("/metadata/{field}")) {
                            obj["metadata"][field] = v.clone();
                        }
                    }
                    obj
                };
                obj["metadata"]["resourceVersion"] = json!(state.next_resource_version());
                state.objects.insert(key, obj.clone());
                ResponseTemplate::new(200).set_body_json(obj)
            }
            ("PATCH", Some(name)) => {
                let key = target.key(&name);
                let Some(mut obj) = state.objects.get(&key).cloned() else {
                    return status_response(404, "NotFound", &format!("{} not found", target.describe(&name)));
                };
                if let Some(rv) = body.pointer("/metadata/resourceVersion") {
                    if !rv.is_null() && Some(rv) != obj.pointer("/metadata/resourceVersion") {
                        return status_response(409, "Conflict", "the object has been modified");
                    }
                }
                if target.subresource.as_deref() == Some("status") {
                    if let Some(status) = body.get("status") {
                        merge_patch(&mut obj["status"], status);
                    }
                } else {
                    let mut patch = body;
                    if let Some(map) = patch.as_object_mut() {
                        map.remove("status");
                    }
                    merge_patch(&mut obj, &patch);
                }
                obj["metadata"]["resourceVersion"] = json!(state.next_resource_version());
                if is_deleting(&obj) && finalizers_of(&obj) == 0 {
                    state.objects.remove(&key);
                } else {
                    state.objects.insert(key, obj.clone());
                }
                ResponseTemplate::new(200).set_body_json(obj)
            }
            ("DELETE", Some(name)) => {
                let key = target.key(&name);
                let Some(mut obj) = state.objects.get(&key).cloned() else {
                    return status_response(404, "NotFound", &format!("{} not found", target.describe(&name)));
                };
                if finalizers_of(&obj) == 0 {
                    state.objects.remove(&key);
                    return ResponseTemplate::new(200).set_body_json(obj);
                }
                if !is_deleting(&obj) {
                    obj["metadata"]["deletionTimestamp"] = json!(now());
                    obj["metadata"]["resourceVersion"] = json!(state.next_resource_version());
                    state.objects.insert(key, obj.clone());
                }
                ResponseTemplate::new(200).set_body_json(obj)
            }
            _ => status_response(405, "MethodNotAllowed", "unsupported request"),
        }
    }
}

impl Respond for Responder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.handle(request)
    }
}

/// Fake Kubernetes API server.
pub struct FakeApiServer {
    server: MockServer,
    state: Arc<Mutex<ApiState>>,
}

impl FakeApiServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(Mutex::new(ApiState::default()));
        Mock::given(any())
            .respond_with(Responder {
                state: state.clone(),
            })
            .mount(&server)
            .await;
        Self { server, state }
    }

    pub fn client(&self) -> Client {
        crate::context::install_crypto_provider().expect("rustls crypto provider");
        let uri = self.server.uri().parse().expect("mock server uri");
        let config = kube::Config::new(uri);
        Client::try_from(config).expect("kube client")
    }

    fn key_of<K: Resource<DynamicType = ()>>(namespace: Option<&str>, name: &str) -> Key {
        let path = K::url_path(&(), namespace);
        let target = Target::parse(&format!("{path}/{name}")).expect("resource path");
        target.key(name)
    }

    /// Store `obj` as if it had been created by another actor.
    pub fn insert<K>(&self, obj: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let mut value = serde_json::to_value(obj).expect("serialize object");
        let mut state = self.state.lock().expect("fake apiserver lock");
        let rv = state.next_resource_version();
        value["metadata"]["resourceVersion"] = json!(rv);
        value["apiVersion"] = json!(K::api_version(&()));
        value["kind"] = json!(K::kind(&()));
        let key = Self::key_of::<K>(obj.meta().namespace.as_deref(), &obj.name_any());
        state.objects.insert(key, value);
    }

    pub fn get<K>(&self, namespace: Option<&str>, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let state = self.state.lock().expect("fake apiserver lock");
        state
            .objects
            .get(&Self::key_of::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).expect("deserialize object"))
    }

    pub fn contains<K>(&self, namespace: Option<&str>, name: &str) -> bool
    where
        K: Resource<DynamicType = ()>,
    {
        let state = self.state.lock().expect("fake apiserver lock");
        state
            .objects
            .contains_key(&Self::key_of::<K>(namespace, name))
    }

    /// Mutating requests so far, e.g. `PATCH clusters test/status`.
    pub fn mutations(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("fake apiserver lock")
            .mutations
            .clone()
    }

    pub fn clear_mutations(&self) {
        self.state
            .lock()
            .expect("fake apiserver lock")
            .mutations
            .clear();
    }

    /// Fail every write to resources of `plural`, e.g. `configmaps`.
    pub fn fail_writes(&self, plural: &str) {
        self.state
            .lock()
            .expect("fake apiserver lock")
            .failing_writes
            .insert(plural.to_string());
    }
}

/// Everything a reconciler test needs.
pub struct TestEnv {
    pub api: FakeApiServer,
    pub grafana: Arc<FakeGrafana>,
    pub cortex: Arc<FakeCortex>,
    pub ctx: Arc<Context>,
}

impl TestEnv {
    /// Fake API server, a Grafana holding the shared org with ID 7 and an
    /// empty Cortex.
    pub async fn new() -> Self {
        let api = FakeApiServer::start().await;
        let grafana = Arc::new(FakeGrafana::with_org(
            crate::constants::GRAFANA_ORG_NAME,
            7,
        ));
        let cortex = Arc::new(FakeCortex::new());
        let ctx = Arc::new(Context::new(
            api.client(),
            grafana.clone(),
            cortex.clone(),
            TEST_MLA_NAMESPACE,
            None,
        ));
        Self {
            api,
            grafana,
            cortex,
            ctx,
        }
    }

    /// Nothing mutating happened since the last `clear_mutations`.
    pub fn assert_no_mutations(&self) {
        assert_eq!(self.api.mutations(), Vec::<String>::new(), "kubernetes");
        assert_eq!(self.grafana.mutations(), Vec::<String>::new(), "grafana");
        assert_eq!(self.cortex.mutations(), Vec::<String>::new(), "cortex");
    }

    pub fn clear_mutations(&self) {
        self.api.clear_mutations();
        self.grafana.clear_mutations();
        self.cortex.clear_mutations();
    }

    /// Current server-side copy of cluster `name`.
    pub fn cluster(&self, name: &str) -> Cluster {
        self.api
            .get::<Cluster>(None, name)
            .expect("cluster exists")
    }
}

/// A provisioned cluster named `name` in namespace `cluster-{name}`.
pub fn test_cluster(name: &str, monitoring: bool, logging: bool) -> Cluster {
    let mut cluster = Cluster::new(
        name,
        ClusterSpec {
            human_readable_name: format!("{name} cluster"),
            mla: Some(MLASettings {
                monitoring_enabled: monitoring,
                logging_enabled: logging,
            }),
            ..Default::default()
        },
    );
    cluster.status = Some(ClusterStatus {
        namespace_name: format!("cluster-{name}"),
        address: Some(ClusterAddress {
            external_name: format!("{name}.example.com"),
        }),
        extended_health: None,
    });
    cluster
}

/// Mark `obj` as being deleted.
pub fn deleting<K: Resource + Serialize + DeserializeOwned>(obj: &K) -> K {
    let mut value = serde_json::to_value(obj).expect("serialize object");
    value["metadata"]["deletionTimestamp"] = json!("2025-01-01T00:00:00Z");
    serde_json::from_value(value).expect("deserialize object")
}

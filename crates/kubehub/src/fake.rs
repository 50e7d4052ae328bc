//! In-memory platform for tests: records every call, reports ready statuses
//! for whatever it stores, and can be told to fail.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use keel_core::{Kind, LiveObject, Manifest};
use serde_json::{json, Map, Value as Json};

use crate::{Platform, PlatformError, PlatformResult, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Create,
    Update,
    Patch,
    Delete,
    List,
}

impl Verb {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Verb::Create | Verb::Update | Verb::Patch | Verb::Delete)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub verb: Verb,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub api_version: String,
    pub body: Option<Json>,
}

type Key = (String, Option<String>, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Json>,
    calls: Vec<Call>,
    statuses: HashMap<(String, String), Json>,
    failures: HashMap<(Verb, String, String), String>,
    flaky_gets: HashMap<(String, String), u32>,
    delete_lag: u32,
    lingering: HashMap<Key, u32>,
    revision: u64,
}

pub struct FakePlatform {
    state: Mutex<State>,
    version: String,
    save_diffs: bool,
    cluster_kinds: HashSet<String>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// Status a healthy cluster would report for a freshly written object.
fn ready_status(kind: &Kind, obj: &Json) -> Option<Json> {
    let replicas = obj.pointer("/spec/replicas").and_then(Json::as_i64).unwrap_or(1).max(1);
    match kind {
        Kind::Deployment | Kind::StatefulSet => Some(json!({
            "replicas": replicas,
            "readyReplicas": replicas,
            "updatedReplicas": replicas,
        })),
        Kind::DaemonSet => Some(json!({ "desiredNumberScheduled": 1, "numberReady": 1 })),
        Kind::Namespace => Some(json!({ "phase": "Active" })),
        Kind::Job => Some(json!({ "conditions": [ { "type": "Complete", "status": "True" } ] })),
        Kind::Service => {
            let lb = obj.pointer("/spec/type").and_then(Json::as_str) == Some("LoadBalancer");
            Some(if lb {
                json!({ "loadBalancer": { "ingress": [ { "ip": "203.0.113.10" } ] } })
            } else {
                json!({ "loadBalancer": {} })
            })
        }
        _ => None,
    }
}

/// Strategic-merge approximation: objects merge recursively, arrays of named
/// objects merge by `name`, everything else is replaced.
pub fn merge(base: &mut Json, patch: &Json) {
    match (base, patch) {
        (Json::Object(b), Json::Object(p)) => {
            for (k, v) in p {
                if v.is_null() {
                    b.remove(k);
                    continue;
                }
                match b.get_mut(k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        b.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (Json::Array(b), Json::Array(p)) if p.iter().all(|i| i.get("name").is_some()) && !p.is_empty() => {
            for item in p {
                let name = item.get("name");
                match b.iter_mut().find(|e| e.get("name") == name) {
                    Some(existing) => merge(existing, item),
                    None => b.push(item.clone()),
                }
            }
        }
        (b, p) => *b = p.clone(),
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            version: "1.29".into(),
            save_diffs: false,
            cluster_kinds: HashSet::new(),
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_save_diffs(mut self, on: bool) -> Self {
        self.save_diffs = on;
        self
    }

    /// Treat a discovered kind as cluster-scoped: stored without a
    /// namespace, whatever the request carried.
    pub fn with_cluster_scoped(mut self, kind: &str) -> Self {
        self.cluster_kinds.insert(kind.to_string());
        self
    }

    fn cluster_scoped(&self, kind: &Kind) -> bool {
        kind.is_cluster_scoped() || self.cluster_kinds.contains(kind.as_str())
    }

    fn key(&self, target: &Target, name: &str) -> Key {
        let ns = if self.cluster_scoped(&target.kind) { None } else { target.namespace.clone() };
        (target.kind.as_str().to_string(), ns, name.to_string())
    }

    /// What the server stores: cluster-scoped objects lose their namespace.
    fn stored(&self, kind: &Kind, raw: &Json) -> Json {
        let mut obj = raw.clone();
        if self.cluster_scoped(kind) {
            if let Some(meta) = obj.get_mut("metadata").and_then(Json::as_object_mut) {
                meta.remove("namespace");
            }
        }
        obj
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store an object as if it already existed, statuses included.
    pub fn seed(&self, raw: Json) {
        let m = Manifest::new(raw);
        let kind = m.resolved_kind();
        let ns = if self.cluster_scoped(&kind) { None } else { Some(m.namespace().to_string()) };
        let mut obj = self.stored(&kind, &m.raw);
        let mut st = self.lock();
        st.revision += 1;
        let rv = st.revision.to_string();
        if let Some(meta) = obj.get_mut("metadata").and_then(Json::as_object_mut) {
            meta.insert("resourceVersion".into(), Json::String(rv));
        }
        if obj.get("status").is_none() {
            if let Some(status) = ready_status(&kind, &obj) {
                obj["status"] = status;
            }
        }
        st.objects.insert((kind.as_str().to_string(), ns, m.name().to_string()), obj);
    }

    /// Status reported for `kind/name` on every subsequent write.
    pub fn set_status(&self, kind: &str, name: &str, status: Json) {
        let mut st = self.lock();
        for ((k, _, n), obj) in st.objects.iter_mut() {
            if k == kind && n == name {
                obj["status"] = status.clone();
            }
        }
        st.statuses.insert((kind.to_string(), name.to_string()), status);
    }

    pub fn fail(&self, verb: Verb, kind: &str, name: &str, message: &str) {
        self.lock().failures.insert((verb, kind.to_string(), name.to_string()), message.to_string());
    }

    /// The next `times` gets of `kind/name` fail with a transient error.
    pub fn flaky_get(&self, kind: &str, name: &str, times: u32) {
        self.lock().flaky_gets.insert((kind.to_string(), name.to_string()), times);
    }

    /// Deleted objects stay visible as terminating for this many gets.
    pub fn set_delete_lag(&self, gets: u32) {
        self.lock().delete_lag = gets;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.verb.is_mutation()).collect()
    }

    pub fn calls_for(&self, verb: Verb, kind: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.verb == verb && c.kind == kind).collect()
    }

    pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<Json> {
        let k = (kind.to_string(), namespace.map(str::to_string), name.to_string());
        self.lock().objects.get(&k).cloned()
    }

    pub fn exists(&self, kind: &str, namespace: Option<&str>, name: &str) -> bool {
        self.object(kind, namespace, name).is_some()
    }

    fn record(st: &mut State, verb: Verb, target: &Target, name: &str, body: Option<&Json>) -> PlatformResult<()> {
        st.calls.push(Call {
            verb,
            kind: target.kind.as_str().to_string(),
            namespace: target.namespace.clone(),
            name: name.to_string(),
            api_version: target.api_version.clone(),
            body: body.cloned(),
        });
        match st.failures.get(&(verb, target.kind.as_str().to_string(), name.to_string())) {
            Some(msg) => Err(PlatformError::Api(msg.clone())),
            None => Ok(()),
        }
    }

    fn stamp(st: &mut State, kind: &Kind, name: &str, obj: &mut Json) {
        st.revision += 1;
        let meta = obj
            .as_object_mut()
            .map(|o| o.entry("metadata").or_insert_with(|| Json::Object(Map::new())));
        if let Some(Json::Object(meta)) = meta {
            meta.insert("resourceVersion".into(), Json::String(st.revision.to_string()));
        }
        let status = st
            .statuses
            .get(&(kind.as_str().to_string(), name.to_string()))
            .cloned()
            .or_else(|| ready_status(kind, obj));
        if let (Some(status), Some(o)) = (status, obj.as_object_mut()) {
            o.insert("status".into(), status);
        }
        if *kind == Kind::Service {
            let has_ip = obj.pointer("/spec/clusterIP").is_some();
            if !has_ip {
                if let Some(spec) = obj.get_mut("spec").and_then(Json::as_object_mut) {
                    spec.insert("clusterIP".into(), json!("10.96.0.10"));
                }
            }
        }
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn get(&self, target: &Target, name: &str) -> PlatformResult<LiveObject> {
        let mut st = self.lock();
        Self::record(&mut st, Verb::Get, target, name, None)?;
        let flaky = (target.kind.as_str().to_string(), name.to_string());
        if let Some(left) = st.flaky_gets.get_mut(&flaky) {
            if *left > 0 {
                *left -= 1;
                return Err(PlatformError::Api("connection reset".into()));
            }
        }
        let k = self.key(target, name);
        if let Some(left) = st.lingering.get_mut(&k) {
            if *left > 0 {
                *left -= 1;
                return Ok(LiveObject::new(json!({
                    "metadata": { "name": name, "deletionTimestamp": "2024-01-01T00:00:00Z" },
                    "status": { "phase": "Terminating" }
                })));
            }
            st.lingering.remove(&k);
        }
        st.objects.get(&k).cloned().map(LiveObject::new).ok_or(PlatformError::NotFound)
    }

    async fn create(&self, target: &Target, manifest: &Manifest) -> PlatformResult<LiveObject> {
        let mut st = self.lock();
        let name = manifest.name().to_string();
        Self::record(&mut st, Verb::Create, target, &name, Some(&manifest.raw))?;
        let k = self.key(target, &name);
        if st.objects.contains_key(&k) {
            return Err(PlatformError::Api(format!("{} {} already exists", target.kind, name)));
        }
        st.lingering.remove(&k);
        let mut obj = self.stored(&target.kind, &manifest.raw);
        Self::stamp(&mut st, &target.kind, &name, &mut obj);
        st.objects.insert(k, obj.clone());
        Ok(LiveObject::new(obj))
    }

    async fn update(&self, target: &Target, name: &str, manifest: &Manifest) -> PlatformResult<LiveObject> {
        let mut st = self.lock();
        Self::record(&mut st, Verb::Update, target, name, Some(&manifest.raw))?;
        let k = self.key(target, name);
        if !st.objects.contains_key(&k) {
            return Err(PlatformError::NotFound);
        }
        let mut obj = self.stored(&target.kind, &manifest.raw);
        Self::stamp(&mut st, &target.kind, name, &mut obj);
        st.objects.insert(k, obj.clone());
        Ok(LiveObject::new(obj))
    }

    async fn patch(&self, target: &Target, name: &str, diff: &Json) -> PlatformResult<LiveObject> {
        let mut st = self.lock();
        Self::record(&mut st, Verb::Patch, target, name, Some(diff))?;
        let k = self.key(target, name);
        let Some(mut obj) = st.objects.get(&k).cloned() else {
            return Err(PlatformError::NotFound);
        };
        merge(&mut obj, diff);
        Self::stamp(&mut st, &target.kind, name, &mut obj);
        st.objects.insert(k, obj.clone());
        Ok(LiveObject::new(obj))
    }

    async fn delete(&self, target: &Target, name: &str) -> PlatformResult<()> {
        let mut st = self.lock();
        Self::record(&mut st, Verb::Delete, target, name, None)?;
        let k = self.key(target, name);
        if st.objects.remove(&k).is_none() {
            return Err(PlatformError::NotFound);
        }
        let lag = st.delete_lag;
        if lag > 0 {
            st.lingering.insert(k, lag);
        }
        Ok(())
    }

    async fn list(&self, target: &Target) -> PlatformResult<Vec<LiveObject>> {
        let mut st = self.lock();
        Self::record(&mut st, Verb::List, target, "", None)?;
        let kind = target.kind.as_str();
        Ok(st
            .objects
            .iter()
            .filter(|((k, ns, _), _)| k == kind && (target.namespace.is_none() || *ns == target.namespace))
            .map(|(_, v)| LiveObject::new(v.clone()))
            .collect())
    }

    async fn version(&self) -> PlatformResult<String> {
        Ok(self.version.clone())
    }

    fn save_diffs(&self) -> bool {
        self.save_diffs
    }
}

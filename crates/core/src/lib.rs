//! Keel core types: manifests, resource kinds, the compiled cluster graph
//! and the error taxonomy shared by every crate.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

mod error;
mod graph;
mod kind;
mod settings;

pub use error::{KeelError, KeelResult};
pub use graph::{ClusterGraph, ServiceDescriptor, Workload};
pub use kind::Kind;
pub use settings::{DiffMode, Settings};

/// Namespace used when a manifest does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Namespaces that teardown never deletes.
pub const RESERVED_NAMESPACES: [&str; 3] = ["default", "kube-system", "kube-public"];

pub fn is_reserved(namespace: &str) -> bool {
    RESERVED_NAMESPACES.contains(&namespace)
}

/// `namespace.name`, the form used in every log line and error message.
pub fn qualified(namespace: &str, name: &str) -> String {
    format!("{}.{}", namespace, name)
}

/// A desired resource document produced by the spec compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    pub raw: Json,
}

impl Manifest {
    pub fn new(raw: Json) -> Self {
        Self { raw }
    }

    pub fn kind(&self) -> &str {
        self.raw.get("kind").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn api_version(&self) -> &str {
        self.raw.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.raw
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }

    /// Declared namespace, if any.
    pub fn declared_namespace(&self) -> Option<&str> {
        self.raw
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(|v| v.as_str())
    }

    pub fn namespace(&self) -> &str {
        self.declared_namespace().unwrap_or(DEFAULT_NAMESPACE)
    }

    pub fn qualified_name(&self) -> String {
        qualified(self.namespace(), self.name())
    }

    pub fn resolved_kind(&self) -> Kind {
        Kind::from_name(self.kind())
    }

    /// Copy of this manifest with `apiVersion` replaced.
    pub fn with_api_version(&self, api_version: &str) -> Manifest {
        let mut raw = self.raw.clone();
        if let Some(obj) = raw.as_object_mut() {
            obj.insert("apiVersion".into(), Json::String(api_version.to_string()));
        }
        Manifest { raw }
    }

    /// Copy with `metadata.namespace` set when the manifest declares none.
    pub fn with_default_namespace(&self, namespace: &str) -> Manifest {
        if self.declared_namespace().is_some() || self.resolved_kind().is_cluster_scoped() {
            return self.clone();
        }
        let mut raw = self.raw.clone();
        if let Some(obj) = raw.as_object_mut() {
            let meta = obj.entry("metadata").or_insert_with(|| Json::Object(Default::default()));
            if let Some(meta) = meta.as_object_mut() {
                meta.insert("namespace".into(), Json::String(namespace.to_string()));
            }
        }
        Manifest { raw }
    }

    /// Copy with `metadata.namespace` removed.
    pub fn without_namespace(&self) -> Manifest {
        let mut raw = self.raw.clone();
        if let Some(meta) = raw.get_mut("metadata").and_then(Json::as_object_mut) {
            meta.remove("namespace");
        }
        Manifest { raw }
    }

    /// Minimal `v1/Namespace` document.
    pub fn namespace_doc(name: &str) -> Manifest {
        Manifest::new(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name }
        }))
    }
}

impl From<Json> for Manifest {
    fn from(raw: Json) -> Self {
        Self { raw }
    }
}

/// The platform's current representation of a resource, `status` included.
/// Always fetched fresh; never cached between decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LiveObject {
    pub raw: Json,
}

impl LiveObject {
    pub fn new(raw: Json) -> Self {
        Self { raw }
    }

    pub fn status(&self) -> Option<&Json> {
        self.raw.get("status").filter(|s| !s.is_null())
    }

    pub fn name(&self) -> &str {
        self.raw
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }

    /// Empty for cluster-scoped objects.
    pub fn namespace(&self) -> Option<&str> {
        self.raw
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(|v| v.as_str())
            .filter(|ns| !ns.is_empty())
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.raw
            .get("metadata")
            .and_then(|m| m.get("resourceVersion"))
            .and_then(|v| v.as_str())
    }

    pub fn labels(&self) -> Option<&serde_json::Map<String, Json>> {
        self.raw
            .get("metadata")
            .and_then(|m| m.get("labels"))
            .and_then(|l| l.as_object())
    }

    /// True once the platform has started removing the object.
    pub fn is_terminating(&self) -> bool {
        let phase = self.status().and_then(|s| s.get("phase")).and_then(|p| p.as_str());
        let deleting = self
            .raw
            .get("metadata")
            .and_then(|m| m.get("deletionTimestamp"))
            .map(|t| !t.is_null())
            .unwrap_or(false);
        phase == Some("Terminating") || deleting
    }
}

/// Fields of a desired manifest whose values differ from the live object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diff {
    pub raw: Json,
}

impl Diff {
    pub fn empty() -> Self {
        Self { raw: Json::Object(serde_json::Map::new()) }
    }

    pub fn is_empty(&self) -> bool {
        match &self.raw {
            Json::Null => true,
            Json::Object(map) => map.is_empty(),
            Json::Array(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Value at a dotted path inside the diff, e.g. `spec.clusterIP`.
    pub fn at(&self, path: &str) -> Option<&Json> {
        path.split('.').try_fold(&self.raw, |cur, key| cur.get(key))
    }

    pub fn touches(&self, path: &str) -> bool {
        self.at(path).is_some()
    }
}

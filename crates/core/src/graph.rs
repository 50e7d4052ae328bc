use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as Json;

use crate::{KeelError, Kind, Manifest, DEFAULT_NAMESPACE};

/// The single workload a service bundle deploys.
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    Deployment(Manifest),
    DaemonSet(Manifest),
    StatefulSet(Manifest),
    Job(Manifest),
    CronJob(Manifest),
    /// Any other kind, routed through discovery.
    Manifest(Manifest),
}

impl Workload {
    pub fn manifest(&self) -> &Manifest {
        match self {
            Workload::Deployment(m)
            | Workload::DaemonSet(m)
            | Workload::StatefulSet(m)
            | Workload::Job(m)
            | Workload::CronJob(m)
            | Workload::Manifest(m) => m,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Workload::Deployment(_) => Kind::Deployment,
            Workload::DaemonSet(_) => Kind::DaemonSet,
            Workload::StatefulSet(_) => Kind::StatefulSet,
            Workload::Job(_) => Kind::Job,
            Workload::CronJob(_) => Kind::CronJob,
            Workload::Manifest(m) => m.resolved_kind(),
        }
    }

    /// Jobs and cron jobs, including ones carried as raw manifests.
    pub fn is_batch(&self) -> bool {
        self.kind().is_batch()
    }

    /// Descriptor key under which the workload lives in a graph.
    fn field(&self) -> &'static str {
        match self {
            Workload::Deployment(_) => "deployment",
            Workload::DaemonSet(_) => "daemonSet",
            Workload::StatefulSet(_) => "statefulSet",
            Workload::Job(_) => "job",
            Workload::CronJob(_) => "cronJob",
            Workload::Manifest(_) => "manifest",
        }
    }
}

const WORKLOAD_FIELDS: [&str; 6] = ["deployment", "daemonSet", "statefulSet", "job", "cronJob", "manifest"];

/// Resources making up one deployable unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceDescriptor {
    pub namespace: Option<String>,
    pub account: Option<Manifest>,
    pub role: Option<Manifest>,
    pub role_binding: Option<Manifest>,
    pub workload: Option<Workload>,
    pub services: Vec<Manifest>,
    pub network_policy: Option<Manifest>,
}

impl ServiceDescriptor {
    /// Explicit namespace, else the workload's, else `default`.
    pub fn namespace(&self) -> &str {
        if let Some(ns) = self.namespace.as_deref() {
            return ns;
        }
        [
            self.workload.as_ref().map(|w| w.manifest()),
            self.account.as_ref(),
            self.services.first(),
        ]
        .into_iter()
        .flatten()
        .find_map(|m| m.declared_namespace())
        .unwrap_or(DEFAULT_NAMESPACE)
    }
}

impl TryFrom<Json> for ServiceDescriptor {
    type Error = KeelError;

    fn try_from(value: Json) -> Result<Self, Self::Error> {
        let Json::Object(mut map) = value else {
            return Err(KeelError::GraphIntegrity("service descriptor must be an object".into()));
        };
        let take = |map: &mut serde_json::Map<String, Json>, key: &str| -> Option<Manifest> {
            map.remove(key).filter(|v| !v.is_null()).map(Manifest::new)
        };

        let mut workload = None;
        for field in WORKLOAD_FIELDS {
            let Some(m) = take(&mut map, field) else { continue };
            let w = match field {
                "deployment" => Workload::Deployment(m),
                "daemonSet" => Workload::DaemonSet(m),
                "statefulSet" => Workload::StatefulSet(m),
                "job" => Workload::Job(m),
                "cronJob" => Workload::CronJob(m),
                _ => Workload::Manifest(m),
            };
            if let Some(prev) = workload.as_ref().map(Workload::field) {
                return Err(KeelError::GraphIntegrity(format!(
                    "service declares both {} and {}",
                    prev,
                    w.field()
                )));
            }
            workload = Some(w);
        }

        let services = match map.remove("services") {
            None | Some(Json::Null) => Vec::new(),
            Some(Json::Array(items)) => items.into_iter().map(Manifest::new).collect(),
            Some(Json::Object(items)) => items.into_iter().map(|(_, v)| Manifest::new(v)).collect(),
            Some(other) => vec![Manifest::new(other)],
        };

        Ok(ServiceDescriptor {
            namespace: map.remove("namespace").and_then(|v| v.as_str().map(str::to_string)),
            account: take(&mut map, "account"),
            role: take(&mut map, "role"),
            role_binding: take(&mut map, "roleBinding"),
            workload,
            services,
            network_policy: take(&mut map, "networkPolicy"),
        })
    }
}

impl<'de> Deserialize<'de> for ServiceDescriptor {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = Json::deserialize(d)?;
        ServiceDescriptor::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for ServiceDescriptor {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = serde_json::Map::new();
        if let Some(ns) = &self.namespace {
            map.insert("namespace".into(), Json::String(ns.clone()));
        }
        let mut put = |key: &str, m: &Option<Manifest>| {
            if let Some(m) = m {
                map.insert(key.to_string(), m.raw.clone());
            }
        };
        put("account", &self.account);
        put("role", &self.role);
        put("roleBinding", &self.role_binding);
        put("networkPolicy", &self.network_policy);
        if let Some(w) = &self.workload {
            map.insert(w.field().to_string(), w.manifest().raw.clone());
        }
        if !self.services.is_empty() {
            map.insert(
                "services".into(),
                Json::Array(self.services.iter().map(|m| m.raw.clone()).collect()),
            );
        }
        Json::Object(map).serialize(s)
    }
}

/// Full desired state of a cluster as produced by the spec compiler.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterGraph {
    pub namespaces: Vec<String>,
    /// namespace -> secret name -> manifest
    pub image_pull_secrets: BTreeMap<String, BTreeMap<String, Manifest>>,
    pub configuration: Vec<Manifest>,
    pub secrets: Vec<Manifest>,
    pub resources: BTreeMap<String, ServiceDescriptor>,
    pub order: BTreeMap<String, Vec<String>>,
    #[serde(deserialize_with = "level_ids")]
    pub levels: Vec<String>,
}

impl ClusterGraph {
    /// Every name listed in `order` must resolve in `resources`.
    pub fn validate(&self) -> Result<(), KeelError> {
        for level in &self.levels {
            for service in self.order.get(level).into_iter().flatten() {
                if !self.resources.contains_key(service) {
                    return Err(KeelError::GraphIntegrity(format!(
                        "level {} references {} which does not exist",
                        level, service
                    )));
                }
            }
        }
        Ok(())
    }

    /// Services of a level in declared order. Unknown levels are empty.
    pub fn level(&self, level: &str) -> impl Iterator<Item = (&str, &ServiceDescriptor)> + '_ {
        self.order
            .get(level)
            .into_iter()
            .flatten()
            .filter_map(move |name| self.resources.get_key_value(name))
            .map(|(k, v)| (k.as_str(), v))
    }
}

fn level_id(v: Json) -> Option<String> {
    match v {
        Json::String(s) => Some(s),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn level_ids<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let raw = Vec::<Json>::deserialize(d)?;
    raw.into_iter()
        .map(|v| level_id(v).ok_or_else(|| serde::de::Error::custom("level must be a string or number")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_rejects_two_workloads() {
        let raw = json!({
            "deployment": { "kind": "Deployment", "metadata": { "name": "a" } },
            "job": { "kind": "Job", "metadata": { "name": "a" } }
        });
        let err = ServiceDescriptor::try_from(raw).unwrap_err();
        assert!(matches!(err, KeelError::GraphIntegrity(_)));
    }

    #[test]
    fn descriptor_namespace_from_workload() {
        let raw = json!({
            "deployment": { "kind": "Deployment", "metadata": { "name": "a", "namespace": "shop" } },
            "services": [ { "kind": "Service", "metadata": { "name": "a" } } ]
        });
        let sd = ServiceDescriptor::try_from(raw).unwrap();
        assert_eq!(sd.namespace(), "shop");
        assert_eq!(sd.services.len(), 1);
        assert_eq!(sd.workload.as_ref().map(|w| w.kind()), Some(Kind::Deployment));
    }

    #[test]
    fn graph_parses_numeric_levels_and_validates() {
        let raw = json!({
            "namespaces": ["shop"],
            "resources": {
                "web": { "deployment": { "kind": "Deployment", "metadata": { "name": "web", "namespace": "shop" } } }
            },
            "order": { "1": ["web"] },
            "levels": [1]
        });
        let graph: ClusterGraph = serde_json::from_value(raw).unwrap();
        assert_eq!(graph.levels, vec!["1".to_string()]);
        graph.validate().unwrap();
        assert_eq!(graph.level("1").count(), 1);

        let mut broken = graph.clone();
        broken.order.insert("1".into(), vec!["missing".into()]);
        assert!(broken.validate().is_err());
    }
}

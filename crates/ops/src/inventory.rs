//! Read-only cluster queries behind `keelctl ls`.

use keel_core::{KeelResult, Kind, LiveObject};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::Context;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub namespace: String,
    pub name: String,
    /// Assigned IPs or hostnames.
    pub ingress: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    pub kind: String,
    pub namespace: String,
    pub workload: String,
    pub container: String,
    pub image: String,
}

fn namespace_of(obj: &LiveObject) -> String {
    obj.raw
        .pointer("/metadata/namespace")
        .and_then(Json::as_str)
        .unwrap_or(keel_core::DEFAULT_NAMESPACE)
        .to_string()
}

pub async fn list_namespaces(ctx: &Context) -> KeelResult<Vec<String>> {
    let mut names: Vec<String> = ctx
        .controller(Kind::Namespace)
        .list(None)
        .await?
        .iter()
        .map(|ns| ns.name().to_string())
        .collect();
    names.sort();
    Ok(names)
}

/// Services with at least one ingress point assigned.
pub async fn load_balancers(ctx: &Context, namespace: Option<&str>) -> KeelResult<Vec<LoadBalancer>> {
    let services = ctx.controller(Kind::Service).list(namespace).await?;
    Ok(services
        .iter()
        .filter_map(|svc| {
            let ingress: Vec<String> = svc
                .raw
                .pointer("/status/loadBalancer/ingress")
                .and_then(Json::as_array)?
                .iter()
                .filter_map(|i| i.get("ip").or_else(|| i.get("hostname")).and_then(Json::as_str))
                .map(str::to_string)
                .collect();
            (!ingress.is_empty()).then(|| LoadBalancer {
                namespace: namespace_of(svc),
                name: svc.name().to_string(),
                ingress,
            })
        })
        .collect())
}

fn pod_spec_path(kind: &Kind) -> &'static str {
    match kind {
        Kind::CronJob => "/spec/jobTemplate/spec/template/spec/containers",
        _ => "/spec/template/spec/containers",
    }
}

/// Containers and images of every workload in `namespace` (all when `None`).
pub async fn containers(ctx: &Context, namespace: Option<&str>) -> KeelResult<Vec<ContainerImage>> {
    let mut out = Vec::new();
    for kind in [Kind::Deployment, Kind::DaemonSet, Kind::StatefulSet, Kind::CronJob] {
        for obj in ctx.controller(kind.clone()).list(namespace).await? {
            let Some(items) = obj.raw.pointer(pod_spec_path(&kind)).and_then(Json::as_array) else { continue };
            for c in items {
                out.push(ContainerImage {
                    kind: kind.to_string(),
                    namespace: namespace_of(&obj),
                    workload: obj.name().to_string(),
                    container: c.get("name").and_then(Json::as_str).unwrap_or_default().to_string(),
                    image: c.get("image").and_then(Json::as_str).unwrap_or_default().to_string(),
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::Settings;
    use keel_kubehub::fake::FakePlatform;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx() -> (Arc<FakePlatform>, Context) {
        let fake = Arc::new(FakePlatform::new());
        let ctx = Context::new(fake.clone(), Settings::fast());
        (fake, ctx)
    }

    #[tokio::test]
    async fn lists_namespaces_sorted() {
        let (fake, ctx) = ctx();
        for ns in ["shop", "billing"] {
            fake.seed(json!({ "kind": "Namespace", "metadata": { "name": ns } }));
        }
        assert_eq!(list_namespaces(&ctx).await.unwrap(), vec!["billing", "shop"]);
    }

    #[tokio::test]
    async fn only_services_with_ingress_are_load_balancers() {
        let (fake, ctx) = ctx();
        fake.seed(json!({
            "kind": "Service", "metadata": { "name": "edge", "namespace": "shop" },
            "spec": { "type": "LoadBalancer" }
        }));
        fake.seed(json!({
            "kind": "Service", "metadata": { "name": "internal", "namespace": "shop" },
            "spec": { "type": "ClusterIP" }
        }));
        let lbs = load_balancers(&ctx, Some("shop")).await.unwrap();
        assert_eq!(lbs.len(), 1);
        assert_eq!(lbs[0].name, "edge");
        assert_eq!(lbs[0].ingress, vec!["203.0.113.10".to_string()]);
    }

    #[tokio::test]
    async fn collects_workload_images() {
        let (fake, ctx) = ctx();
        fake.seed(json!({
            "kind": "Deployment", "metadata": { "name": "web", "namespace": "shop" },
            "spec": { "template": { "spec": { "containers": [ { "name": "web", "image": "web:3" } ] } } }
        }));
        fake.seed(json!({
            "kind": "CronJob", "metadata": { "name": "report", "namespace": "shop" },
            "spec": { "jobTemplate": { "spec": { "template": { "spec": { "containers": [ { "name": "r", "image": "report:1" } ] } } } } }
        }));
        let images = containers(&ctx, Some("shop")).await.unwrap();
        assert_eq!(images.len(), 2);
        assert!(images.iter().any(|c| c.kind == "CronJob" && c.image == "report:1"));
    }
}

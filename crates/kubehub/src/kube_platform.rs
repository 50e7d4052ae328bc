use async_trait::async_trait;
use keel_core::{LiveObject, Manifest};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    config::KubeConfigOptions,
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client, Config,
};
use metrics::counter;
use serde_json::Value as Json;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{groups::split_api_version, parse_version, Platform, PlatformError, PlatformResult, Target};

/// `Platform` backed by a live API server.
pub struct KubePlatform {
    client: Client,
    discovery: OnceCell<Discovery>,
    save_diffs: bool,
}

fn api_err(e: kube::Error) -> PlatformError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => PlatformError::NotFound,
        other => PlatformError::Api(other.to_string()),
    }
}

fn to_live(obj: DynamicObject) -> PlatformResult<LiveObject> {
    serde_json::to_value(&obj)
        .map(LiveObject::new)
        .map_err(|e| PlatformError::Api(format!("decoding response: {}", e)))
}

fn to_dynamic(raw: &Json) -> PlatformResult<DynamicObject> {
    serde_json::from_value(raw.clone()).map_err(|e| PlatformError::Api(format!("encoding manifest: {}", e)))
}

impl KubePlatform {
    pub fn new(client: Client) -> Self {
        Self { client, discovery: OnceCell::new(), save_diffs: false }
    }

    /// Connect with the default kubeconfig, or a named context of it.
    pub async fn connect(context: Option<&str>) -> PlatformResult<Self> {
        let client = match context {
            None => Client::try_default().await.map_err(api_err)?,
            Some(ctx) => {
                let options = KubeConfigOptions { context: Some(ctx.to_string()), ..Default::default() };
                let config = Config::from_kubeconfig(&options)
                    .await
                    .map_err(|e| PlatformError::Api(format!("loading kubeconfig context {}: {}", ctx, e)))?;
                Client::try_from(config).map_err(api_err)?
            }
        };
        info!(context = ?context, "platform client ready");
        Ok(Self::new(client))
    }

    pub fn with_save_diffs(mut self, on: bool) -> Self {
        self.save_diffs = on;
        self
    }

    async fn discovery(&self) -> PlatformResult<&Discovery> {
        self.discovery
            .get_or_try_init(|| async {
                debug!("running api discovery");
                Discovery::new(self.client.clone()).run().await.map_err(api_err)
            })
            .await
    }

    async fn resource(&self, target: &Target) -> PlatformResult<(ApiResource, bool)> {
        let (group, version) = split_api_version(&target.api_version);
        let gvk = GroupVersionKind::gvk(group, version, target.kind.as_str());
        if !target.is_dynamic() {
            let ar = ApiResource::from_gvk_with_plural(&gvk, &target.kind.plural());
            return Ok((ar, !target.kind.is_cluster_scoped()));
        }
        let discovery = self.discovery().await?;
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                    return Ok((ar, matches!(caps.scope, Scope::Namespaced)));
                }
            }
        }
        Err(PlatformError::Api(format!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind)))
    }

    async fn api(&self, target: &Target) -> PlatformResult<Api<DynamicObject>> {
        let (ar, namespaced) = self.resource(target).await?;
        Ok(match (namespaced, target.namespace.as_deref()) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        })
    }
}

#[async_trait]
impl Platform for KubePlatform {
    async fn get(&self, target: &Target, name: &str) -> PlatformResult<LiveObject> {
        let api = self.api(target).await?;
        to_live(api.get(name).await.map_err(api_err)?)
    }

    async fn create(&self, target: &Target, manifest: &Manifest) -> PlatformResult<LiveObject> {
        let api = self.api(target).await?;
        let obj = to_dynamic(&manifest.raw)?;
        counter!("platform_calls_total", 1u64, "verb" => "create");
        to_live(api.create(&PostParams::default(), &obj).await.map_err(api_err)?)
    }

    async fn update(&self, target: &Target, name: &str, manifest: &Manifest) -> PlatformResult<LiveObject> {
        let api = self.api(target).await?;
        let obj = to_dynamic(&manifest.raw)?;
        counter!("platform_calls_total", 1u64, "verb" => "update");
        to_live(api.replace(name, &PostParams::default(), &obj).await.map_err(api_err)?)
    }

    async fn patch(&self, target: &Target, name: &str, diff: &Json) -> PlatformResult<LiveObject> {
        let api = self.api(target).await?;
        let patch = if target.is_dynamic() { Patch::Merge(diff) } else { Patch::Strategic(diff) };
        counter!("platform_calls_total", 1u64, "verb" => "patch");
        to_live(api.patch(name, &PatchParams::default(), &patch).await.map_err(api_err)?)
    }

    async fn delete(&self, target: &Target, name: &str) -> PlatformResult<()> {
        let api = self.api(target).await?;
        counter!("platform_calls_total", 1u64, "verb" => "delete");
        api.delete(name, &DeleteParams::background()).await.map_err(api_err)?;
        Ok(())
    }

    async fn list(&self, target: &Target) -> PlatformResult<Vec<LiveObject>> {
        let api = self.api(target).await?;
        let list = api.list(&ListParams::default()).await.map_err(api_err)?;
        list.items.into_iter().map(to_live).collect()
    }

    async fn version(&self) -> PlatformResult<String> {
        let info = self.client.apiserver_version().await.map_err(api_err)?;
        let joined = format!("{}.{}", info.major, info.minor);
        match parse_version(&joined) {
            Some((major, minor)) => Ok(format!("{}.{}", major, minor)),
            None => Ok(info.git_version.trim_start_matches('v').to_string()),
        }
    }

    fn save_diffs(&self) -> bool {
        self.save_diffs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_from_status_code() {
        let e = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "deployments.apps \"web\" not found".into(),
            reason: "NotFound".into(),
            code: 404,
        });
        assert_eq!(api_err(e), PlatformError::NotFound);
        let e = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "forbidden".into(),
            reason: "Forbidden".into(),
            code: 403,
        });
        assert!(matches!(api_err(e), PlatformError::Api(m) if m.contains("forbidden")));
    }

    #[test]
    fn manifests_convert_to_dynamic_objects() {
        let raw = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "settings", "namespace": "shop" },
            "data": { "k": "v" }
        });
        let obj = to_dynamic(&raw).unwrap();
        assert_eq!(obj.metadata.name.as_deref(), Some("settings"));
        assert_eq!(obj.data["data"]["k"], "v");
    }
}

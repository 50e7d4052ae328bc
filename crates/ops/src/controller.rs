use std::fmt;
use std::time::Instant;

use keel_apply::{changed_paths, classify, image_patch, strip_noisy, Mutation};
use keel_core::{qualified, Diff, KeelError, KeelResult, Kind, LiveObject, Manifest};
use keel_kubehub::{resolve_api_version, PlatformError, Target};
use keel_persist::DiffRecord;
use metrics::{counter, histogram};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::readiness::{await_condition, Outcome};
use crate::Context;

/// What a reconcile ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    Unchanged,
    Patched,
    Replaced,
    Recreated,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Created => "create",
            Action::Unchanged => "none",
            Action::Patched => "patch",
            Action::Replaced => "replace",
            Action::Recreated => "recreate",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconciles one resource kind. Every kind shares this body; kind-specific
/// behaviour lives in the classifier, the readiness predicates and the
/// routing table.
pub struct ResourceController<'a> {
    ctx: &'a Context,
    kind: Kind,
    api_version: Option<String>,
}

impl<'a> ResourceController<'a> {
    pub(crate) fn new(ctx: &'a Context, kind: Kind, api_version: Option<String>) -> Self {
        Self { ctx, kind, api_version }
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    fn label(&self, namespace: &str, name: &str) -> String {
        if self.kind.is_cluster_scoped() {
            name.to_string()
        } else {
            qualified(namespace, name)
        }
    }

    fn err(&self, target: &str, action: &'static str, e: PlatformError) -> KeelError {
        KeelError::api(self.kind.as_str(), target, action, e)
    }

    async fn routed(&self, declared: &str) -> String {
        resolve_api_version(&self.kind, declared, self.ctx.platform_version().await)
    }

    /// Desired manifest as it is sent: routed `apiVersion`, explicit kind.
    async fn prepare(&self, desired: &Manifest) -> Manifest {
        let routed = self.routed(desired.api_version()).await;
        if routed == desired.api_version() {
            desired.clone()
        } else {
            debug!(kind = %self.kind, from = %desired.api_version(), to = %routed, "apiVersion routed");
            desired.with_api_version(&routed)
        }
    }

    fn target(&self, manifest: &Manifest) -> Target {
        Target::new(self.kind.clone(), manifest.api_version(), Some(manifest.namespace()))
    }

    async fn named_target(&self, namespace: Option<&str>) -> KeelResult<Target> {
        let Some(declared) = self.api_version.as_deref() else {
            return Err(KeelError::api(self.kind.as_str(), namespace.unwrap_or(""), "resolve", "unknown apiVersion"));
        };
        let api_version = self.routed(declared).await;
        Ok(Target::new(self.kind.clone(), api_version, namespace))
    }

    async fn wait(&self, target: &Target, name: &str, label: &str, outcome: Outcome) -> KeelResult<Option<LiveObject>> {
        let platform = self.ctx.platform();
        await_condition(&self.ctx.backoff(), &self.kind, label, outcome, || platform.get(target, name)).await
    }

    /// Bring the live object in line with `desired`.
    pub async fn reconcile(&self, desired: &Manifest) -> KeelResult<Action> {
        let t0 = Instant::now();
        let desired = self.prepare(desired).await;
        let res = self.converge(&desired).await;
        let kind = self.kind.as_str().to_string();
        match &res {
            Ok(action) => {
                counter!("reconcile_total", 1u64, "kind" => kind, "action" => action.as_str());
                histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
            }
            Err(e) => {
                counter!("reconcile_err_total", 1u64, "kind" => kind);
                warn!(kind = %self.kind, name = %desired.qualified_name(), error = %e, "reconcile failed");
            }
        }
        res
    }

    async fn converge(&self, desired: &Manifest) -> KeelResult<Action> {
        let target = self.target(desired);
        let name = desired.name();
        let label = self.label(desired.namespace(), name);
        let live = match self.ctx.platform().get(&target, name).await {
            Ok(live) => live,
            Err(PlatformError::NotFound) => {
                self.create(&target, desired, &label).await?;
                return Ok(Action::Created);
            }
            Err(e) => return Err(self.err(&label, "get", e)),
        };

        // Cluster-scoped objects come back without a namespace; compare
        // without it.
        let scoped;
        let desired = if live.namespace().is_none() && desired.declared_namespace().is_some() {
            scoped = desired.without_namespace();
            &scoped
        } else {
            desired
        };
        let diff = keel_apply::diff(&live.raw, &desired.raw, self.ctx.settings().diff_mode);
        let mutation = classify(&diff, &self.kind, desired);
        if mutation != Mutation::None {
            info!(kind = %self.kind, name = %label, mutation = %mutation, changed = ?changed_paths(&diff), "drift detected");
        }
        match mutation {
            Mutation::None => {
                debug!(kind = %self.kind, name = %label, "up to date");
                Ok(Action::Unchanged)
            }
            Mutation::Patch => {
                self.save_diff(&live, desired, &diff).await;
                self.ctx.platform().patch(&target, name, &diff.raw).await.map_err(|e| self.err(&label, "patch", e))?;
                self.wait(&target, name, &label, Outcome::Updated).await?;
                Ok(Action::Patched)
            }
            Mutation::Replace => {
                let doc = replacement(&self.kind, &live, desired);
                self.save_diff(&live, desired, &diff).await;
                self.ctx.platform().update(&target, name, &doc).await.map_err(|e| self.err(&label, "update", e))?;
                self.wait(&target, name, &label, Outcome::Updated).await?;
                Ok(Action::Replaced)
            }
            Mutation::Recreate => {
                self.remove(&target, name, &label).await?;
                self.create(&target, desired, &label).await?;
                Ok(Action::Recreated)
            }
        }
    }

    async fn create(&self, target: &Target, desired: &Manifest, label: &str) -> KeelResult<()> {
        info!(kind = %self.kind, name = %label, "creating");
        self.ctx.platform().create(target, desired).await.map_err(|e| self.err(label, "create", e))?;
        self.wait(target, desired.name(), label, Outcome::Creation).await?;
        Ok(())
    }

    /// Delete an object known to exist and wait until it is gone.
    async fn remove(&self, target: &Target, name: &str, label: &str) -> KeelResult<()> {
        info!(kind = %self.kind, name = %label, "deleting");
        match self.ctx.platform().delete(target, name).await {
            Ok(()) | Err(PlatformError::NotFound) => {}
            Err(e) => return Err(self.err(label, "delete", e)),
        }
        self.wait(target, name, label, Outcome::Deletion).await?;
        Ok(())
    }

    /// Stores are synchronous; the write runs on the blocking pool so
    /// concurrent chains keep moving.
    async fn save_diff(&self, live: &LiveObject, desired: &Manifest, diff: &Diff) {
        let Some(store) = self.ctx.diff_store() else { return };
        let record = DiffRecord {
            namespace: desired.namespace().to_string(),
            name: desired.name().to_string(),
            original: strip_noisy(live.raw.clone()),
            source: desired.raw.clone(),
            diff: diff.raw.clone(),
        };
        let saved = tokio::task::spawn_blocking(move || store.save(&record)).await;
        let failure = match saved {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        warn!(kind = %self.kind, name = %desired.qualified_name(), error = %failure, "saving diff failed");
    }

    /// Delete the object a manifest describes. Returns whether anything was
    /// deleted; a missing object is not an error.
    pub async fn delete(&self, manifest: &Manifest) -> KeelResult<bool> {
        let manifest = self.prepare(manifest).await;
        let target = self.target(&manifest);
        self.delete_target(&target, manifest.namespace(), manifest.name()).await
    }

    /// Delete by name, addressed through the controller's `apiVersion`.
    pub async fn delete_named(&self, namespace: Option<&str>, name: &str) -> KeelResult<bool> {
        let target = self.named_target(namespace).await?;
        self.delete_target(&target, namespace.unwrap_or(keel_core::DEFAULT_NAMESPACE), name).await
    }

    async fn delete_target(&self, target: &Target, namespace: &str, name: &str) -> KeelResult<bool> {
        let label = self.label(namespace, name);
        match self.ctx.platform().get(target, name).await {
            Err(PlatformError::NotFound) => {
                debug!(kind = %self.kind, name = %label, "already absent");
                Ok(false)
            }
            Err(e) => Err(self.err(&label, "get", e)),
            Ok(_) => {
                self.remove(target, name, &label).await?;
                counter!("reconcile_total", 1u64, "kind" => self.kind.as_str().to_string(), "action" => "delete");
                Ok(true)
            }
        }
    }

    pub async fn list(&self, namespace: Option<&str>) -> KeelResult<Vec<LiveObject>> {
        let target = self.named_target(namespace).await?;
        self.ctx
            .platform()
            .list(&target)
            .await
            .map_err(|e| self.err(namespace.unwrap_or("*"), "list", e))
    }

    /// Swap one container's image and wait for the rollout.
    pub async fn upgrade(&self, namespace: &str, name: &str, container: &str, image: &str) -> KeelResult<()> {
        let label = self.label(namespace, name);
        if !matches!(self.kind, Kind::Deployment | Kind::DaemonSet | Kind::StatefulSet) {
            return Err(KeelError::api(self.kind.as_str(), label, "upgrade", "kind has no pod template to upgrade"));
        }
        let target = self.named_target(Some(namespace)).await?;
        info!(kind = %self.kind, name = %label, container, image, "upgrading image");
        let patch = image_patch(container, image);
        self.ctx.platform().patch(&target, name, &patch).await.map_err(|e| self.err(&label, "upgrade", e))?;
        self.wait(&target, name, &label, Outcome::Updated).await?;
        Ok(())
    }

    /// Delete any existing instance, create it fresh and, for a job, wait
    /// until it completes.
    pub async fn force_run(&self, desired: &Manifest) -> KeelResult<()> {
        let desired = self.prepare(desired).await;
        let target = self.target(&desired);
        let label = self.label(desired.namespace(), desired.name());
        self.delete_target(&target, desired.namespace(), desired.name()).await?;
        self.create(&target, &desired, &label).await?;
        if self.kind == Kind::Job {
            info!(name = %label, "waiting for job completion");
            self.wait(&target, desired.name(), &label, Outcome::Completion).await?;
        }
        Ok(())
    }
}

/// Full document for an update: the desired manifest plus the live fields a
/// replace must carry over.
fn replacement(kind: &Kind, live: &LiveObject, desired: &Manifest) -> Manifest {
    let mut raw = desired.raw.clone();
    if let Some(rv) = live.resource_version() {
        if let Some(meta) = raw.get_mut("metadata").and_then(Json::as_object_mut) {
            meta.insert("resourceVersion".into(), Json::String(rv.to_string()));
        }
    }
    if *kind == Kind::Service && raw.pointer("/spec/clusterIP").is_none() {
        if let (Some(ip), Some(spec)) = (
            live.raw.pointer("/spec/clusterIP").cloned(),
            raw.get_mut("spec").and_then(Json::as_object_mut),
        ) {
            spec.insert("clusterIP".into(), ip);
        }
    }
    Manifest::new(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replacement_carries_version_and_cluster_ip() {
        let live = LiveObject::new(json!({
            "metadata": { "name": "web", "resourceVersion": "7" },
            "spec": { "clusterIP": "10.0.0.3", "ports": [ { "port": 80 } ] }
        }));
        let desired = Manifest::new(json!({
            "kind": "Service",
            "metadata": { "name": "web" },
            "spec": { "ports": [ { "port": 81 } ] }
        }));
        let doc = replacement(&Kind::Service, &live, &desired);
        assert_eq!(doc.raw["metadata"]["resourceVersion"], "7");
        assert_eq!(doc.raw["spec"]["clusterIP"], "10.0.0.3");
        assert_eq!(doc.raw["spec"]["ports"][0]["port"], 81);
    }
}

//! Keel ops: per-kind resource controllers built from the differencer,
//! the mutation classifier and the readiness poller.

#![forbid(unsafe_code)]

use std::sync::Arc;

use keel_core::{Kind, Manifest, Settings};
use keel_kubehub::Platform;
use keel_persist::{DiffStore, FsDiffStore};
use tokio::sync::OnceCell;
use tracing::{info, warn};

mod controller;
pub mod inventory;
mod namespace;
pub mod poll;
pub mod readiness;

pub use controller::{Action, ResourceController};
pub use namespace::repair_namespace_labels;
pub use poll::Backoff;
pub use readiness::{await_condition, check, Check, Outcome};

/// Everything a controller needs: the platform client, settings and the
/// diff sink. Shared by reference across every concurrent chain.
pub struct Context {
    platform: Arc<dyn Platform>,
    settings: Settings,
    diffs: Arc<dyn DiffStore>,
    version: OnceCell<Option<String>>,
}

impl Context {
    pub fn new(platform: Arc<dyn Platform>, settings: Settings) -> Self {
        let diffs: Arc<dyn DiffStore> = Arc::new(FsDiffStore::new(settings.diff_dir.clone()));
        Self { platform, settings, diffs, version: OnceCell::new() }
    }

    pub fn with_diff_store(mut self, store: Arc<dyn DiffStore>) -> Self {
        self.diffs = store;
        self
    }

    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::from(&self.settings)
    }

    pub(crate) fn diff_store(&self) -> Option<Arc<dyn DiffStore>> {
        (self.settings.save_diffs || self.platform.save_diffs()).then(|| self.diffs.clone())
    }

    /// Configured platform version, else the one reported by the API server.
    /// Detection failures fall back to each manifest's own `apiVersion`.
    pub async fn platform_version(&self) -> Option<&str> {
        self.version
            .get_or_init(|| async {
                if let Some(v) = self.settings.platform_version.clone() {
                    return Some(v);
                }
                match self.platform.version().await {
                    Ok(v) => {
                        info!(version = %v, "platform version detected");
                        Some(v)
                    }
                    Err(e) => {
                        warn!(error = %e, "platform version detection failed; using manifest apiVersions");
                        None
                    }
                }
            })
            .await
            .as_deref()
    }

    /// Controller for a kind, addressed by its stable `apiVersion`.
    pub fn controller(&self, kind: Kind) -> ResourceController<'_> {
        let api_version = kind.default_api_version().map(str::to_string);
        ResourceController::new(self, kind, api_version)
    }

    /// Controller for the kind a manifest declares.
    pub fn controller_for(&self, manifest: &Manifest) -> ResourceController<'_> {
        ResourceController::new(self, manifest.resolved_kind(), Some(manifest.api_version().to_string()))
    }
}

//! Keel kubehub: the platform client seam. One uniform capability set
//! (get, create, update, patch, delete, list) over every resource kind.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use keel_core::{Kind, LiveObject, Manifest};
use serde_json::Value as Json;
use thiserror::Error;

pub mod fake;
mod groups;
mod kube_platform;

pub use groups::{api_group, parse_version, resolve_api_version, split_api_version};
pub use kube_platform::KubePlatform;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlatformError {
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Api(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound)
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Where a call lands: resource type plus namespace for namespaced kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub api_version: String,
    pub kind: Kind,
    pub namespace: Option<String>,
}

impl Target {
    pub fn new(kind: Kind, api_version: impl Into<String>, namespace: Option<&str>) -> Self {
        let namespace = if kind.is_cluster_scoped() { None } else { namespace.map(str::to_string) };
        Self { api_version: api_version.into(), kind, namespace }
    }

    /// Kinds without a fixed route are resolved through discovery.
    pub fn is_dynamic(&self) -> bool {
        matches!(self.kind, Kind::Other(_))
    }
}

#[async_trait]
pub trait Platform: Send + Sync {
    async fn get(&self, target: &Target, name: &str) -> PlatformResult<LiveObject>;
    async fn create(&self, target: &Target, manifest: &Manifest) -> PlatformResult<LiveObject>;
    /// Full-document replace.
    async fn update(&self, target: &Target, name: &str, manifest: &Manifest) -> PlatformResult<LiveObject>;
    /// Partial merge.
    async fn patch(&self, target: &Target, name: &str, diff: &Json) -> PlatformResult<LiveObject>;
    async fn delete(&self, target: &Target, name: &str) -> PlatformResult<()>;
    async fn list(&self, target: &Target) -> PlatformResult<Vec<LiveObject>>;
    /// `major.minor` of the API server.
    async fn version(&self) -> PlatformResult<String>;
    /// Client-wide switch for diff persistence.
    fn save_diffs(&self) -> bool {
        false
    }
}

//! Mutation classification: how a non-empty diff may be applied to a kind.

use std::fmt;

use keel_core::{Diff, Kind, Manifest};
use serde_json::{json, Value as Json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    None,
    /// Partial merge with the diff.
    Patch,
    /// Full-document update with the desired manifest.
    Replace,
    /// Delete, then create.
    Recreate,
}

impl Mutation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mutation::None => "none",
            Mutation::Patch => "patch",
            Mutation::Replace => "replace",
            Mutation::Recreate => "recreate",
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container fields a merge patch cannot shrink.
const REPLACE_ONLY_CONTAINER_FIELDS: [&str; 4] = ["ports", "env", "command", "args"];

pub fn classify(diff: &Diff, kind: &Kind, desired: &Manifest) -> Mutation {
    if diff.is_empty() {
        return Mutation::None;
    }
    if diff.touches("kind") || diff.touches("apiVersion") {
        return Mutation::Recreate;
    }
    match kind {
        Kind::Service if diff.touches("spec.clusterIP") || diff.touches("spec.selector") => Mutation::Recreate,
        Kind::Service => Mutation::Replace,
        Kind::Deployment | Kind::DaemonSet | Kind::StatefulSet if diff.touches("spec.selector") => {
            Mutation::Recreate
        }
        Kind::Job | Kind::CronJob => {
            if is_backoff_only(diff, desired) {
                Mutation::Patch
            } else {
                Mutation::Recreate
            }
        }
        _ if touches_container_fields(diff) => Mutation::Replace,
        _ => Mutation::Patch,
    }
}

fn touches_container_fields(diff: &Diff) -> bool {
    ["spec.template.spec.containers", "spec.template.spec.initContainers"]
        .iter()
        .filter_map(|path| diff.at(path).and_then(Json::as_array))
        .flatten()
        .any(|c| REPLACE_ONLY_CONTAINER_FIELDS.iter().any(|f| c.get(f).is_some()))
}

/// True when the diff changes nothing but the job's backoff limit. The limit
/// is looked up at `spec.template.spec.backoffLimit` and at `spec.backoffLimit`.
pub fn is_backoff_only(diff: &Diff, desired: &Manifest) -> bool {
    if diff.is_empty() {
        return false;
    }
    let spec = desired.raw.get("spec");
    let templated = spec
        .and_then(|s| s.get("template"))
        .and_then(|t| t.get("spec"))
        .and_then(|s| s.get("backoffLimit"))
        .filter(|v| !v.is_null());
    if let Some(limit) = templated {
        if diff.raw == json!({ "spec": { "template": { "spec": { "backoffLimit": limit } } } }) {
            return true;
        }
    }
    match spec.and_then(|s| s.get("backoffLimit")).filter(|v| !v.is_null()) {
        Some(limit) => diff.raw == json!({ "spec": { "backoffLimit": limit } }),
        None => false,
    }
}

/// Partial update that swaps one container's image.
pub fn image_patch(container: &str, image: &str) -> Json {
    json!({
        "spec": { "template": { "spec": { "containers": [
            { "name": container, "image": image }
        ] } } }
    })
}

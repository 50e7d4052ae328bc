//! Keel apply: the differencer and mutation classifier that decide how a live
//! object converges on its manifest.

#![forbid(unsafe_code)]

mod classify;
mod diff;
mod quantity;

pub use classify::{classify, image_patch, is_backoff_only, Mutation};
pub use diff::{changed_paths, complex_diff, diff, simple_diff};
pub use quantity::scalar_eq;

use serde_json::Value as Json;

/// Drop server-owned bookkeeping before a live object is persisted or
/// replaced wholesale.
pub fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(Json::as_object_mut) {
        meta.remove("managedFields");
        meta.remove("generation");
        meta.remove("creationTimestamp");
        meta.remove("uid");
        meta.remove("selfLink");
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

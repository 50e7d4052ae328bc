use keel_core::{KeelError, KeelResult, Kind};
use keel_kubehub::Target;
use serde_json::json;
use tracing::info;

use crate::Context;

/// Make sure every namespace carries a `name` label equal to its name, so
/// network policies can select namespaces by name. Returns how many were
/// patched.
pub async fn repair_namespace_labels(ctx: &Context) -> KeelResult<usize> {
    let namespaces = ctx.controller(Kind::Namespace).list(None).await?;
    let target = Target::new(Kind::Namespace, "v1", None);
    let mut repaired = 0;
    for ns in namespaces {
        let name = ns.name();
        let labelled = ns.labels().and_then(|l| l.get("name")).and_then(|v| v.as_str()) == Some(name);
        if labelled || name.is_empty() {
            continue;
        }
        let patch = json!({ "metadata": { "labels": { "name": name } } });
        ctx.platform()
            .patch(&target, name, &patch)
            .await
            .map_err(|e| KeelError::api("Namespace", name, "label", e))?;
        info!(ns = %name, "namespace label repaired");
        repaired += 1;
    }
    Ok(repaired)
}

use keel_core::{ClusterGraph, KeelError, KeelResult, ServiceDescriptor, Workload};
use keel_ops::{repair_namespace_labels, Context};
use tracing::info;

use crate::orchestrator::{apply, create_configuration, create_namespace, create_pull_secrets};

/// Find the batch workload registered as `job.namespace`. Never touches the
/// platform.
pub fn locate<'g>(graph: &'g ClusterGraph, namespace: &str, job: &str) -> KeelResult<(&'g ServiceDescriptor, &'g Workload)> {
    if namespace.is_empty() || job.is_empty() {
        return Err(KeelError::GraphIntegrity(format!(
            "job '{}' must be qualified as namespace.job",
            if job.is_empty() { namespace } else { job }
        )));
    }
    let key = format!("{}.{}", job, namespace);
    let sd = graph
        .resources
        .get(&key)
        .ok_or_else(|| KeelError::GraphIntegrity(format!("job {} does not exist in namespace {}", job, namespace)))?;
    match &sd.workload {
        Some(w) if w.is_batch() => Ok((sd, w)),
        _ => Err(KeelError::GraphIntegrity(format!("{} is not a job or cron job", key))),
    }
}

async fn prerequisites(ctx: &Context, graph: &ClusterGraph, namespace: &str, sd: &ServiceDescriptor) -> KeelResult<()> {
    create_namespace(ctx, namespace).await?;
    repair_namespace_labels(ctx).await?;
    create_configuration(ctx, graph, Some(namespace)).await?;
    create_pull_secrets(ctx, graph, Some(namespace)).await?;
    if let Some(account) = &sd.account {
        apply(ctx, account, namespace).await?;
    }
    if let Some(policy) = &sd.network_policy {
        apply(ctx, policy, namespace).await?;
    }
    Ok(())
}

/// Make sure the job's surroundings exist, then delete any previous run and
/// start a fresh one, waiting for completion of a plain job.
pub async fn run_job(ctx: &Context, graph: &ClusterGraph, namespace: &str, job: &str) -> KeelResult<()> {
    let (sd, workload) = locate(graph, namespace, job)?;
    prerequisites(ctx, graph, namespace, sd).await.map_err(|e| KeelError::JobPrerequisite {
        job: job.to_string(),
        namespace: namespace.to_string(),
        source: Box::new(e),
    })?;
    info!(job, ns = %namespace, kind = %workload.kind(), "running job");
    let manifest = workload.manifest().with_default_namespace(namespace);
    ctx.controller(workload.kind()).force_run(&manifest).await?;
    info!(job, ns = %namespace, "job finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph() -> ClusterGraph {
        serde_json::from_value(json!({
            "resources": {
                "migrate.shop": {
                    "job": { "apiVersion": "batch/v1", "kind": "Job", "metadata": { "name": "migrate", "namespace": "shop" } }
                },
                "web.shop": {
                    "deployment": { "apiVersion": "apps/v1", "kind": "Deployment", "metadata": { "name": "web", "namespace": "shop" } }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn locates_batch_workloads_only() {
        let g = graph();
        let (_, w) = locate(&g, "shop", "migrate").unwrap();
        assert!(w.is_batch());
        assert!(matches!(locate(&g, "shop", "web"), Err(KeelError::GraphIntegrity(_))));
        assert!(matches!(locate(&g, "shop", "seed"), Err(KeelError::GraphIntegrity(_))));
    }

    #[test]
    fn unqualified_job_names_are_rejected() {
        let g = graph();
        let err = locate(&g, "", "migrate").unwrap_err();
        assert!(err.to_string().contains("namespace.job"));
    }
}

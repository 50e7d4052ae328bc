//! Level-by-level deploy and teardown of a cluster graph.

use std::time::Instant;

use futures::future::{join_all, try_join_all};
use keel_core::{is_reserved, ClusterGraph, KeelError, KeelResult, Kind, Manifest, ServiceDescriptor, Workload};
use keel_ops::{repair_namespace_labels, Action, Context};
use metrics::histogram;
use tracing::{debug, error, info};

/// Reconcile one manifest, filling in the owning namespace where the
/// manifest leaves it out.
pub(crate) async fn apply(ctx: &Context, manifest: &Manifest, namespace: &str) -> KeelResult<Action> {
    let manifest = manifest.with_default_namespace(namespace);
    ctx.controller_for(&manifest).reconcile(&manifest).await
}

async fn apply_workload(ctx: &Context, workload: &Workload, namespace: &str) -> KeelResult<Action> {
    let manifest = workload.manifest().with_default_namespace(namespace);
    ctx.controller(workload.kind()).reconcile(&manifest).await
}

async fn remove(ctx: &Context, manifest: &Manifest, namespace: &str) -> KeelResult<bool> {
    let manifest = manifest.with_default_namespace(namespace);
    ctx.controller_for(&manifest).delete(&manifest).await
}

pub(crate) async fn create_namespace(ctx: &Context, namespace: &str) -> KeelResult<Action> {
    info!(ns = %namespace, "creating namespace");
    ctx.controller(Kind::Namespace).reconcile(&Manifest::namespace_doc(namespace)).await
}

/// Pull secrets of one namespace, or of every namespace when `None`.
pub(crate) async fn create_pull_secrets(ctx: &Context, graph: &ClusterGraph, only: Option<&str>) -> KeelResult<()> {
    let secrets = graph
        .image_pull_secrets
        .iter()
        .filter(|(ns, _)| only.map_or(true, |o| o == ns.as_str()))
        .flat_map(move |(ns, by_name)| by_name.values().map(move |m| apply(ctx, m, ns)));
    try_join_all(secrets).await?;
    Ok(())
}

/// Configuration maps and secrets, optionally confined to one namespace.
pub(crate) async fn create_configuration(ctx: &Context, graph: &ClusterGraph, only: Option<&str>) -> KeelResult<()> {
    let docs = graph
        .configuration
        .iter()
        .chain(graph.secrets.iter())
        .filter(|m| only.map_or(true, |o| m.namespace() == o))
        .map(|m| {
            debug!(kind = %m.kind(), name = %m.qualified_name(), "creating configuration");
            apply(ctx, m, m.namespace())
        });
    try_join_all(docs).await?;
    Ok(())
}

async fn deploy_service(ctx: &Context, service: &str, sd: &ServiceDescriptor) -> KeelResult<()> {
    let ns = sd.namespace();
    info!(service, ns, "creating service resources");
    for m in [sd.account.as_ref(), sd.role.as_ref(), sd.role_binding.as_ref()].into_iter().flatten() {
        apply(ctx, m, ns).await?;
    }
    if let Some(workload) = &sd.workload {
        apply_workload(ctx, workload, ns).await?;
    }
    try_join_all(sd.services.iter().map(|s| apply(ctx, s, ns))).await?;
    if let Some(policy) = &sd.network_policy {
        apply(ctx, policy, ns).await?;
    }
    Ok(())
}

/// Run every service chain of a level concurrently. Siblings keep running
/// when one fails; the level reports every failure together.
async fn deploy_level(ctx: &Context, graph: &ClusterGraph, level: &str) -> KeelResult<()> {
    let t0 = Instant::now();
    info!(level, "creating level");
    let chains = graph.level(level).map(|(service, sd)| async move {
        deploy_service(ctx, service, sd).await.map_err(|e| {
            error!(level, service, error = %e, "service chain failed");
            e
        })
    });
    let failures: Vec<KeelError> = join_all(chains).await.into_iter().filter_map(Result::err).collect();
    histogram!("level_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    if failures.is_empty() {
        info!(level, took_ms = %t0.elapsed().as_millis(), "level created");
        Ok(())
    } else {
        Err(KeelError::Level { level: level.to_string(), failures })
    }
}

/// Bring the cluster in line with `graph`. Nothing already created is rolled
/// back on failure; re-running converges.
pub async fn deploy_cluster(ctx: &Context, graph: &ClusterGraph) -> KeelResult<()> {
    graph.validate()?;
    try_join_all(graph.namespaces.iter().map(|ns| create_namespace(ctx, ns))).await?;
    let repaired = repair_namespace_labels(ctx).await?;
    info!(count = graph.namespaces.len(), repaired, "namespaces created");

    create_pull_secrets(ctx, graph, None).await?;
    create_configuration(ctx, graph, None).await?;
    info!("configuration created");

    for level in &graph.levels {
        deploy_level(ctx, graph, level).await?;
    }
    info!(levels = graph.levels.len(), "cluster deployed");
    Ok(())
}

async fn remove_service(ctx: &Context, service: &str, sd: &ServiceDescriptor) -> KeelResult<()> {
    let ns = sd.namespace();
    if is_reserved(ns) {
        debug!(service, ns, "reserved namespace, leaving resources in place");
        return Ok(());
    }
    info!(service, ns, "deleting service resources");
    for m in [sd.account.as_ref(), sd.role_binding.as_ref(), sd.role.as_ref()].into_iter().flatten() {
        remove(ctx, m, ns).await?;
    }
    if let Some(workload) = &sd.workload {
        let manifest = workload.manifest().with_default_namespace(ns);
        ctx.controller(workload.kind()).delete(&manifest).await?;
    }
    try_join_all(sd.services.iter().map(|s| remove(ctx, s, ns))).await?;
    if let Some(policy) = &sd.network_policy {
        remove(ctx, policy, ns).await?;
    }
    Ok(())
}

async fn remove_level(ctx: &Context, graph: &ClusterGraph, level: &str) -> KeelResult<()> {
    info!(level, "deleting level");
    let chains = graph.level(level).map(|(service, sd)| async move {
        remove_service(ctx, service, sd).await.map_err(|e| {
            error!(level, service, error = %e, "service teardown failed");
            e
        })
    });
    let failures: Vec<KeelError> = join_all(chains).await.into_iter().filter_map(Result::err).collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(KeelError::Level { level: level.to_string(), failures })
    }
}

/// Tear the graph down in reverse level order. Reserved namespaces are never
/// deleted; only their configuration objects are removed explicitly.
pub async fn remove_cluster(ctx: &Context, graph: &ClusterGraph) -> KeelResult<()> {
    graph.validate()?;
    for level in graph.levels.iter().rev() {
        remove_level(ctx, graph, level).await?;
    }

    let reserved = graph
        .configuration
        .iter()
        .chain(graph.secrets.iter())
        .filter(|m| is_reserved(m.namespace()))
        .map(|m| {
            info!(kind = %m.kind(), name = %m.qualified_name(), "deleting configuration");
            remove(ctx, m, m.namespace())
        });
    try_join_all(reserved).await?;

    let namespaces = graph.namespaces.iter().filter(|ns| !is_reserved(ns)).map(|ns| {
        info!(ns = %ns, "deleting namespace");
        async move { ctx.controller(Kind::Namespace).delete(&Manifest::namespace_doc(ns)).await }
    });
    try_join_all(namespaces).await?;
    info!("cluster removed");
    Ok(())
}

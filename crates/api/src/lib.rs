//! Keel public API façade (in-process).
//!
//! Frontends depend on [`KeelApi`]; [`InProcApi`] drives the orchestrator,
//! the job runner and the inventory queries directly against a platform.

#![forbid(unsafe_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use keel_core::{ClusterGraph, KeelResult, Kind};
use keel_ops::inventory::{self, ContainerImage, LoadBalancer};
use keel_ops::Context;
use tracing::info;

pub mod compiler;
pub mod job;
pub mod orchestrator;

pub use compiler::{CompileOptions, GraphFileCompiler, SpecCompiler};
pub use job::run_job;
pub use orchestrator::{deploy_cluster, remove_cluster};

/// Declarative Keel API surface.
#[async_trait::async_trait]
pub trait KeelApi: Send + Sync {
    /// Compile a source description into a cluster graph.
    async fn compile(&self, source: &Path, options: &CompileOptions) -> KeelResult<ClusterGraph>;

    async fn deploy_cluster(&self, graph: &ClusterGraph) -> KeelResult<()>;

    async fn remove_cluster(&self, graph: &ClusterGraph) -> KeelResult<()>;

    /// Run the job registered as `job.namespace`, prerequisites first.
    async fn run_job(&self, graph: &ClusterGraph, namespace: &str, job: &str) -> KeelResult<()>;

    async fn list_namespaces(&self) -> KeelResult<Vec<String>>;

    async fn load_balancers(&self, namespace: Option<&str>) -> KeelResult<Vec<LoadBalancer>>;

    async fn containers(&self, namespace: Option<&str>) -> KeelResult<Vec<ContainerImage>>;

    /// Point one container of a workload at a new image.
    async fn upgrade(&self, kind: Kind, namespace: &str, name: &str, container: &str, image: &str) -> KeelResult<()>;
}

/// In-process implementation that calls internal crates directly.
pub struct InProcApi {
    ctx: Context,
    compiler: Arc<dyn SpecCompiler>,
}

impl InProcApi {
    pub fn new(ctx: Context) -> Self {
        Self { ctx, compiler: Arc::new(GraphFileCompiler) }
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn SpecCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

#[async_trait::async_trait]
impl KeelApi for InProcApi {
    async fn compile(&self, source: &Path, options: &CompileOptions) -> KeelResult<ClusterGraph> {
        let t0 = Instant::now();
        info!(source = %source.display(), tokens = options.tokens.len(), scale = ?options.scale, "api: compile start");
        let graph = self.compiler.compile(source, options).await?;
        info!(took_ms = %t0.elapsed().as_millis(), "api: compile ok");
        Ok(graph)
    }

    async fn deploy_cluster(&self, graph: &ClusterGraph) -> KeelResult<()> {
        let t0 = Instant::now();
        info!(namespaces = graph.namespaces.len(), services = graph.resources.len(), "api: deploy start");
        orchestrator::deploy_cluster(&self.ctx, graph).await?;
        info!(took_ms = %t0.elapsed().as_millis(), "api: deploy ok");
        Ok(())
    }

    async fn remove_cluster(&self, graph: &ClusterGraph) -> KeelResult<()> {
        let t0 = Instant::now();
        info!(namespaces = graph.namespaces.len(), services = graph.resources.len(), "api: remove start");
        orchestrator::remove_cluster(&self.ctx, graph).await?;
        info!(took_ms = %t0.elapsed().as_millis(), "api: remove ok");
        Ok(())
    }

    async fn run_job(&self, graph: &ClusterGraph, namespace: &str, job: &str) -> KeelResult<()> {
        let t0 = Instant::now();
        info!(ns = %namespace, job = %job, "api: run_job start");
        crate::job::run_job(&self.ctx, graph, namespace, job).await?;
        info!(took_ms = %t0.elapsed().as_millis(), "api: run_job ok");
        Ok(())
    }

    async fn list_namespaces(&self) -> KeelResult<Vec<String>> {
        let t0 = Instant::now();
        let names = inventory::list_namespaces(&self.ctx).await?;
        info!(count = names.len(), took_ms = %t0.elapsed().as_millis(), "api: list_namespaces ok");
        Ok(names)
    }

    async fn load_balancers(&self, namespace: Option<&str>) -> KeelResult<Vec<LoadBalancer>> {
        let t0 = Instant::now();
        let lbs = inventory::load_balancers(&self.ctx, namespace).await?;
        info!(ns = %namespace.unwrap_or("(all)"), count = lbs.len(), took_ms = %t0.elapsed().as_millis(), "api: load_balancers ok");
        Ok(lbs)
    }

    async fn containers(&self, namespace: Option<&str>) -> KeelResult<Vec<ContainerImage>> {
        let t0 = Instant::now();
        let items = inventory::containers(&self.ctx, namespace).await?;
        info!(ns = %namespace.unwrap_or("(all)"), count = items.len(), took_ms = %t0.elapsed().as_millis(), "api: containers ok");
        Ok(items)
    }

    async fn upgrade(&self, kind: Kind, namespace: &str, name: &str, container: &str, image: &str) -> KeelResult<()> {
        let t0 = Instant::now();
        info!(kind = %kind, ns = %namespace, name = %name, container = %container, image = %image, "api: upgrade start");
        self.ctx.controller(kind).upgrade(namespace, name, container, image).await?;
        info!(took_ms = %t0.elapsed().as_millis(), "api: upgrade ok");
        Ok(())
    }
}

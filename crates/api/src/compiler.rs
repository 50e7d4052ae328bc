//! Spec compiler interface and the loader for pre-compiled graph documents.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use keel_core::{ClusterGraph, KeelError, KeelResult};
use regex::{Captures, Regex};
use serde_json::Value as Json;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Values for `{{token}}` placeholders.
    pub tokens: BTreeMap<String, String>,
    /// Multiplier for the replica count of scalable workloads.
    pub scale: Option<f64>,
}

/// Turns a source description into a cluster graph.
#[async_trait]
pub trait SpecCompiler: Send + Sync {
    async fn compile(&self, source: &Path, options: &CompileOptions) -> KeelResult<ClusterGraph>;
}

/// Reads a graph already laid out as JSON or YAML.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphFileCompiler;

const SCALABLE: [&str; 2] = ["deployment", "statefulSet"];

fn token_pattern() -> KeelResult<Regex> {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").map_err(|e| KeelError::compilation(e.to_string()))
}

/// Replace every placeholder verbatim, or name all the ones without a value.
pub fn substitute(text: &str, tokens: &BTreeMap<String, String>) -> KeelResult<String> {
    substitute_with(text, tokens, |v| v.to_string())
}

/// Like [`substitute`], with values escaped as JSON string content so quotes
/// and newlines in a value cannot break the document.
pub fn substitute_json(text: &str, tokens: &BTreeMap<String, String>) -> KeelResult<String> {
    substitute_with(text, tokens, json_escaped)
}

fn json_escaped(value: &str) -> String {
    let quoted = Json::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

fn substitute_with(text: &str, tokens: &BTreeMap<String, String>, escape: fn(&str) -> String) -> KeelResult<String> {
    let re = token_pattern()?;
    let missing: BTreeSet<String> = re
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .filter(|t| !tokens.contains_key(t))
        .collect();
    if !missing.is_empty() {
        return Err(KeelError::missing_tokens(missing.into_iter().collect()));
    }
    Ok(re
        .replace_all(text, |c: &Captures| tokens.get(&c[1]).map(|v| escape(v)).unwrap_or_default())
        .into_owned())
}

/// Multiply `spec.replicas` of every deployment and stateful set, rounding up
/// and never below one.
pub fn scale_replicas(doc: &mut Json, factor: f64) {
    let Some(resources) = doc.get_mut("resources").and_then(Json::as_object_mut) else { return };
    for (service, sd) in resources.iter_mut() {
        for field in SCALABLE {
            let Some(replicas) = sd.pointer_mut(&format!("/{}/spec/replicas", field)) else { continue };
            let Some(current) = replicas.as_f64() else { continue };
            let scaled = ((current * factor).ceil() as i64).max(1);
            debug!(service = %service, from = current, to = scaled, "replicas scaled");
            *replicas = Json::from(scaled);
        }
    }
}

fn is_yaml(source: &Path) -> bool {
    matches!(source.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"))
}

fn parse(source: &Path, text: &str) -> KeelResult<Json> {
    if is_yaml(source) {
        serde_yaml::from_str(text).map_err(|e| KeelError::compilation(format!("{}: {}", source.display(), e)))
    } else {
        serde_json::from_str(text).map_err(|e| KeelError::compilation(format!("{}: {}", source.display(), e)))
    }
}

#[async_trait]
impl SpecCompiler for GraphFileCompiler {
    async fn compile(&self, source: &Path, options: &CompileOptions) -> KeelResult<ClusterGraph> {
        let text = tokio::fs::read_to_string(source)
            .await
            .map_err(|e| KeelError::compilation(format!("reading {}: {}", source.display(), e)))?;
        let text = if is_yaml(source) {
            substitute(&text, &options.tokens)?
        } else {
            substitute_json(&text, &options.tokens)?
        };
        let mut doc = parse(source, &text)?;
        if let Some(factor) = options.scale.filter(|f| *f > 0.0) {
            scale_replicas(&mut doc, factor);
        }
        let graph: ClusterGraph =
            serde_json::from_value(doc).map_err(|e| KeelError::compilation(format!("{}: {}", source.display(), e)))?;
        graph.validate()?;
        info!(source = %source.display(), services = graph.resources.len(), levels = graph.levels.len(), "graph compiled");
        Ok(graph)
    }
}

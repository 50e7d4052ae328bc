//! Keel persistence: diagnostic snapshots of every patched or replaced object.
//! Keep code tiny and predictable.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

/// The live object before the change, the desired manifest and the diff
/// applied between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffRecord {
    pub namespace: String,
    pub name: String,
    pub original: Json,
    pub source: Json,
    pub diff: Json,
}

pub trait DiffStore: Send + Sync {
    fn save(&self, record: &DiffRecord) -> Result<()>;
}

/// Writes `{ns}-{name}-original.json`, `-source.json` and `-diff.json`.
/// Writes are blocking `std::fs` calls; async callers run `save` on the
/// blocking pool.
pub struct FsDiffStore {
    dir: PathBuf,
}

impl FsDiffStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn paths(&self, namespace: &str, name: &str) -> [PathBuf; 3] {
        ["original", "source", "diff"].map(|suffix| self.dir.join(format!("{}-{}-{}.json", namespace, name, suffix)))
    }
}

impl DiffStore for FsDiffStore {
    fn save(&self, record: &DiffRecord) -> Result<()> {
        let started = std::time::Instant::now();
        std::fs::create_dir_all(&self.dir).with_context(|| format!("creating diff dir {}", self.dir.display()))?;
        let docs = [&record.original, &record.source, &record.diff];
        for (path, doc) in self.paths(&record.namespace, &record.name).iter().zip(docs) {
            let body = serde_json::to_string_pretty(doc)?;
            std::fs::write(path, body).with_context(|| format!("writing {}", path.display()))?;
        }
        debug!(ns = %record.namespace, name = %record.name, dir = %self.dir.display(), "diff saved");
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }
}

/// Keeps records in memory; used by tests and dry runs.
#[derive(Default)]
pub struct MemoryDiffStore {
    records: Mutex<Vec<DiffRecord>>,
}

impl MemoryDiffStore {
    pub fn records(&self) -> Vec<DiffRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl DiffStore for MemoryDiffStore {
    fn save(&self, record: &DiffRecord) -> Result<()> {
        let mut records = self.records.lock().map_err(|_| anyhow::anyhow!("diff store poisoned"))?;
        records.push(record.clone());
        Ok(())
    }
}

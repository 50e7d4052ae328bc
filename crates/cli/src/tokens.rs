use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_yaml::Value as Yaml;

fn scalar(v: Yaml) -> String {
    match v {
        Yaml::String(s) => s,
        Yaml::Null => String::new(),
        Yaml::Bool(b) => b.to_string(),
        Yaml::Number(n) => n.to_string(),
        other => serde_yaml::to_string(&other).map(|s| s.trim_end().to_string()).unwrap_or_default(),
    }
}

/// A token file is either a YAML mapping or `key=value` lines; `#` starts a
/// comment line.
pub fn parse_token_file(text: &str) -> Result<BTreeMap<String, String>> {
    if let Ok(map) = serde_yaml::from_str::<BTreeMap<String, Yaml>>(text) {
        return Ok(map.into_iter().map(|(k, v)| (k, scalar(v))).collect());
    }
    let mut out = BTreeMap::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (k, v) = parse_pair(line).with_context(|| format!("line {}", n + 1))?;
        out.insert(k, v);
    }
    Ok(out)
}

pub fn load_token_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading token file {}", path.display()))?;
    parse_token_file(&text).with_context(|| format!("parsing token file {}", path.display()))
}

/// `key=value`; the value may itself contain `=`.
pub fn parse_pair(raw: &str) -> Result<(String, String)> {
    let Some((k, v)) = raw.split_once('=') else {
        bail!("expected key=value, got '{}'", raw);
    };
    let k = k.trim();
    if k.is_empty() {
        bail!("empty token name in '{}'", raw);
    }
    Ok((k.to_string(), v.trim().to_string()))
}

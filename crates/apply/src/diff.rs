//! Structural differencer: desired fields whose values differ from the live object.

use keel_core::{Diff, DiffMode};
use serde_json::{Map, Value as Json};

use crate::quantity::scalar_eq;

/// (parent key, child key) pairs the platform fills with server defaults.
const IGNORED: &[(&str, &str)] = &[("hostPath", "type")];

fn ignored(parent: Option<&str>, key: &str) -> bool {
    parent.map(|p| IGNORED.contains(&(p, key))).unwrap_or(false)
}

/// Diff of `desired` against `live`, walking only fields `desired` declares.
pub fn diff(live: &Json, desired: &Json, mode: DiffMode) -> Diff {
    let raw = match mode {
        DiffMode::Simple => simple(live, desired, None),
        DiffMode::Complex => complex(live, desired, None),
    };
    match raw {
        Some(raw @ Json::Object(_)) => Diff { raw },
        _ => Diff::empty(),
    }
}

pub fn simple_diff(live: &Json, desired: &Json) -> Diff {
    diff(live, desired, DiffMode::Simple)
}

pub fn complex_diff(live: &Json, desired: &Json) -> Diff {
    diff(live, desired, DiffMode::Complex)
}

fn non_empty(v: Json) -> Option<Json> {
    match &v {
        Json::Object(m) if m.is_empty() => None,
        Json::Array(a) if a.is_empty() => None,
        Json::Null => None,
        _ => Some(v),
    }
}

/// Field-wise object diff shared by both modes; `recurse` handles values
/// present on both sides.
fn object_diff(
    live: &Json,
    desired: &Map<String, Json>,
    parent: Option<&str>,
    recurse: fn(&Json, &Json, Option<&str>) -> Option<Json>,
) -> Option<Json> {
    let mut out = Map::new();
    for (key, want) in desired {
        if want.is_null() || ignored(parent, key) {
            continue;
        }
        let changed = match live.get(key).filter(|v| !v.is_null()) {
            None => non_empty(want.clone()),
            Some(have) => recurse(have, want, Some(key)),
        };
        if let Some(v) = changed {
            out.insert(key.clone(), v);
        }
    }
    if out.is_empty() {
        return None;
    }
    if let (Some(name), Some(live_name)) = (desired.get("name"), live.get("name")) {
        if name == live_name {
            out.insert("name".into(), name.clone());
        }
    }
    Some(Json::Object(out))
}

fn simple(live: &Json, desired: &Json, parent: Option<&str>) -> Option<Json> {
    match desired {
        Json::Null => None,
        Json::Object(want) => {
            if !live.is_object() {
                return non_empty(desired.clone());
            }
            object_diff(live, want, parent, simple)
        }
        Json::Array(want) => {
            let Some(have) = live.as_array() else {
                return non_empty(desired.clone());
            };
            if arrays_equal(have, want) {
                return None;
            }
            if !want.first().map(Json::is_object).unwrap_or(false) {
                return Some(desired.clone());
            }
            let items: Vec<Json> = want
                .iter()
                .enumerate()
                .filter_map(|(i, w)| match have.get(i) {
                    Some(h) => simple(h, w, parent),
                    None => non_empty(w.clone()),
                })
                .collect();
            non_empty(Json::Array(items))
        }
        scalar => {
            if live.is_object() || live.is_array() || !scalar_eq(live, scalar) {
                Some(scalar.clone())
            } else {
                None
            }
        }
    }
}

fn arrays_equal(have: &[Json], want: &[Json]) -> bool {
    have.len() == want.len()
        && have.iter().zip(want).all(|(h, w)| match (h, w) {
            (Json::Object(_) | Json::Array(_), _) | (_, Json::Object(_) | Json::Array(_)) => h == w,
            _ => scalar_eq(h, w),
        })
}

/// Arrays are compared by element identity rather than position: every
/// desired element that has no matching live element is returned whole.
fn complex(live: &Json, desired: &Json, parent: Option<&str>) -> Option<Json> {
    match desired {
        Json::Array(want) => {
            let Some(have) = live.as_array() else {
                return non_empty(desired.clone());
            };
            if want.len() <= 1 && want.first().map(|w| !w.is_object()).unwrap_or(true) {
                return if arrays_equal(have, want) { None } else { Some(desired.clone()) };
            }
            let missing: Vec<Json> = want
                .iter()
                .filter(|w| !have.iter().any(|h| simple(h, w, parent).is_none()))
                .cloned()
                .collect();
            non_empty(Json::Array(missing))
        }
        Json::Object(want) => {
            if !live.is_object() {
                return non_empty(desired.clone());
            }
            object_diff(live, want, parent, complex)
        }
        _ => simple(live, desired, parent),
    }
}

/// Dotted paths of every changed leaf, for logging.
pub fn changed_paths(diff: &Diff) -> Vec<String> {
    fn walk(v: &Json, prefix: &str, out: &mut Vec<String>) {
        match v {
            Json::Object(map) => {
                for (k, vv) in map {
                    if k == "name" && prefix.ends_with(']') {
                        continue;
                    }
                    let p = if prefix.is_empty() { k.clone() } else { format!("{}.{}", prefix, k) };
                    walk(vv, &p, out);
                }
            }
            Json::Array(items) if items.iter().any(Json::is_object) => {
                for (i, vv) in items.iter().enumerate() {
                    walk(vv, &format!("{}[{}]", prefix, i), out);
                }
            }
            _ => out.push(prefix.to_string()),
        }
    }
    let mut out = Vec::new();
    walk(&diff.raw, "", &mut out);
    out
}

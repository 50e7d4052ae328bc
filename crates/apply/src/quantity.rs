//! Unit-aware scalar equality for resource quantities (`"1"`, `"500m"`, `"50%"`).

use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Quantity {
    Whole(f64),
    Milli(f64),
    Percent(f64),
}

fn numeric(s: &str) -> Option<f64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    s.parse().ok()
}

fn quantity(v: &Json) -> Option<Quantity> {
    match v {
        Json::Number(n) => n.as_f64().map(Quantity::Whole),
        Json::String(s) => {
            if let Some(m) = s.strip_suffix('m') {
                numeric(m).map(Quantity::Milli)
            } else if let Some(p) = s.strip_suffix('%') {
                numeric(p).map(Quantity::Percent)
            } else {
                numeric(s).map(Quantity::Whole)
            }
        }
        _ => None,
    }
}

fn milli_eq(a: f64, b: f64) -> bool {
    a.round() as i64 == b.round() as i64
}

fn quantity_eq(a: Quantity, b: Quantity) -> Option<bool> {
    use Quantity::*;
    match (a, b) {
        (Whole(x), Whole(y)) => Some(x == y),
        (Milli(x), Milli(y)) | (Percent(x), Percent(y)) => Some(milli_eq(x, y)),
        (Whole(w), Milli(m)) | (Milli(m), Whole(w)) => Some(milli_eq(w * 1000.0, m)),
        (Percent(p), Milli(m)) | (Milli(m), Percent(p)) => Some(milli_eq(p * 10.0, m)),
        _ => None,
    }
}

/// Number vs numeric string and bool vs 0/1 compare equal; everything else
/// needs the same JSON type.
pub(crate) fn loose_eq(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Number(n), Json::String(s)) | (Json::String(s), Json::Number(n)) => {
            match (n.as_f64(), s.trim().parse::<f64>()) {
                (Some(x), Ok(y)) => x == y,
                _ => false,
            }
        }
        (Json::Bool(flag), Json::Number(n)) | (Json::Number(n), Json::Bool(flag)) => {
            n.as_f64() == Some(if *flag { 1.0 } else { 0.0 })
        }
        _ => a == b,
    }
}

/// Scalar equality used by the differencer.
pub fn scalar_eq(live: &Json, desired: &Json) -> bool {
    if let (Some(a), Some(b)) = (quantity(live), quantity(desired)) {
        if let Some(eq) = quantity_eq(a, b) {
            return eq;
        }
    }
    loose_eq(live, desired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cpu_units() {
        assert!(scalar_eq(&json!("1000m"), &json!("1")));
        assert!(scalar_eq(&json!("1.5"), &json!("1500m")));
        assert!(scalar_eq(&json!(2), &json!("2000m")));
        assert!(!scalar_eq(&json!("1000m"), &json!("2")));
    }

    #[test]
    fn percentages() {
        assert!(scalar_eq(&json!("250m"), &json!("25%")));
        assert!(scalar_eq(&json!("25%"), &json!("25%")));
        assert!(!scalar_eq(&json!("50"), &json!("50%")));
    }

    #[test]
    fn loose_scalars() {
        assert!(scalar_eq(&json!(80), &json!("80")));
        assert!(scalar_eq(&json!("nginx"), &json!("nginx")));
        assert!(!scalar_eq(&json!(false), &json!(true)));
        assert!(!scalar_eq(&json!(0), &json!(1)));
        assert!(!scalar_eq(&json!("1.2.3"), &json!("1.2.4")));
    }
}

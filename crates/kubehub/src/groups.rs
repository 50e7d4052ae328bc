//! Platform version to API group routing.

use keel_core::Kind;

/// `(major, minor)` from strings such as `1.8`, `v1.27.3` or `1.8+`.
pub fn parse_version(v: &str) -> Option<(u32, u32)> {
    let v = v.trim().trim_start_matches('v');
    let mut parts = v.split('.');
    let major = digits(parts.next()?)?;
    let minor = digits(parts.next()?)?;
    Some((major, minor))
}

fn digits(s: &str) -> Option<u32> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().ok()
}

/// API group/version serving `kind` on a cluster of `platform_version`.
/// `None` means the manifest's own `apiVersion` is used unchanged.
pub fn api_group(kind: &Kind, platform_version: &str) -> Option<&'static str> {
    let (major, minor) = parse_version(platform_version)?;
    if major != 1 {
        return None;
    }
    match kind {
        Kind::DaemonSet => match minor {
            4..=7 => Some("extensions/v1beta1"),
            8 => Some("apps/v1beta2"),
            m if m >= 9 => Some("apps/v1"),
            _ => None,
        },
        Kind::StatefulSet => match minor {
            4..=7 => Some("apps/v1beta1"),
            8 => Some("apps/v1beta2"),
            m if m >= 9 => Some("apps/v1"),
            _ => None,
        },
        Kind::CronJob => match minor {
            7 => Some("batch/v2alpha1"),
            8..=20 => Some("batch/v1beta1"),
            m if m >= 21 => Some("batch/v1"),
            _ => None,
        },
        Kind::NetworkPolicy if minor >= 4 => Some("networking.k8s.io/v1"),
        Kind::Role | Kind::RoleBinding | Kind::ClusterRole | Kind::ClusterRoleBinding => match minor {
            6 | 7 => Some("rbac.authorization.k8s.io/v1beta1"),
            m if m >= 8 => Some("rbac.authorization.k8s.io/v1"),
            _ => None,
        },
        _ => None,
    }
}

/// `apiVersion` a manifest is sent with.
pub fn resolve_api_version(kind: &Kind, declared: &str, platform_version: Option<&str>) -> String {
    platform_version
        .and_then(|v| api_group(kind, v))
        .map(str::to_string)
        .unwrap_or_else(|| declared.to_string())
}

/// Split `group/version`; core resources have an empty group.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_parse() {
        assert_eq!(parse_version("1.8"), Some((1, 8)));
        assert_eq!(parse_version("v1.27.3"), Some((1, 27)));
        assert_eq!(parse_version("1.8+"), Some((1, 8)));
        assert_eq!(parse_version("garbage"), None);
    }

    #[test]
    fn legacy_routes() {
        assert_eq!(api_group(&Kind::DaemonSet, "1.6"), Some("extensions/v1beta1"));
        assert_eq!(api_group(&Kind::DaemonSet, "1.8"), Some("apps/v1beta2"));
        assert_eq!(api_group(&Kind::StatefulSet, "1.5"), Some("apps/v1beta1"));
        assert_eq!(api_group(&Kind::CronJob, "1.7"), Some("batch/v2alpha1"));
        assert_eq!(api_group(&Kind::CronJob, "1.6"), None);
        assert_eq!(api_group(&Kind::Role, "1.7"), Some("rbac.authorization.k8s.io/v1beta1"));
        assert_eq!(api_group(&Kind::RoleBinding, "1.8"), Some("rbac.authorization.k8s.io/v1"));
    }

    #[test]
    fn modern_routes_and_fallback() {
        assert_eq!(api_group(&Kind::CronJob, "1.29"), Some("batch/v1"));
        assert_eq!(api_group(&Kind::Deployment, "1.29"), None);
        assert_eq!(resolve_api_version(&Kind::Deployment, "apps/v1", Some("1.29")), "apps/v1");
        assert_eq!(resolve_api_version(&Kind::DaemonSet, "apps/v1", None), "apps/v1");
        assert_eq!(resolve_api_version(&Kind::DaemonSet, "apps/v1", Some("1.7")), "extensions/v1beta1");
    }

    #[test]
    fn splits_core_group() {
        assert_eq!(split_api_version("v1"), ("", "v1"));
        assert_eq!(split_api_version("apps/v1"), ("apps", "v1"));
    }
}

use std::fmt;

/// Resource kinds with dedicated handling. Anything else falls into `Other`
/// and is resolved through API discovery at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    Namespace,
    ServiceAccount,
    Role,
    ClusterRole,
    RoleBinding,
    ClusterRoleBinding,
    ConfigMap,
    Secret,
    NetworkPolicy,
    Deployment,
    DaemonSet,
    StatefulSet,
    Job,
    CronJob,
    Service,
    Other(String),
}

impl Kind {
    pub fn from_name(name: &str) -> Kind {
        match name {
            "Namespace" => Kind::Namespace,
            "ServiceAccount" => Kind::ServiceAccount,
            "Role" => Kind::Role,
            "ClusterRole" => Kind::ClusterRole,
            "RoleBinding" => Kind::RoleBinding,
            "ClusterRoleBinding" => Kind::ClusterRoleBinding,
            "ConfigMap" => Kind::ConfigMap,
            "Secret" => Kind::Secret,
            "NetworkPolicy" => Kind::NetworkPolicy,
            "Deployment" => Kind::Deployment,
            "DaemonSet" => Kind::DaemonSet,
            "StatefulSet" => Kind::StatefulSet,
            "Job" => Kind::Job,
            "CronJob" => Kind::CronJob,
            "Service" => Kind::Service,
            other => Kind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Kind::Namespace => "Namespace",
            Kind::ServiceAccount => "ServiceAccount",
            Kind::Role => "Role",
            Kind::ClusterRole => "ClusterRole",
            Kind::RoleBinding => "RoleBinding",
            Kind::ClusterRoleBinding => "ClusterRoleBinding",
            Kind::ConfigMap => "ConfigMap",
            Kind::Secret => "Secret",
            Kind::NetworkPolicy => "NetworkPolicy",
            Kind::Deployment => "Deployment",
            Kind::DaemonSet => "DaemonSet",
            Kind::StatefulSet => "StatefulSet",
            Kind::Job => "Job",
            Kind::CronJob => "CronJob",
            Kind::Service => "Service",
            Kind::Other(s) => s.as_str(),
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        matches!(self, Kind::Namespace | Kind::ClusterRole | Kind::ClusterRoleBinding)
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Kind::Job | Kind::CronJob)
    }

    /// Current stable `apiVersion`, used when no manifest is at hand.
    pub fn default_api_version(&self) -> Option<&'static str> {
        Some(match self {
            Kind::Namespace | Kind::ServiceAccount | Kind::ConfigMap | Kind::Secret | Kind::Service => "v1",
            Kind::Role | Kind::ClusterRole | Kind::RoleBinding | Kind::ClusterRoleBinding => {
                "rbac.authorization.k8s.io/v1"
            }
            Kind::NetworkPolicy => "networking.k8s.io/v1",
            Kind::Deployment | Kind::DaemonSet | Kind::StatefulSet => "apps/v1",
            Kind::Job | Kind::CronJob => "batch/v1",
            Kind::Other(_) => return None,
        })
    }

    /// Plural resource name used in API paths.
    pub fn plural(&self) -> String {
        match self {
            Kind::Other(s) => format!("{}s", s.to_ascii_lowercase()),
            Kind::NetworkPolicy => "networkpolicies".to_string(),
            k => format!("{}s", k.as_str().to_ascii_lowercase()),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use thiserror::Error;

pub type KeelResult<T> = Result<T, KeelError>;

#[derive(Debug, Error)]
pub enum KeelError {
    #[error("compilation failed: {message}")]
    Compilation { message: String, missing_tokens: Vec<String> },

    #[error("{action} {kind} {target} failed: {message}")]
    Api { kind: String, target: String, action: &'static str, message: String },

    #[error("{kind} {target} not ready for {outcome} after {attempts} attempts")]
    NotReady { kind: String, target: String, outcome: String, attempts: u32 },

    #[error("{kind} {target} failed: {status}")]
    WorkloadFailed { kind: String, target: String, status: String },

    #[error("graph integrity: {0}")]
    GraphIntegrity(String),

    #[error("level {level} failed ({} of its services): {}", .failures.len(), join(.failures))]
    Level { level: String, failures: Vec<KeelError> },

    #[error("prerequisites for job {job} in {namespace} failed: {source}")]
    JobPrerequisite {
        job: String,
        namespace: String,
        #[source]
        source: Box<KeelError>,
    },
}

fn join(errors: &[KeelError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

impl KeelError {
    pub fn api(kind: impl Into<String>, target: impl Into<String>, action: &'static str, message: impl ToString) -> Self {
        Self::Api { kind: kind.into(), target: target.into(), action, message: message.to_string() }
    }

    pub fn missing_tokens(tokens: Vec<String>) -> Self {
        Self::Compilation {
            message: format!("missing tokens: {}", tokens.join(", ")),
            missing_tokens: tokens,
        }
    }

    pub fn compilation(message: impl Into<String>) -> Self {
        Self::Compilation { message: message.into(), missing_tokens: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_message_lists_failures() {
        let e = KeelError::Level {
            level: "2".into(),
            failures: vec![
                KeelError::api("Deployment", "shop.web", "create", "boom"),
                KeelError::GraphIntegrity("x".into()),
            ],
        };
        let msg = e.to_string();
        assert!(msg.contains("level 2 failed (2 of its services)"));
        assert!(msg.contains("create Deployment shop.web failed: boom"));
    }

    #[test]
    fn missing_tokens_message() {
        let e = KeelError::missing_tokens(vec!["region".into(), "tag".into()]);
        assert_eq!(e.to_string(), "compilation failed: missing tokens: region, tag");
    }
}

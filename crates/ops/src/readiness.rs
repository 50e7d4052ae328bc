//! Kind-specific readiness predicates and the poller that waits on them.

use std::fmt;
use std::future::Future;

use keel_core::{KeelError, KeelResult, Kind, LiveObject};
use keel_kubehub::PlatformError;
use metrics::counter;
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::poll::{retry_with_backoff, Attempt, Backoff, RetryError};

/// What the caller is waiting to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Creation,
    Updated,
    Deletion,
    Completion,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Creation => "creation",
            Outcome::Updated => "updated",
            Outcome::Deletion => "deletion",
            Outcome::Completion => "completion",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    Ready,
    Pending(String),
    /// The workload reported a terminal failure; carries the raw status.
    Failed(String),
}

fn int(status: Option<&Json>, field: &str) -> Option<i64> {
    status.and_then(|s| s.get(field)).and_then(Json::as_i64)
}

fn pending(what: impl Into<String>) -> Check {
    Check::Pending(what.into())
}

fn replicas_ready(live: &LiveObject, outcome: Outcome) -> Check {
    let status = live.status();
    let ready = int(status, "readyReplicas").unwrap_or(0);
    let updated = int(status, "updatedReplicas").unwrap_or(0);
    let ok = match outcome {
        Outcome::Updated => updated > 0 && ready > 0,
        _ => ready > 0,
    };
    if ok {
        Check::Ready
    } else {
        pending(format!("readyReplicas={} updatedReplicas={}", ready, updated))
    }
}

fn daemon_set_ready(live: &LiveObject) -> Check {
    let status = live.status();
    let ready = int(status, "numberReady");
    let desired = int(status, "desiredNumberScheduled");
    if ready == desired {
        Check::Ready
    } else {
        pending(format!("numberReady={:?} desiredNumberScheduled={:?}", ready, desired))
    }
}

fn service_ready(live: &LiveObject) -> Check {
    let Some(lb) = live.status().and_then(|s| s.get("loadBalancer")).filter(|v| !v.is_null()) else {
        return pending("loadBalancer not populated");
    };
    let wants_ingress = live.raw.pointer("/spec/type").and_then(Json::as_str) == Some("LoadBalancer");
    let has_ingress = lb.get("ingress").and_then(Json::as_array).map(|a| !a.is_empty()).unwrap_or(false);
    if wants_ingress && !has_ingress {
        return pending("waiting for ingress");
    }
    Check::Ready
}

fn namespace_ready(live: &LiveObject, outcome: Outcome) -> Check {
    let phase = live.status().and_then(|s| s.get("phase")).and_then(Json::as_str);
    match outcome {
        Outcome::Creation if phase != Some("Active") => pending(format!("phase={:?}", phase)),
        _ => Check::Ready,
    }
}

fn batch_ready(live: &LiveObject, outcome: Outcome) -> Check {
    let first = live
        .status()
        .and_then(|s| s.get("conditions"))
        .and_then(Json::as_array)
        .and_then(|c| c.first());
    let Some(cond) = first else {
        return match outcome {
            Outcome::Completion => pending("no conditions yet"),
            _ => Check::Ready,
        };
    };
    let ty = cond.get("type").and_then(Json::as_str);
    let st = cond.get("status").and_then(Json::as_str);
    match (ty, st) {
        (Some("Complete"), Some("True")) => Check::Ready,
        (Some("Failed"), Some("True")) => {
            Check::Failed(live.status().map(|s| s.to_string()).unwrap_or_default())
        }
        _ => pending(format!("condition {:?}={:?}", ty, st)),
    }
}

/// Readiness of a fetched object for `outcome`.
pub fn check(kind: &Kind, outcome: Outcome, live: &LiveObject) -> Check {
    if outcome == Outcome::Deletion {
        return if live.is_terminating() { pending("terminating") } else { Check::Ready };
    }
    match kind {
        Kind::Deployment | Kind::StatefulSet => replicas_ready(live, outcome),
        Kind::DaemonSet => daemon_set_ready(live),
        Kind::Service => service_ready(live),
        Kind::Namespace => namespace_ready(live, outcome),
        Kind::Job => batch_ready(live, outcome),
        Kind::CronJob => {
            let has_conditions = live
                .status()
                .and_then(|s| s.get("conditions"))
                .and_then(Json::as_array)
                .map(|c| !c.is_empty())
                .unwrap_or(false);
            if has_conditions {
                batch_ready(live, outcome)
            } else {
                Check::Ready
            }
        }
        _ => Check::Ready,
    }
}

/// Poll `fetch` until `kind` reports `outcome`. Deletion resolves to `None`
/// once the object is gone.
pub async fn await_condition<F, Fut>(
    backoff: &Backoff,
    kind: &Kind,
    target: &str,
    outcome: Outcome,
    mut fetch: F,
) -> KeelResult<Option<LiveObject>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<LiveObject, PlatformError>>,
{
    let op = format!("await {} {} {}", outcome, kind, target);
    let kind_label = kind.as_str().to_string();
    let res = retry_with_backoff(backoff, &op, |attempt| {
        let fut = fetch();
        let kind_label = kind_label.clone();
        async move {
            counter!("poll_attempts_total", 1u64, "kind" => kind_label);
            let live = match fut.await {
                Ok(live) => live,
                Err(PlatformError::NotFound) if outcome == Outcome::Deletion => return Ok(None),
                Err(e) => {
                    warn!(kind = %kind, name = %target, attempt, error = %e, "fetch failed; will retry");
                    return Err(Attempt::Retry(e.to_string()));
                }
            };
            match check(kind, outcome, &live) {
                Check::Ready => Ok(Some(live)),
                Check::Pending(why) => {
                    debug!(kind = %kind, name = %target, outcome = %outcome, attempt, status = %why, "not ready");
                    Err(Attempt::Retry(why))
                }
                Check::Failed(status) => Err(Attempt::Stop(KeelError::WorkloadFailed {
                    kind: kind.to_string(),
                    target: target.to_string(),
                    status,
                })),
            }
        }
    })
    .await;
    match res {
        Ok(v) => Ok(v),
        Err(RetryError::Stopped(e)) => Err(e),
        Err(RetryError::Exhausted { attempts, .. }) => Err(KeelError::NotReady {
            kind: kind.to_string(),
            target: target.to_string(),
            outcome: outcome.to_string(),
            attempts,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast() -> Backoff {
        Backoff { initial: Duration::from_millis(1), factor: 1.0, max: Duration::from_millis(1), attempts: 8 }
    }

    fn live(v: Json) -> LiveObject {
        LiveObject::new(v)
    }

    #[test]
    fn deployment_predicates() {
        let created = live(json!({ "status": { "readyReplicas": 1 } }));
        assert_eq!(check(&Kind::Deployment, Outcome::Creation, &created), Check::Ready);
        assert!(matches!(check(&Kind::Deployment, Outcome::Updated, &created), Check::Pending(_)));
        let updated = live(json!({ "status": { "readyReplicas": 1, "updatedReplicas": 1 } }));
        assert_eq!(check(&Kind::StatefulSet, Outcome::Updated, &updated), Check::Ready);
        assert!(matches!(check(&Kind::Deployment, Outcome::Creation, &live(json!({}))), Check::Pending(_)));
    }

    #[test]
    fn daemon_set_and_service_predicates() {
        let ds = live(json!({ "status": { "numberReady": 2, "desiredNumberScheduled": 3 } }));
        assert!(matches!(check(&Kind::DaemonSet, Outcome::Creation, &ds), Check::Pending(_)));
        let ds = live(json!({ "status": { "numberReady": 3, "desiredNumberScheduled": 3 } }));
        assert_eq!(check(&Kind::DaemonSet, Outcome::Creation, &ds), Check::Ready);

        let svc = live(json!({ "spec": { "type": "ClusterIP" }, "status": { "loadBalancer": {} } }));
        assert_eq!(check(&Kind::Service, Outcome::Creation, &svc), Check::Ready);
        let lb = live(json!({ "spec": { "type": "LoadBalancer" }, "status": { "loadBalancer": {} } }));
        assert!(matches!(check(&Kind::Service, Outcome::Creation, &lb), Check::Pending(_)));
        assert!(matches!(check(&Kind::Service, Outcome::Creation, &live(json!({}))), Check::Pending(_)));
    }

    #[test]
    fn batch_predicates() {
        let failed = live(json!({ "status": { "conditions": [ { "type": "Failed", "status": "True" } ] } }));
        assert!(matches!(check(&Kind::Job, Outcome::Completion, &failed), Check::Failed(_)));
        let empty = live(json!({}));
        assert_eq!(check(&Kind::CronJob, Outcome::Creation, &empty), Check::Ready);
        assert_eq!(check(&Kind::Job, Outcome::Creation, &empty), Check::Ready);
        assert!(matches!(check(&Kind::Job, Outcome::Completion, &empty), Check::Pending(_)));
    }

    #[test]
    fn namespace_and_deletion_predicates() {
        let term = live(json!({ "status": { "phase": "Terminating" } }));
        assert!(matches!(check(&Kind::Namespace, Outcome::Deletion, &term), Check::Pending(_)));
        assert!(matches!(check(&Kind::Namespace, Outcome::Creation, &term), Check::Pending(_)));
        let active = live(json!({ "status": { "phase": "Active" } }));
        assert_eq!(check(&Kind::Namespace, Outcome::Creation, &active), Check::Ready);
        assert_eq!(check(&Kind::Namespace, Outcome::Deletion, &active), Check::Ready);
    }

    #[tokio::test]
    async fn resolves_after_three_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out = await_condition(&fast(), &Kind::Deployment, "shop.web", Outcome::Creation, || {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 3 {
                    Err(PlatformError::Api("timeout".into()))
                } else {
                    Ok(LiveObject::new(json!({ "status": { "readyReplicas": 1 } })))
                }
            }
        })
        .await
        .unwrap();
        assert!(out.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn never_ready_times_out() {
        let err = await_condition(&fast(), &Kind::Deployment, "shop.web", Outcome::Creation, || async {
            Ok(LiveObject::new(json!({ "status": { "readyReplicas": 0 } })))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, KeelError::NotReady { attempts: 8, .. }));
    }

    #[tokio::test]
    async fn failed_job_stops_on_first_observation() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = await_condition(&fast(), &Kind::Job, "batch.migrate", Outcome::Completion, || {
            c.fetch_add(1, Ordering::SeqCst);
            async {
                Ok(LiveObject::new(json!({ "status": { "conditions": [ { "type": "Failed", "status": "True" } ] } })))
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, KeelError::WorkloadFailed { ref target, .. } if target == "batch.migrate"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deletion_not_found_is_success() {
        let out = await_condition(&fast(), &Kind::Service, "shop.web", Outcome::Deletion, || async {
            Err(PlatformError::NotFound)
        })
        .await
        .unwrap();
        assert!(out.is_none());
    }
}

use std::sync::Arc;

use keel_core::{DiffMode, Kind, Manifest, Settings};
use keel_kubehub::fake::{FakePlatform, Verb};
use keel_ops::{Action, Context};
use serde_json::{json, Value as Json};

fn service(cluster_ip: Option<&str>, port: u16) -> Json {
    let mut spec = json!({ "type": "ClusterIP", "selector": { "app": "web" }, "ports": [ { "port": port } ] });
    if let Some(ip) = cluster_ip {
        spec["clusterIP"] = json!(ip);
    }
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": "web", "namespace": "shop" },
        "spec": spec
    })
}

fn deployment(containers: Json) -> Json {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": "web", "namespace": "shop" },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": "web" } },
            "template": {
                "metadata": { "labels": { "app": "web" } },
                "spec": { "containers": containers }
            }
        }
    })
}

fn job(backoff: u32) -> Json {
    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": { "name": "migrate", "namespace": "shop" },
        "spec": {
            "backoffLimit": backoff,
            "template": { "spec": {
                "restartPolicy": "Never",
                "containers": [ { "name": "migrate", "image": "migrate:1" } ]
            } }
        }
    })
}

fn context(fake: &Arc<FakePlatform>, settings: Settings) -> Context {
    Context::new(fake.clone(), settings)
}

#[tokio::test]
async fn port_change_replaces_the_service_in_place() {
    let fake = Arc::new(FakePlatform::new());
    fake.seed(service(Some("10.0.0.7"), 80));
    let rv = fake.object("Service", Some("shop"), "web").unwrap()["metadata"]["resourceVersion"].clone();
    let ctx = context(&fake, Settings::fast());

    let action = ctx.controller(Kind::Service).reconcile(&Manifest::new(service(None, 8080))).await.unwrap();
    assert_eq!(action, Action::Replaced);

    let mutations = fake.mutations();
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].verb, Verb::Update);
    let body = mutations[0].body.as_ref().unwrap();
    assert_eq!(body["metadata"]["resourceVersion"], rv);
    assert_eq!(body["spec"]["clusterIP"], "10.0.0.7");
    assert_eq!(body["spec"]["ports"][0]["port"], 8080);
}

#[tokio::test]
async fn cluster_ip_change_recreates_after_termination() {
    let fake = Arc::new(FakePlatform::new());
    fake.seed(service(Some("10.0.0.7"), 80));
    fake.set_delete_lag(2);
    let ctx = context(&fake, Settings::fast());

    let action = ctx.controller(Kind::Service).reconcile(&Manifest::new(service(Some("None"), 80))).await.unwrap();
    assert_eq!(action, Action::Recreated);

    let calls = fake.calls();
    let verbs: Vec<Verb> = calls.iter().filter(|c| c.verb.is_mutation()).map(|c| c.verb).collect();
    assert_eq!(verbs, vec![Verb::Delete, Verb::Create]);
    let deleted = calls.iter().position(|c| c.verb == Verb::Delete).unwrap();
    let created = calls.iter().position(|c| c.verb == Verb::Create).unwrap();
    let waits = calls[deleted + 1..created].iter().filter(|c| c.verb == Verb::Get).count();
    assert_eq!(waits, 3, "two terminating reads, then not found");
    let live = fake.object("Service", Some("shop"), "web").unwrap();
    assert_eq!(live["spec"]["clusterIP"], "None");
}

#[tokio::test]
async fn backoff_change_patches_a_job() {
    let fake = Arc::new(FakePlatform::new());
    fake.seed(job(3));
    let ctx = context(&fake, Settings::fast());

    let action = ctx.controller(Kind::Job).reconcile(&Manifest::new(job(6))).await.unwrap();
    assert_eq!(action, Action::Patched);
    let mutations = fake.mutations();
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].verb, Verb::Patch);
    assert_eq!(mutations[0].body, Some(json!({ "spec": { "backoffLimit": 6 } })));
}

#[tokio::test]
async fn other_job_changes_recreate_it() {
    let fake = Arc::new(FakePlatform::new());
    fake.seed(job(3));
    let ctx = context(&fake, Settings::fast());

    let mut desired = job(3);
    desired["spec"]["template"]["spec"]["containers"][0]["image"] = json!("migrate:2");
    let action = ctx.controller(Kind::Job).reconcile(&Manifest::new(desired)).await.unwrap();
    assert_eq!(action, Action::Recreated);
    let verbs: Vec<Verb> = fake.mutations().iter().map(|c| c.verb).collect();
    assert_eq!(verbs, vec![Verb::Delete, Verb::Create]);
}

#[tokio::test]
async fn reordered_containers_only_differ_positionally() {
    let live = json!([ { "name": "web", "image": "web:1" }, { "name": "proxy", "image": "envoy:1" } ]);
    let reordered = json!([ { "name": "proxy", "image": "envoy:1" }, { "name": "web", "image": "web:1" } ]);

    let fake = Arc::new(FakePlatform::new());
    fake.seed(deployment(live.clone()));
    let settings = Settings { diff_mode: DiffMode::Complex, ..Settings::fast() };
    let ctx = context(&fake, settings);
    let action = ctx.controller(Kind::Deployment).reconcile(&Manifest::new(deployment(reordered.clone()))).await.unwrap();
    assert_eq!(action, Action::Unchanged);
    assert!(fake.mutations().is_empty());

    let fake = Arc::new(FakePlatform::new());
    fake.seed(deployment(live));
    let ctx = context(&fake, Settings::fast());
    let action = ctx.controller(Kind::Deployment).reconcile(&Manifest::new(deployment(reordered))).await.unwrap();
    assert_eq!(action, Action::Patched);
}

#[tokio::test]
async fn discovered_cluster_scoped_kinds_converge() {
    let fake = Arc::new(FakePlatform::new().with_cluster_scoped("PriorityClass"));
    let ctx = context(&fake, Settings::fast());
    let desired = Manifest::new(json!({
        "apiVersion": "scheduling.k8s.io/v1",
        "kind": "PriorityClass",
        "metadata": { "name": "high" },
        "value": 1000
    }))
    .with_default_namespace("shop");

    assert_eq!(ctx.controller_for(&desired).reconcile(&desired).await.unwrap(), Action::Created);
    assert_eq!(ctx.controller_for(&desired).reconcile(&desired).await.unwrap(), Action::Unchanged);
    let mutations = fake.mutations();
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].verb, Verb::Create);
    assert!(fake.object("PriorityClass", None, "high").unwrap()["metadata"].get("namespace").is_none());
}

#[tokio::test]
async fn upgrade_waits_through_transient_read_errors() {
    let fake = Arc::new(FakePlatform::new());
    fake.seed(deployment(json!([ { "name": "web", "image": "web:1" } ])));
    fake.flaky_get("Deployment", "web", 2);
    let ctx = context(&fake, Settings::fast());

    ctx.controller(Kind::Deployment).upgrade("shop", "web", "web", "web:2").await.unwrap();
    assert_eq!(fake.calls_for(Verb::Get, "Deployment").len(), 3);
    let live = fake.object("Deployment", Some("shop"), "web").unwrap();
    assert_eq!(live["spec"]["template"]["spec"]["containers"][0]["image"], "web:2");
}

#[tokio::test]
async fn legacy_platforms_get_legacy_api_versions() {
    let fake = Arc::new(FakePlatform::new().with_version("1.8"));
    let ctx = context(&fake, Settings::fast());
    let desired = Manifest::new(json!({
        "apiVersion": "apps/v1",
        "kind": "DaemonSet",
        "metadata": { "name": "agent", "namespace": "kube-system" },
        "spec": { "template": { "spec": { "containers": [ { "name": "agent", "image": "agent:1" } ] } } }
    }));

    assert_eq!(ctx.controller_for(&desired).reconcile(&desired).await.unwrap(), Action::Created);
    let created = fake.calls_for(Verb::Create, "DaemonSet");
    assert_eq!(created[0].api_version, "apps/v1beta2");
    assert_eq!(created[0].body.as_ref().unwrap()["apiVersion"], "apps/v1beta2");
}

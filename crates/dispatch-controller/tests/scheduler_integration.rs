//! End-to-end scheduler tests against a mocked worker HTTP surface.
//!
//! Grounded on `abp-daemon`'s own `wiremock`-backed handler tests, adapted
//! to drive `dispatch-controller::Scheduler` instead of an axum handler
//! directly.

use dispatch_capability::{ClusterNode, WorkerRegistry};
use dispatch_controller::{LocalExecutor, Reconciler, Scheduler};
use dispatch_core::Requirements;
use dispatch_executor::Registry;
use dispatch_receipt::ReceiptStore;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn node_for(server: &MockServer) -> ClusterNode {
    ClusterNode {
        node_id: "worker-1".to_string(),
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
    }
}

fn scheduler(server: &MockServer, tmp: &std::path::Path) -> Scheduler {
    let registry = Arc::new(WorkerRegistry::new(vec![node_for(server)]));
    let receipts = Arc::new(ReceiptStore::new(tmp));
    let reconciler = Reconciler::new(receipts.clone(), 0.05, 5.0);
    let local = LocalExecutor::new(Arc::new(Registry::new()), receipts);
    Scheduler::new(registry, reconciler, local, "s3cret", [])
}

#[tokio::test]
async fn successful_remote_submit_returns_remote_mode() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/job"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "idempotent": false,
            "cached_job_id": null,
            "job": {"job_id": "job1"},
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/job/job1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "job": {
                "status": "succeeded",
                "exit_code": 0,
                "run_id": "run1",
                "job_id": "job1",
                "started_at": "2026-01-01T00:00:00Z",
                "finished_at": "2026-01-01T00:00:01Z",
            },
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/job/job1/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/job/job1/artifacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "job_id": "job1",
            "status": "succeeded",
            "artifacts": [],
            "receipt_path": "",
        })))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let scheduler = scheduler(&server, tmp.path());

    let result = scheduler
        .submit_job(
            "run1",
            "job1",
            "FFMPEG_PROBE",
            &serde_json::json!({"x": 1}),
            &Requirements::default(),
            Some("a".repeat(16)),
            false,
            true,
        )
        .await;

    assert!(result.ok);
    assert_eq!(result.mode, "remote");
    assert_eq!(result.node_id, "worker-1");
    assert_eq!(result.status, "succeeded");
}

#[tokio::test]
async fn unreachable_worker_falls_back_to_local() {
    let server = MockServer::start().await;
    // No mocks registered: every request 404s, so the candidate is always rejected.

    let mut exec_registry = Registry::new();
    exec_registry.register("FFMPEG_PROBE", Box::new(dispatch_executor::EchoHandler));

    let worker_registry = Arc::new(WorkerRegistry::new(vec![node_for(&server)]));
    let tmp = tempfile::tempdir().unwrap();
    let receipts = Arc::new(ReceiptStore::new(tmp.path()));
    let reconciler = Reconciler::new(receipts.clone(), 0.05, 1.0);
    let local = LocalExecutor::new(Arc::new(exec_registry), receipts);
    let scheduler = Scheduler::new(worker_registry, reconciler, local, "s3cret", []);

    let result = scheduler
        .submit_job(
            "run1",
            "job1",
            "FFMPEG_PROBE",
            &serde_json::json!({}),
            &Requirements::default(),
            Some("a".repeat(16)),
            false,
            true,
        )
        .await;

    assert!(result.ok);
    assert_eq!(result.mode, "local");
    assert!(!result.message.is_empty(), "fallback should annotate the remote failure reason");
}

#[tokio::test]
async fn mac_only_step_never_contacts_a_worker() {
    let server = MockServer::start().await;
    let registry = Arc::new(WorkerRegistry::new(vec![node_for(&server)]));
    let tmp = tempfile::tempdir().unwrap();
    let receipts = Arc::new(ReceiptStore::new(tmp.path()));
    let reconciler = Reconciler::new(receipts.clone(), 0.05, 1.0);

    let mut exec_registry = Registry::new();
    exec_registry.register("DAVINCI_RENDER_FINAL", Box::new(dispatch_executor::EchoHandler));
    let local = LocalExecutor::new(Arc::new(exec_registry), receipts);
    let scheduler = Scheduler::new(registry, reconciler, local, "s3cret", ["DAVINCI_RENDER_FINAL".to_string()]);

    let result = scheduler
        .submit_job(
            "run1",
            "job1",
            "DAVINCI_RENDER_FINAL",
            &serde_json::json!({}),
            &Requirements::default(),
            Some("a".repeat(16)),
            false,
            true,
        )
        .await;

    assert_eq!(result.mode, "local");
    assert!(server.received_requests().await.unwrap().is_empty());
}

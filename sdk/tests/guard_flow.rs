#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use axum::routing::get;
use chainwatch_core::approval::ApprovalStore;
use chainwatch_core::config::PolicyConfig;
use chainwatch_core::config::PurposeRule;
use chainwatch_core::evaluator::Evaluator;
use chainwatch_core::evaluator::PolicyEngine;
use chainwatch_core::tracer::Tracer;
use chainwatch_protocol::Action;
use chainwatch_protocol::Decision;
use chainwatch_protocol::PolicyResult;
use chainwatch_protocol::TraceState;
use chainwatch_sdk::BlockedError;
use chainwatch_sdk::HttpGuard;
use chainwatch_sdk::RemoteEvaluator;
use chainwatch_sdk::SdkErr;
use chainwatch_sdk::ToolGuard;
use chainwatch_sdk::policy_middleware;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

fn default_guard() -> ToolGuard {
    let engine: Arc<dyn Evaluator> = Arc::new(PolicyEngine::new(PolicyConfig::default()));
    ToolGuard::new(engine, Arc::new(Tracer::new()))
}

#[tokio::test]
async fn denied_tool_is_never_invoked() {
    let guard = default_guard();
    let calls = AtomicUsize::new(0);

    let argv: Vec<String> = ["rm", "-rf", "/"].iter().map(|s| s.to_string()).collect();
    let err = guard
        .run(Action::command(&argv), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("ran".to_string())
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let SdkErr::Blocked(blocked) = err else {
        panic!("expected BlockedError, got {err:?}");
    };
    assert_eq!(blocked.decision, Decision::Deny);
    assert_eq!(blocked.policy_id, "denylist.block");
}

#[tokio::test]
async fn allowed_tool_runs_and_returns_output() {
    let guard = default_guard();
    let argv: Vec<String> = vec!["ls".to_string()];
    let output = guard
        .run(Action::command(&argv), || async { Ok("files".to_string()) })
        .await
        .unwrap();
    assert_eq!(output, "files");
}

#[tokio::test]
async fn approval_gate_requests_then_consumes() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ApprovalStore::open(dir.path()).unwrap());
    let engine: Arc<dyn Evaluator> = Arc::new(PolicyEngine::new(PolicyConfig {
        min_tier: 2,
        ..PolicyConfig::default()
    }));
    let guard =
        ToolGuard::new(engine, Arc::new(Tracer::new())).with_approvals(Arc::clone(&store));

    let action = || Action::file_read("/data/report.csv");

    // Not yet approved: blocked, and the request is on file.
    let err = guard
        .run(action(), || async { Ok("data".to_string()) })
        .await
        .unwrap_err();
    let SdkErr::Blocked(blocked) = err else {
        panic!("expected BlockedError");
    };
    let key = blocked.approval_key.unwrap();
    assert_eq!(key, "tier_2_action");
    assert_eq!(
        store.check(&key).unwrap(),
        chainwatch_core::ApprovalStatus::Pending
    );

    // Approved: runs once, consuming the grant.
    store.approve(&key, 0).unwrap();
    let output = guard
        .run(action(), || async { Ok("data".to_string()) })
        .await
        .unwrap();
    assert_eq!(output, "data");

    // The one-shot grant is spent.
    assert!(
        guard
            .run(action(), || async { Ok("data".to_string()) })
            .await
            .is_err()
    );
}

#[tokio::test]
async fn redactions_are_applied_to_tool_output() {
    let engine: Arc<dyn Evaluator> = Arc::new(PolicyEngine::new(PolicyConfig {
        rules: vec![PurposeRule {
            purpose: "*".to_string(),
            resource: "*salary*".to_string(),
            decision: "allow_with_redaction".to_string(),
            id: "salary".to_string(),
            redact: Some(vec!["jane".to_string()]),
            ..PurposeRule::default()
        }],
        ..PolicyConfig::default()
    }));
    let guard = ToolGuard::new(engine, Arc::new(Tracer::new()));

    let output = guard
        .run(Action::file_read("/data/hr/salary.csv"), || async {
            Ok("Jane,90000\nbob,80000".to_string())
        })
        .await
        .unwrap();
    assert_eq!(output, "[REDACTED],90000\nbob,80000");
}

#[tokio::test]
async fn middleware_returns_403_json_for_blocked_requests() {
    let engine: Arc<dyn Evaluator> = Arc::new(PolicyEngine::new(PolicyConfig {
        min_tier: 3,
        ..PolicyConfig::default()
    }));
    let guard = Arc::new(HttpGuard::new(engine, Arc::new(Tracer::new())));

    let app = Router::new()
        .route("/data", get(|| async { "ok" }))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&guard),
            policy_middleware,
        ));

    let response = app
        .oneshot(
            Request::builder()
                .uri("https://api.example.com/data")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["blocked"], true);
    assert_eq!(body["decision"], "deny");
    assert_eq!(body["policy_id"], "tier.guarded.deny");
}

#[tokio::test]
async fn middleware_forwards_allowed_requests() {
    let engine: Arc<dyn Evaluator> = Arc::new(PolicyEngine::new(PolicyConfig::default()));
    let guard = Arc::new(HttpGuard::new(engine, Arc::new(Tracer::new())));

    let app = Router::new()
        .route("/data", get(|| async { "ok" }))
        .layer(axum::middleware::from_fn_with_state(
            guard,
            policy_middleware,
        ));

    let response = app
        .oneshot(Request::builder().uri("/data").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn remote_evaluator_honors_the_result_contract() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/evaluate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "decision": "require_approval",
            "tier": 2,
            "reason": "needs eyes",
            "policy_id": "tier.guarded.approval",
            "approval_key": "tier_2_action",
        })))
        .mount(&server)
        .await;

    let remote = RemoteEvaluator::new(server.uri());
    let state = TraceState::new("t");
    let result: PolicyResult = remote
        .evaluate_async(&Action::file_read("/data/x"), &state)
        .await;
    assert_eq!(result.decision, Decision::RequireApproval);
    assert_eq!(result.approval_key.as_deref(), Some("tier_2_action"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_evaluator_plugs_into_the_tool_guard() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/evaluate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "decision": "deny",
            "tier": 3,
            "reason": "remote policy says no",
            "policy_id": "remote.deny",
        })))
        .mount(&server)
        .await;

    // The remote client sits behind the same seam as the in-process
    // engine.
    let engine: Arc<dyn Evaluator> = Arc::new(RemoteEvaluator::new(server.uri()));
    let guard = ToolGuard::new(engine, Arc::new(Tracer::new()));
    let calls = AtomicUsize::new(0);

    let err = guard
        .run(Action::file_read("/data/x"), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("out".to_string())
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let SdkErr::Blocked(blocked) = err else {
        panic!("expected BlockedError, got {err:?}");
    };
    assert_eq!(blocked.decision, Decision::Deny);
    assert_eq!(blocked.policy_id, "remote.deny");
    assert_eq!(blocked.reason, "remote policy says no");
}

#[tokio::test]
async fn unreachable_remote_fails_closed() {
    // Nothing listens here.
    let remote = RemoteEvaluator::new("http://127.0.0.1:9");
    let state = TraceState::new("t");
    let result = remote
        .evaluate_async(&Action::file_read("/data/x"), &state)
        .await;
    assert_eq!(result.decision, Decision::Deny);
    assert_eq!(result.policy_id, "failclosed.unreachable");
    assert_eq!(result.tier, 3);
}

#[tokio::test]
async fn blocked_error_displays_reason_and_policy() {
    let blocked = BlockedError {
        action: Action::file_read("/x"),
        decision: Decision::Deny,
        reason: "nope".to_string(),
        policy_id: "denylist.block".to_string(),
        approval_key: None,
    };
    assert_eq!(
        blocked.to_string(),
        "blocked by chainwatch: nope (policy: denylist.block)"
    );
}

//! Axum middleware that maps each request onto an action and refuses the
//! handler with a 403 JSON body when policy blocks it.

use std::sync::Arc;

use axum::Json;
use axum::extract::Request;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::HOST;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use chainwatch_core::evaluator::Evaluator;
use chainwatch_core::tracer::Tracer;
use chainwatch_protocol::Action;
use chainwatch_protocol::Decision;
use chainwatch_protocol::EgressScope;
use serde::Serialize;
use tracing::debug;

#[derive(Clone)]
pub struct HttpGuard {
    pub engine: Arc<dyn Evaluator>,
    pub tracer: Arc<Tracer>,
}

impl HttpGuard {
    pub fn new(engine: Arc<dyn Evaluator>, tracer: Arc<Tracer>) -> Self {
        Self { engine, tracer }
    }
}

/// The body returned alongside the 403.
#[derive(Debug, Clone, Serialize)]
pub struct BlockedBody {
    pub blocked: bool,
    pub decision: Decision,
    pub reason: String,
    pub policy_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_key: Option<String>,
}

/// Build the action for a request: `http` tool, full URL resource, the
/// method as operation, and external egress unless the host is loopback.
pub fn action_from_request(request: &Request) -> Action {
    let uri = request.uri();
    let host = uri
        .host()
        .map(str::to_string)
        .or_else(|| {
            request
                .headers()
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(':').next().unwrap_or("").to_string())
        })
        .unwrap_or_default();

    let mut action = Action::http(request.method().as_str(), uri.to_string());
    let loopback = host.is_empty()
        || host == "localhost"
        || host.starts_with("127.")
        || host == "::1"
        || host == "[::1]";
    if !loopback {
        action.meta.egress = EgressScope::External;
    }
    action
}

pub async fn policy_middleware(
    State(guard): State<Arc<HttpGuard>>,
    request: Request,
    next: Next,
) -> Response {
    let action = action_from_request(&request);
    let result = guard.tracer.evaluate(guard.engine.as_ref(), &action);
    debug!(
        resource = %action.resource,
        decision = %result.decision,
        policy_id = %result.policy_id,
        "request evaluated"
    );

    if result.decision.is_blocking() {
        let body = BlockedBody {
            blocked: true,
            decision: result.decision,
            reason: result.reason,
            policy_id: result.policy_id,
            approval_key: result.approval_key,
        };
        return (StatusCode::FORBIDDEN, Json(body)).into_response();
    }
    next.run(request).await
}

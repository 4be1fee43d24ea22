//! HTTP client for a separate policy server, honoring the same result
//! contract as the in-process engine. Any transport failure is a deny:
//! an unreachable policy service never means "go ahead".

use chainwatch_core::evaluator::Evaluator;
use chainwatch_protocol::Action;
use chainwatch_protocol::PolicyResult;
use chainwatch_protocol::TraceState;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::runtime::RuntimeFlavor;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RemoteEvaluator {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct EvaluateRequest<'a> {
    action: &'a Action,
    state: &'a TraceState,
}

impl RemoteEvaluator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn evaluate_async(&self, action: &Action, state: &TraceState) -> PolicyResult {
        match self.try_evaluate(action, state).await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "remote policy evaluation failed; failing closed");
                PolicyResult::deny(
                    3,
                    format!("policy endpoint unreachable: {err}"),
                    "failclosed.unreachable",
                )
            }
        }
    }

    async fn try_evaluate(
        &self,
        action: &Action,
        state: &TraceState,
    ) -> Result<PolicyResult, reqwest::Error> {
        let url = format!("{}/evaluate", self.base_url.trim_end_matches('/'));
        self.client
            .post(url)
            .json(&EvaluateRequest { action, state })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

impl Evaluator for RemoteEvaluator {
    /// Synchronous bridge so a remote engine drops into the same seam as
    /// the in-process one (`ToolGuard`, the HTTP middleware). The worker
    /// parks on the ambient multi-thread runtime while the request is in
    /// flight. The endpoint owns the trace-state transition; the local
    /// state travels as context and is not mutated here.
    fn evaluate(&self, action: &Action, state: &mut TraceState) -> PolicyResult {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(self.evaluate_async(action, state)))
            }
            _ => {
                warn!("no multi-thread runtime available for remote evaluation; failing closed");
                PolicyResult::deny(
                    3,
                    "policy endpoint unreachable: no async runtime to issue the request",
                    "failclosed.unreachable",
                )
            }
        }
    }
}

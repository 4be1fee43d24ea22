//! The in-process tool guard. Evaluates an action on its trace before the
//! wrapped tool function runs; blocked calls never reach the tool.

use std::future::Future;
use std::sync::Arc;

use chainwatch_core::approval::ApprovalStatus;
use chainwatch_core::approval::ApprovalStore;
use chainwatch_core::audit::AuditChain;
use chainwatch_core::error::ChainwatchErr;
use chainwatch_core::evaluator::Evaluator;
use chainwatch_core::tracer::Tracer;
use chainwatch_protocol::Action;
use chainwatch_protocol::Decision;
use chainwatch_protocol::PolicyResult;
use thiserror::Error;
use tracing::debug;

/// A decision that stopped the tool from running, with everything the
/// host application needs to explain or escalate it.
#[derive(Error, Debug, Clone)]
#[error("blocked by chainwatch: {reason} (policy: {policy_id})")]
pub struct BlockedError {
    pub action: Action,
    pub decision: Decision,
    pub reason: String,
    pub policy_id: String,
    pub approval_key: Option<String>,
}

impl BlockedError {
    fn from_result(action: &Action, result: &PolicyResult) -> Self {
        Self {
            action: action.clone(),
            decision: result.decision,
            reason: result.reason.clone(),
            policy_id: result.policy_id.clone(),
            approval_key: result.approval_key.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SdkErr {
    #[error(transparent)]
    Blocked(#[from] BlockedError),

    #[error(transparent)]
    Core(#[from] ChainwatchErr),

    /// The wrapped tool itself failed after being allowed to run.
    #[error("tool error: {0}")]
    Tool(#[source] anyhow::Error),
}

pub struct ToolGuard {
    engine: Arc<dyn Evaluator>,
    tracer: Arc<Tracer>,
    approvals: Option<Arc<ApprovalStore>>,
    audit: Option<(Arc<AuditChain>, String)>,
}

impl ToolGuard {
    pub fn new(engine: Arc<dyn Evaluator>, tracer: Arc<Tracer>) -> Self {
        Self {
            engine,
            tracer,
            approvals: None,
            audit: None,
        }
    }

    /// Gate RequireApproval decisions on this store instead of blocking
    /// them outright.
    pub fn with_approvals(mut self, store: Arc<ApprovalStore>) -> Self {
        self.approvals = Some(store);
        self
    }

    /// Record every decision to the audit chain under `policy_hash`.
    pub fn with_audit(mut self, chain: Arc<AuditChain>, policy_hash: impl Into<String>) -> Self {
        self.audit = Some((chain, policy_hash.into()));
        self
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    /// Evaluate `action`, then run `tool_fn` if policy allows it.
    pub async fn run<F, Fut>(&self, action: Action, tool_fn: F) -> Result<String, SdkErr>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
    {
        let result = self.tracer.evaluate(self.engine.as_ref(), &action);
        debug!(
            tool = %action.tool,
            decision = %result.decision,
            policy_id = %result.policy_id,
            "tool call evaluated"
        );
        self.record(&action, &result).await?;

        match result.decision {
            Decision::Allow => tool_fn().await.map_err(SdkErr::Tool),
            Decision::AllowWithRedaction => {
                let output = tool_fn().await.map_err(SdkErr::Tool)?;
                Ok(redact(
                    output,
                    result.redactions.as_deref().unwrap_or_default(),
                ))
            }
            Decision::RewriteOutput => Ok(result.output_rewrite.clone().unwrap_or_default()),
            Decision::Deny => Err(BlockedError::from_result(&action, &result).into()),
            Decision::RequireApproval => {
                if self.approval_granted(&result)? {
                    tool_fn().await.map_err(SdkErr::Tool)
                } else {
                    Err(BlockedError::from_result(&action, &result).into())
                }
            }
        }
    }

    /// True when the key is approved right now; consumes it. Otherwise
    /// records the request (idempotently) and reports not-granted.
    fn approval_granted(&self, result: &PolicyResult) -> Result<bool, SdkErr> {
        let Some(store) = &self.approvals else {
            return Ok(false);
        };
        let key = match &result.approval_key {
            Some(key) => key.clone(),
            None => format!("tier_{}_action", result.tier),
        };
        let status = match store.check(&key) {
            Ok(status) => status,
            Err(ChainwatchErr::NotFound(_)) => ApprovalStatus::Pending,
            Err(err) => return Err(err.into()),
        };
        if status == ApprovalStatus::Approved {
            store.consume(&key)?;
            return Ok(true);
        }
        store.request(&key, &result.reason, &result.policy_id, "")?;
        Ok(false)
    }

    async fn record(&self, action: &Action, result: &PolicyResult) -> Result<(), SdkErr> {
        let Some((chain, policy_hash)) = &self.audit else {
            return Ok(());
        };
        let chain = Arc::clone(chain);
        let trace_id = self.tracer.trace_id();
        let action = action.clone();
        let result = result.clone();
        let policy_hash = policy_hash.clone();
        tokio::task::spawn_blocking(move || {
            chain.append(&trace_id, &action, &result, &policy_hash)
        })
        .await
        .map_err(|err| SdkErr::Tool(err.into()))??;
        Ok(())
    }
}

const REDACTION_MARKER: &str = "[REDACTED]";

/// ASCII-case-insensitive replacement of each pattern with the redaction
/// marker. Search resumes after each replacement so a marker that happens
/// to contain a pattern cannot loop.
fn redact(output: String, patterns: &[String]) -> String {
    let mut redacted = output;
    for pattern in patterns {
        if pattern.is_empty() {
            continue;
        }
        let needle = pattern.to_ascii_lowercase();
        let mut from = 0;
        loop {
            let lowered = redacted.to_ascii_lowercase();
            let Some(rel) = lowered[from..].find(&needle) else {
                break;
            };
            let at = from + rel;
            redacted.replace_range(at..at + needle.len(), REDACTION_MARKER);
            from = at + REDACTION_MARKER.len();
        }
    }
    redacted
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn redaction_is_case_insensitive_and_repeats() {
        let out = redact(
            "key=SeCrEt123 other secret123 tail".to_string(),
            &["secret123".to_string()],
        );
        assert_eq!(out, "key=[REDACTED] other [REDACTED] tail");
    }

    #[test]
    fn empty_patterns_leave_output_alone() {
        assert_eq!(redact("x".to_string(), &[]), "x");
        assert_eq!(redact("x".to_string(), &[String::new()]), "x");
    }
}

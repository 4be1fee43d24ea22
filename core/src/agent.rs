//! Per-agent scope enforcement. Active only when the caller identifies
//! itself with a non-empty agent id; everything about it fails closed —
//! an id with no registry, or a registry without the id, is a deny.

use std::collections::BTreeMap;

use chainwatch_protocol::Action;
use chainwatch_protocol::Decision;
use chainwatch_protocol::PolicyResult;
use tracing::debug;

use crate::config::AgentPolicy;
use crate::util::glob_match;

/// Check `action` against the registry entry for `agent_id`.
///
/// `Some(result)` is terminal; `None` falls through to the purpose-bound
/// rules and tier enforcement of the main pipeline.
pub fn guard(
    agents: &BTreeMap<String, AgentPolicy>,
    agent_id: &str,
    action: &Action,
    tier: u8,
) -> Option<PolicyResult> {
    if agents.is_empty() {
        return Some(PolicyResult::deny(
            tier,
            "agent id supplied but no agent registry is configured",
            "agent.no_config",
        ));
    }
    let Some(policy) = agents.get(agent_id) else {
        return Some(PolicyResult::deny(
            tier,
            format!("agent '{agent_id}' is not registered"),
            "agent.unknown",
        ));
    };

    let purpose = action.purpose();
    if !purpose.is_empty() {
        let allowed = policy
            .purposes
            .iter()
            .any(|p| p == "*" || p.eq_ignore_ascii_case(purpose));
        if !allowed {
            return Some(PolicyResult::deny(
                tier,
                format!("purpose '{purpose}' is outside agent '{agent_id}' scope"),
                format!("agent.{agent_id}.purpose_denied"),
            ));
        }
    }

    if !policy.allow_resources.is_empty()
        && !policy
            .allow_resources
            .iter()
            .any(|p| glob_match(p, &action.resource))
    {
        return Some(PolicyResult::deny(
            tier,
            format!("resource '{}' is outside agent '{agent_id}' scope", action.resource),
            format!("agent.{agent_id}.scope_denied"),
        ));
    }

    if let Some(cap) = policy.max_sensitivity
        && action.meta.sensitivity.rank() > cap.rank()
    {
        return Some(PolicyResult::deny(
            tier,
            format!(
                "action sensitivity {} exceeds agent '{agent_id}' cap {cap}",
                action.meta.sensitivity
            ),
            format!("agent.{agent_id}.sensitivity_denied"),
        ));
    }

    // Per-agent rules: first match wins and is terminal.
    for rule in &policy.rules {
        if !glob_match(&rule.resource, &action.resource) {
            continue;
        }
        debug!(agent = agent_id, pattern = %rule.resource, "agent rule matched");
        let decision = Decision::parse(&rule.decision);
        let reason = if rule.reason.is_empty() {
            format!("agent rule '{}' matched", rule.resource)
        } else {
            rule.reason.clone()
        };
        let mut result = PolicyResult::new(
            decision,
            tier,
            reason,
            format!("agent.{agent_id}.{}", rule.resource),
        );
        if decision == Decision::RequireApproval {
            result.approval_key = Some(
                rule.approval_key
                    .clone()
                    .unwrap_or_else(|| format!("agent_{agent_id}_approval")),
            );
        }
        return Some(result);
    }

    None
}

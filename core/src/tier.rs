//! Tier classification and enforcement. The tier usually equals the
//! trace's boundary level; self-targeting actions and the profile floor
//! promote it, and only the known-safe command set keeps a tier-0 action
//! at zero.

use chainwatch_protocol::Action;
use chainwatch_protocol::PolicyResult;
use chainwatch_protocol::ToolKind;
use chainwatch_protocol::TraceState;

use crate::config::EnforcementMode;
use crate::config::PolicyConfig;
use crate::config::Thresholds;
use crate::denylist::KNOWN_SAFE_COMMANDS;

/// Substrings that mark an action as aimed at chainwatch itself. An agent
/// that edits the policy file or kills the wrapper is escalated straight
/// to tier 3.
const SELF_TARGET_PATTERNS: &[&str] = &["chainwatch", ".chainwatch/", "chainwatch.yaml"];

pub fn is_self_targeting(action: &Action) -> bool {
    let resource = action.resource.to_lowercase();
    if SELF_TARGET_PATTERNS.iter().any(|p| resource.contains(p)) {
        return true;
    }
    // Streaming callers carry the original model tool name through params.
    action
        .params
        .get("tool_name")
        .is_some_and(|name| name.to_lowercase().contains("chainwatch"))
}

/// True only for plain invocations of the fixed read-only command set.
pub fn is_known_safe(action: &Action) -> bool {
    if action.tool != ToolKind::Command {
        return false;
    }
    let argv = shlex::split(&action.resource).unwrap_or_default();
    match argv.first() {
        Some(cmd0) => KNOWN_SAFE_COMMANDS.contains(&cmd0.as_str()),
        None => false,
    }
}

pub fn classify_tier(state: &TraceState, action: &Action, cfg: &PolicyConfig) -> u8 {
    let mut tier = state.zone.as_tier();
    if is_self_targeting(action) {
        tier = 3;
    }
    // Unknowns are elevated, not free.
    if tier == 0 && !is_known_safe(action) {
        tier = 1;
    }
    tier = tier.max(cfg.sensitivity_weights.weight(state.max_sensitivity));
    tier = tier.max(cfg.min_tier);
    tier.min(3)
}

/// Translate a tier into a decision under the given enforcement mode.
pub fn enforce(mode: EnforcementMode, thresholds: &Thresholds, tier: u8) -> PolicyResult {
    let (default_allow_max, default_approval_max) = mode.default_thresholds();
    let allow_max = thresholds.allow_max.unwrap_or(default_allow_max);
    let approval_max = thresholds
        .approval_min
        .unwrap_or(default_approval_max)
        .max(allow_max);

    if tier <= allow_max {
        PolicyResult::allow(
            tier,
            format!("tier {tier} within {mode} allow threshold"),
            format!("tier.{mode}.allow"),
        )
    } else if tier <= approval_max {
        PolicyResult::require_approval(
            tier,
            format!("tier {tier} requires approval in {mode} mode"),
            format!("tier.{mode}.approval"),
            format!("tier_{tier}_action"),
        )
    } else {
        PolicyResult::deny(
            tier,
            format!("tier {tier} denied in {mode} mode"),
            format!("tier.{mode}.deny"),
        )
    }
}

//! Session budgets and tool-category rate windows. Both resolve their
//! configuration by agent id with a `*` fallback, and both surface
//! exhaustion as a Deny decision rather than an error.

use std::collections::BTreeMap;

use chainwatch_protocol::PolicyResult;
use chainwatch_protocol::TraceState;
use chrono::DateTime;
use chrono::Utc;
use tracing::debug;

use crate::config::BudgetCfg;
use crate::config::RateLimitCfg;

fn resolve<'a, T>(map: &'a BTreeMap<String, T>, agent_id: &str) -> Option<(&'a str, &'a T)> {
    if !agent_id.is_empty()
        && let Some((key, value)) = map.get_key_value(agent_id)
    {
        return Some((key.as_str(), value));
    }
    map.get_key_value("*").map(|(k, v)| (k.as_str(), v))
}

/// Check-and-count for one tool category. Exceeding the window is a deny;
/// otherwise the counter ticks and the action proceeds. The counter ticks
/// on every pass-through check, so it measures attempt rate: an action a
/// later pipeline step denies has still spent its slot.
pub fn check_rate_limit(
    cfgs: &BTreeMap<String, RateLimitCfg>,
    state: &mut TraceState,
    category: &str,
    now: DateTime<Utc>,
) -> Option<PolicyResult> {
    let (label, cfg) = resolve(cfgs, &state.agent_id)?;
    if cfg.max_requests == 0 {
        return None;
    }

    let elapsed = (now - state.rate_limit_window_start).num_seconds();
    if elapsed >= cfg.window_secs as i64 {
        state.reset_rate_window(now);
    }

    if state.tool_count(category) >= cfg.max_requests {
        debug!(agent = label, category, "rate window exhausted");
        return Some(PolicyResult::deny(
            state.zone.as_tier(),
            format!(
                "{category} calls exceeded {} per {}s window",
                cfg.max_requests, cfg.window_secs
            ),
            format!("ratelimit.{label}.{category}_exceeded"),
        ));
    }

    state.bump_tool_count(category);
    None
}

/// First exceeded dimension wins, in the fixed order bytes, rows,
/// duration. A zero cap disables its dimension.
pub fn check_budget(
    budgets: &BTreeMap<String, BudgetCfg>,
    state: &TraceState,
    now: DateTime<Utc>,
    tier: u8,
) -> Option<PolicyResult> {
    let (label, cfg) = resolve(budgets, &state.agent_id)?;

    if cfg.max_bytes > 0 && state.volume_bytes > cfg.max_bytes {
        return Some(PolicyResult::deny(
            tier,
            format!(
                "session moved {} bytes, over the {} byte budget",
                state.volume_bytes, cfg.max_bytes
            ),
            format!("budget.{label}.bytes_exceeded"),
        ));
    }
    if cfg.max_rows > 0 && state.volume_rows > cfg.max_rows {
        return Some(PolicyResult::deny(
            tier,
            format!(
                "session touched {} rows, over the {} row budget",
                state.volume_rows, cfg.max_rows
            ),
            format!("budget.{label}.rows_exceeded"),
        ));
    }
    let elapsed_secs = (now - state.started_at).num_seconds().max(0) as u64;
    if cfg.max_duration_secs > 0 && elapsed_secs > cfg.max_duration_secs {
        return Some(PolicyResult::deny(
            tier,
            format!(
                "session has run {elapsed_secs}s, over the {}s budget",
                cfg.max_duration_secs
            ),
            format!("budget.{label}.duration_exceeded"),
        ));
    }
    None
}

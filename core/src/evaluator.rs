//! The ordered policy pipeline.
//!
//! Steps run in a fixed order and each may return early: rate limit,
//! denylist, zone detection (which commits the trace-state mutation),
//! tier classification, agent guard, budget, purpose-bound rules, and
//! finally tier enforcement. Purpose and agent rules can force an Allow
//! past the tier tables; nothing can override the denylist except the
//! rate limiter, which has already spent the attempt before the denylist
//! is consulted.

use std::path::Path;

use chainwatch_protocol::Action;
use chainwatch_protocol::Decision;
use chainwatch_protocol::PolicyResult;
use chainwatch_protocol::TraceState;
use chrono::DateTime;
use chrono::Utc;
use tracing::debug;
use tracing::trace;

use crate::agent;
use crate::audit::EMPTY_SHA256;
use crate::audit::sha256_hex;
use crate::boundary;
use crate::config::PolicyConfig;
use crate::denylist::Denylist;
use crate::error::Result;
use crate::limits;
use crate::tier;
use crate::util::glob_match;
use crate::zones;

/// Anything that can turn an action plus trace state into a decision.
/// The in-process [`PolicyEngine`] is the default implementation; a
/// remote policy client is another. Implementations must be pure CPU --
/// the pipeline is synchronous by contract.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, action: &Action, state: &mut TraceState) -> PolicyResult;
}

/// Immutable-after-load policy tables plus the hash of the bytes they
/// were loaded from. Safe to share across threads without locking.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    cfg: PolicyConfig,
    denylist: Denylist,
    policy_hash: String,
}

impl PolicyEngine {
    /// Engine over an in-memory config. The policy hash records the
    /// sentinel, marking decisions made on defaults.
    pub fn new(cfg: PolicyConfig) -> Self {
        let denylist = Denylist::with_config(&cfg.denylist);
        Self {
            cfg,
            denylist,
            policy_hash: EMPTY_SHA256.to_string(),
        }
    }

    /// Engine over a config parsed from `bytes`; the hash pins the exact
    /// policy text every audit entry was decided under.
    pub fn with_policy_bytes(cfg: PolicyConfig, bytes: &[u8]) -> Self {
        let mut engine = Self::new(cfg);
        engine.policy_hash = sha256_hex(bytes);
        engine
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let (cfg, bytes) = PolicyConfig::load(path)?;
        Ok(Self::with_policy_bytes(cfg, &bytes))
    }

    /// `~/.chainwatch/policy.yaml` when present, defaults otherwise.
    pub fn load_default() -> Result<Self> {
        let (cfg, bytes) = PolicyConfig::load_default()?;
        Ok(match bytes {
            Some(bytes) => Self::with_policy_bytes(cfg, &bytes),
            None => Self::new(cfg),
        })
    }

    pub fn cfg(&self) -> &PolicyConfig {
        &self.cfg
    }

    pub fn policy_hash(&self) -> &str {
        &self.policy_hash
    }

    /// The pipeline with an injected clock, so replays and tests are
    /// deterministic. Given the same action, prior state, policy, and
    /// clock, the result is a pure function.
    pub fn evaluate_at(
        &self,
        action: &Action,
        state: &mut TraceState,
        now: DateTime<Utc>,
    ) -> PolicyResult {
        trace!(tool = %action.tool, resource = %action.resource, "evaluating action");

        // Rate window first: an exhausted agent does not get to probe
        // anything else, denylist included.
        let category = action.tool.to_string();
        if let Some(result) = limits::check_rate_limit(&self.cfg.rate_limits, state, &category, now)
        {
            return result;
        }

        if let Some(hit) = self.denylist.is_blocked(&action.resource, action.tool) {
            debug!(pattern = %hit.pattern, "denylist hit");
            return PolicyResult::deny(
                3,
                format!(
                    "resource matches denylist {} pattern '{}'",
                    hit.category, hit.pattern
                ),
                "denylist.block",
            );
        }

        // Zone detection commits this action to the trace: zones union
        // in, the boundary ladder ratchets, volumes and sources
        // accumulate.
        let detected = zones::detect_zones(action, state);
        state.enter_zones(&detected);
        state.raise_boundary(boundary::compute_level(&state.zones_entered));
        state.absorb_meta(&action.meta);
        state.record_source(action.source_key());

        let tier = tier::classify_tier(state, action, &self.cfg);

        if !state.agent_id.is_empty() {
            let agent_id = state.agent_id.clone();
            if let Some(result) = agent::guard(&self.cfg.agents, &agent_id, action, tier) {
                return result;
            }
        }

        if !self.cfg.budgets.is_empty()
            && let Some(result) = limits::check_budget(&self.cfg.budgets, state, now, tier)
        {
            return result;
        }

        if let Some(result) = self.match_purpose_rules(action, tier) {
            return result;
        }

        tier::enforce(self.cfg.enforcement_mode, &self.cfg.thresholds, tier)
    }

    /// First matching purpose-bound rule, if any. Terminal on match.
    fn match_purpose_rules(&self, action: &Action, tier: u8) -> Option<PolicyResult> {
        let purpose = action.purpose();
        for rule in &self.cfg.rules {
            let purpose_ok = rule.purpose.is_empty()
                || rule.purpose == "*"
                || rule.purpose.eq_ignore_ascii_case(purpose);
            if !purpose_ok || !glob_match(&rule.resource, &action.resource) {
                continue;
            }

            let rule_purpose = if rule.purpose.is_empty() {
                "*"
            } else {
                rule.purpose.as_str()
            };
            let rule_id = if rule.id.is_empty() {
                "rule"
            } else {
                rule.id.as_str()
            };
            let policy_id = format!("purpose.{rule_purpose}.{rule_id}");
            debug!(policy_id, "purpose rule matched");

            let decision = Decision::parse(&rule.decision);
            let reason = if decision == Decision::Deny
                && !rule.decision.trim().eq_ignore_ascii_case("deny")
            {
                format!(
                    "unknown decision '{}' in rule {policy_id}; failing closed",
                    rule.decision
                )
            } else if rule.reason.is_empty() {
                format!("matched rule {policy_id}")
            } else {
                rule.reason.clone()
            };

            let mut result = PolicyResult::new(decision, tier, reason, policy_id);
            match decision {
                Decision::RequireApproval => {
                    result.approval_key = Some(
                        rule.approval_key
                            .clone()
                            .unwrap_or_else(|| format!("tier_{tier}_action")),
                    );
                }
                Decision::AllowWithRedaction => {
                    result.redactions = rule.redact.clone();
                }
                Decision::RewriteOutput => {
                    result.output_rewrite = rule.rewrite.clone();
                }
                Decision::Allow | Decision::Deny => {}
            }
            return Some(result);
        }
        None
    }
}

impl Evaluator for PolicyEngine {
    fn evaluate(&self, action: &Action, state: &mut TraceState) -> PolicyResult {
        self.evaluate_at(action, state, Utc::now())
    }
}

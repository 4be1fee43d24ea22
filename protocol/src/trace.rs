use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::action::EgressScope;
use crate::action::Meta;
use crate::action::Sensitivity;
use crate::zones::BoundaryZone;
use crate::zones::Zone;

/// Per-session accumulated state. A trace only ever escalates: zones
/// accumulate, the boundary ladder and `max_sensitivity` are monotone, and
/// egress flips internal-to-external exactly once. All mutation goes
/// through the methods below; none of them can move the state backwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceState {
    pub trace_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub agent_id: String,
    /// One entry per distinct `tool:prefix` source, in first-seen order.
    pub seen_sources: Vec<String>,
    pub max_sensitivity: Sensitivity,
    pub volume_bytes: u64,
    pub volume_rows: u64,
    pub egress: EgressScope,
    pub zone: BoundaryZone,
    pub zones_entered: BTreeSet<Zone>,
    pub started_at: DateTime<Utc>,
    pub tool_call_counts: BTreeMap<String, u32>,
    pub rate_limit_window_start: DateTime<Utc>,
}

impl TraceState {
    pub fn new(trace_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self::new_at(trace_id, now)
    }

    pub fn new_at(trace_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            trace_id: trace_id.into(),
            session_id: String::new(),
            agent_id: String::new(),
            seen_sources: Vec::new(),
            max_sensitivity: Sensitivity::Low,
            volume_bytes: 0,
            volume_rows: 0,
            egress: EgressScope::Internal,
            zone: BoundaryZone::Safe,
            zones_entered: BTreeSet::new(),
            started_at: now,
            tool_call_counts: BTreeMap::new(),
            rate_limit_window_start: now,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Union newly detected zones into the trace. Accumulate-only.
    pub fn enter_zones(&mut self, zones: &BTreeSet<Zone>) {
        self.zones_entered.extend(zones.iter().copied());
    }

    /// Raise the boundary ladder; downgrade attempts are a no-op.
    pub fn raise_boundary(&mut self, level: BoundaryZone) {
        self.zone = self.zone.max(level);
    }

    pub fn record_sensitivity(&mut self, sensitivity: Sensitivity) {
        self.max_sensitivity = self.max_sensitivity.max(sensitivity);
    }

    /// Internal-to-external is one-way; an external trace stays external.
    pub fn record_egress(&mut self, egress: EgressScope) {
        if egress == EgressScope::External {
            self.egress = EgressScope::External;
        }
    }

    /// Fold an action's metadata into the monotone volume counters.
    pub fn absorb_meta(&mut self, meta: &Meta) {
        self.volume_bytes = self.volume_bytes.saturating_add(meta.bytes);
        self.volume_rows = self.volume_rows.saturating_add(meta.rows);
        self.record_sensitivity(meta.sensitivity);
        self.record_egress(meta.egress);
    }

    /// Record a distinct source key, preserving first-seen order.
    pub fn record_source(&mut self, key: String) {
        if !self.seen_sources.contains(&key) {
            self.seen_sources.push(key);
        }
    }

    /// Reset per-window rate counters. Called by the rate limiter when the
    /// window has elapsed.
    pub fn reset_rate_window(&mut self, now: DateTime<Utc>) {
        self.tool_call_counts.clear();
        self.rate_limit_window_start = now;
    }

    pub fn bump_tool_count(&mut self, category: &str) -> u32 {
        let count = self.tool_call_counts.entry(category.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn tool_count(&self, category: &str) -> u32 {
        self.tool_call_counts.get(category).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn boundary_never_decreases() {
        let mut state = TraceState::new("trace-1");
        state.raise_boundary(BoundaryZone::Commitment);
        assert_eq!(state.zone, BoundaryZone::Commitment);
        state.raise_boundary(BoundaryZone::Sensitive);
        assert_eq!(state.zone, BoundaryZone::Commitment);
        state.raise_boundary(BoundaryZone::Irreversible);
        assert_eq!(state.zone, BoundaryZone::Irreversible);
    }

    #[test]
    fn zones_only_accumulate() {
        let mut state = TraceState::new("trace-1");
        state.enter_zones(&[Zone::CredentialAdjacent].into_iter().collect());
        state.enter_zones(&[Zone::EgressCapable].into_iter().collect());
        state.enter_zones(&BTreeSet::new());
        assert!(state.zones_entered.contains(&Zone::CredentialAdjacent));
        assert!(state.zones_entered.contains(&Zone::EgressCapable));
        assert_eq!(state.zones_entered.len(), 2);
    }

    #[test]
    fn egress_is_one_way() {
        let mut state = TraceState::new("trace-1");
        state.record_egress(EgressScope::External);
        state.record_egress(EgressScope::Internal);
        assert_eq!(state.egress, EgressScope::External);
    }

    #[test]
    fn sensitivity_is_monotone() {
        let mut state = TraceState::new("trace-1");
        state.record_sensitivity(Sensitivity::High);
        state.record_sensitivity(Sensitivity::Low);
        assert_eq!(state.max_sensitivity, Sensitivity::High);
    }

    #[test]
    fn sources_dedupe_in_order() {
        let mut state = TraceState::new("trace-1");
        state.record_source("command:ls".to_string());
        state.record_source("http:https://example.com".to_string());
        state.record_source("command:ls".to_string());
        assert_eq!(
            state.seen_sources,
            vec!["command:ls", "http:https://example.com"]
        );
    }

    #[test]
    fn volumes_saturate_instead_of_overflowing() {
        let mut state = TraceState::new("trace-1");
        state.volume_bytes = u64::MAX - 1;
        state.absorb_meta(&Meta {
            bytes: 100,
            ..Meta::default()
        });
        assert_eq!(state.volume_bytes, u64::MAX);
    }
}

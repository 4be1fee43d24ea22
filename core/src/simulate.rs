//! Offline policy replay: "what would this policy have decided?"
//!
//! Entries are read from an audit log, grouped by trace id, and replayed
//! in file order against a candidate engine with a fresh trace state per
//! trace. Each trace's first entry timestamp seeds its `started_at`, so
//! duration budgets replay faithfully.

use std::collections::BTreeMap;
use std::path::Path;

use chainwatch_protocol::Decision;
use chainwatch_protocol::TraceState;
use serde::Deserialize;
use serde::Serialize;

use crate::audit::AuditChain;
use crate::audit::AuditEntry;
use crate::error::Result;
use crate::evaluator::PolicyEngine;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub decision: Decision,
    pub tier: u8,
    pub policy_id: String,
}

/// One audit entry whose replayed decision differs from the recorded one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    /// Zero-based position in the audit log.
    pub index: usize,
    pub trace_id: String,
    pub resource: String,
    pub recorded: DecisionSummary,
    pub replayed: DecisionSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    pub total: usize,
    pub changed: Vec<DiffEntry>,
}

impl DiffReport {
    pub fn is_unchanged(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Replay `entries` under `engine` and report every divergence in
/// `(decision, tier, policy_id)`.
pub fn replay(entries: &[AuditEntry], engine: &PolicyEngine) -> DiffReport {
    let mut states: BTreeMap<String, TraceState> = BTreeMap::new();
    let mut changed = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let state = states
            .entry(entry.trace_id.clone())
            .or_insert_with(|| TraceState::new_at(entry.trace_id.clone(), entry.ts));
        let result = engine.evaluate_at(&entry.action, state, entry.ts);

        let recorded = DecisionSummary {
            decision: entry.decision,
            tier: entry.tier,
            policy_id: entry.policy_id.clone(),
        };
        let replayed = DecisionSummary {
            decision: result.decision,
            tier: result.tier,
            policy_id: result.policy_id,
        };
        if recorded != replayed {
            changed.push(DiffEntry {
                index,
                trace_id: entry.trace_id.clone(),
                resource: entry.action.resource.clone(),
                recorded,
                replayed,
            });
        }
    }

    DiffReport {
        total: entries.len(),
        changed,
    }
}

pub fn simulate_file(audit_path: &Path, engine: &PolicyEngine) -> Result<DiffReport> {
    let entries = AuditChain::open(audit_path)?.read_entries()?;
    Ok(replay(&entries, engine))
}

//! Session accumulator. A `Tracer` owns one trace's state plus an
//! ordered event log of every evaluated action. The state mutex is the
//! serialization point the trace model requires: no evaluation starts
//! before the previous one has committed its state mutation.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use chainwatch_protocol::Action;
use chainwatch_protocol::Decision;
use chainwatch_protocol::PolicyResult;
use chainwatch_protocol::TraceState;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::evaluator::Evaluator;

/// One evaluated action, as recorded on the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub ts: DateTime<Utc>,
    pub action: Action,
    pub decision: Decision,
    pub tier: u8,
    pub reason: String,
    pub policy_id: String,
}

/// Point-in-time copy of a trace, for debugging and offline replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSnapshot {
    pub state: TraceState,
    pub events: Vec<TraceEvent>,
}

#[derive(Debug)]
pub struct Tracer {
    state: Mutex<TraceState>,
    events: Mutex<Vec<TraceEvent>>,
}

impl Tracer {
    pub fn new() -> Self {
        let state = TraceState::new(Self::new_trace_id()).with_session(Self::new_session_id());
        Self::with_state(state)
    }

    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        let state = TraceState::new(Self::new_trace_id())
            .with_session(Self::new_session_id())
            .with_agent(agent_id);
        Self::with_state(state)
    }

    pub fn with_state(state: TraceState) -> Self {
        Self {
            state: Mutex::new(state),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn new_trace_id() -> String {
        format!("trace-{:016x}", rand::random::<u64>())
    }

    pub fn new_session_id() -> String {
        format!("sess-{:016x}", rand::random::<u64>())
    }

    pub fn trace_id(&self) -> String {
        self.lock_state().trace_id.clone()
    }

    /// Evaluate one action against this trace. Holding the state lock
    /// across evaluation and event append makes decisions linearizable
    /// with respect to state updates.
    pub fn evaluate(&self, evaluator: &dyn Evaluator, action: &Action) -> PolicyResult {
        let mut state = self.lock_state();
        let result = evaluator.evaluate(action, &mut state);
        self.lock_events().push(TraceEvent {
            ts: Utc::now(),
            action: action.clone(),
            decision: result.decision,
            tier: result.tier,
            reason: result.reason.clone(),
            policy_id: result.policy_id.clone(),
        });
        result
    }

    pub fn snapshot(&self) -> TraceSnapshot {
        let state = self.lock_state().clone();
        let events = self.lock_events().clone();
        TraceSnapshot { state, events }
    }

    fn lock_state(&self) -> MutexGuard<'_, TraceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_events(&self) -> MutexGuard<'_, Vec<TraceEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

//! Shared vocabulary for the chainwatch policy layer.
//!
//! Every surface (command wrapper, SDK guard, streaming interceptor) builds
//! an [`Action`], hands it to an evaluator together with a [`TraceState`],
//! and gets a [`PolicyResult`] back. The monotonicity invariants of the
//! trace model are enforced by the mutators on [`TraceState`] so that no
//! caller can roll a session back to a less escalated posture.

mod action;
mod decision;
mod trace;
mod zones;

pub use action::Action;
pub use action::EgressScope;
pub use action::Meta;
pub use action::Operation;
pub use action::Sensitivity;
pub use action::ToolKind;
pub use decision::Decision;
pub use decision::PolicyResult;
pub use trace::TraceState;
pub use zones::BoundaryZone;
pub use zones::Zone;

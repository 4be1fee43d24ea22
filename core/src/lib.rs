//! Root of the `chainwatch-core` library.
//!
//! Everything the three enforcement surfaces share lives here: the
//! ordered policy pipeline, the trace accumulator, the streaming
//! reassembler/rewriter, the audit hash chain, and the approval store.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output belongs to the binaries.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod agent;
pub mod approval;
pub mod audit;
pub mod boundary;
pub mod config;
pub mod denylist;
pub mod error;
pub mod evaluator;
pub mod flags;
pub mod limits;
pub mod simulate;
pub mod stream;
pub mod tier;
pub mod tracer;
pub mod util;
pub mod zones;

pub use chainwatch_protocol as protocol;

pub use approval::ApprovalStatus;
pub use approval::ApprovalStore;
pub use audit::AuditChain;
pub use audit::AuditEntry;
pub use audit::ChainReport;
pub use config::EnforcementMode;
pub use config::PolicyConfig;
pub use denylist::Denylist;
pub use error::ChainwatchErr;
pub use error::Result;
pub use evaluator::Evaluator;
pub use evaluator::PolicyEngine;
pub use tracer::Tracer;

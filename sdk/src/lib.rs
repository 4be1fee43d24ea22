//! In-process SDK surface: wrap tool functions with the policy guard,
//! guard HTTP handlers with an axum middleware, or delegate evaluation
//! to a remote policy endpoint with fail-closed semantics.

mod guard;
mod middleware;
mod remote;

pub use guard::BlockedError;
pub use guard::SdkErr;
pub use guard::ToolGuard;
pub use middleware::BlockedBody;
pub use middleware::HttpGuard;
pub use middleware::action_from_request;
pub use middleware::policy_middleware;
pub use remote::RemoteEvaluator;

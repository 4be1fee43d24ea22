use std::path::PathBuf;
use std::time::Duration;

use env_flags::env_flags;

env_flags! {
    /// Path to the chainwatch binary, for shell wrappers that re-exec it.
    pub CHAINWATCH_BIN: &str = "chainwatch";

    /// Overrides the default audit log location.
    pub AUDIT_LOG: Option<&str> = None;

    /// Overrides `~/.chainwatch` as the state directory.
    pub CHAINWATCH_HOME: Option<&str> = None;

    pub CHAINWATCH_STREAM_IDLE_TIMEOUT_MS: Duration = Duration::from_millis(300_000), |value| {
        value.parse().map(Duration::from_millis)
    };
}

/// State directory holding the policy file, pending approvals, and the
/// default audit log. `CHAINWATCH_HOME` wins over `~/.chainwatch`; when
/// neither resolves we fall back to the current directory so the store
/// still works in containers without a home.
pub fn chainwatch_home() -> PathBuf {
    if let Some(home) = *CHAINWATCH_HOME {
        return PathBuf::from(home);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".chainwatch"),
        None => PathBuf::from(".chainwatch"),
    }
}

/// Default audit log path, honoring the `AUDIT_LOG` override.
pub fn default_audit_log() -> PathBuf {
    match *AUDIT_LOG {
        Some(path) => PathBuf::from(path),
        None => chainwatch_home().join("audit.jsonl"),
    }
}

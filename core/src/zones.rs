//! Deterministic pattern-to-zone detection. All table rules are
//! independent (no ordering between them); their results are unioned.
//! The two derived zones run after the table because they also look at
//! accumulated trace state.

use std::collections::BTreeSet;

use chainwatch_protocol::Action;
use chainwatch_protocol::Operation;
use chainwatch_protocol::ToolKind;
use chainwatch_protocol::TraceState;
use chainwatch_protocol::Zone;

const COMMERCIAL_INTENT: &[&str] = &[
    "/pricing", "/products", "/shop", "/store", "pricing", "catalog",
];

const COMMERCIAL_COMMIT: &[&str] = &[
    "/cart",
    "/checkout",
    "/payment",
    "/billing",
    "stripe.com",
    "paypal.com",
    "paddle.com",
];

const CREDENTIAL_ADJACENT: &[&str] = &[
    ".ssh/",
    ".aws/",
    ".config/gcloud/",
    ".env",
    "secrets.",
    "credentials.",
];

const SENSITIVE_DATA: &[&str] = &[
    "/hr/",
    "/employee/",
    "/salary/",
    "/payroll/",
    "/pii/",
    "hr_",
    "employee",
    "salary",
    "payroll",
    "pii",
    "ssn",
    "passport",
];

const EGRESS_TOOLS: &[&str] = &["curl", "wget", "nc", "telnet"];

const MAIL_TOOLS: &[&str] = &["smtp", "sendmail"];

/// Volume ceiling beyond which a trace enters `high_volume`.
pub const HIGH_VOLUME_BYTES: u64 = 10_000_000;

/// Run every zone rule against the action and union the results.
pub fn detect_zones(action: &Action, state: &TraceState) -> BTreeSet<Zone> {
    let resource = action.resource.to_lowercase();
    // Tool name and resource are one haystack for the tool-shaped rules.
    let haystack = format!("{} {resource}", action.tool);

    let mut zones = BTreeSet::new();
    if contains_any(&resource, COMMERCIAL_INTENT) {
        zones.insert(Zone::CommercialIntent);
    }
    if contains_any(&resource, COMMERCIAL_COMMIT) {
        zones.insert(Zone::CommercialCommit);
    }
    if contains_any(&resource, CREDENTIAL_ADJACENT) {
        zones.insert(Zone::CredentialAdjacent);
    }
    if contains_any(&resource, SENSITIVE_DATA) {
        zones.insert(Zone::SensitiveData);
    }
    if is_url(&resource) || contains_any(&haystack, EGRESS_TOOLS) {
        zones.insert(Zone::EgressCapable);
    }
    let mutating = matches!(
        action.operation,
        Operation::Post | Operation::Put | Operation::Delete
    );
    if (mutating && is_external_url(&resource)) || contains_any(&haystack, MAIL_TOOLS) {
        zones.insert(Zone::EgressActive);
    }

    // Derived: reading credential material. Fires on the action that
    // newly touches a credential path, or on a later read of one once the
    // trace is already credential-adjacent.
    let is_read = action.operation == Operation::Read || action.tool == ToolKind::FileRead;
    if is_read {
        let newly_adjacent = zones.contains(&Zone::CredentialAdjacent);
        let rereading = state.zones_entered.contains(&Zone::CredentialAdjacent)
            && contains_any(&resource, CREDENTIAL_ADJACENT);
        if newly_adjacent || rereading {
            zones.insert(Zone::CredentialExposed);
        }
    }

    // Derived: cumulative volume, counting the bytes this action is about
    // to move.
    if state.volume_bytes.saturating_add(action.meta.bytes) > HIGH_VOLUME_BYTES {
        zones.insert(Zone::HighVolume);
    }

    zones
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn is_url(resource: &str) -> bool {
    resource.starts_with("http://") || resource.starts_with("https://")
}

fn is_external_url(resource: &str) -> bool {
    if !is_url(resource) {
        return false;
    }
    let host = resource
        .split("://")
        .nth(1)
        .unwrap_or("")
        .split(['/', '?'])
        .next()
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("");
    let internal = host == "localhost"
        || host == "0.0.0.0"
        || host == "[::1]"
        || host.starts_with("127.")
        || host.ends_with(".internal")
        || host.ends_with(".local");
    !host.is_empty() && !internal
}

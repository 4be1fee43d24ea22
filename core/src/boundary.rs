//! Zone set to irreversibility level. The rule table is data; the highest
//! matching level wins, and the caller folds the result into the trace
//! with a monotonic max.

use std::collections::BTreeSet;

use chainwatch_protocol::BoundaryZone;
use chainwatch_protocol::Zone;

const RULES: &[(&[Zone], BoundaryZone)] = &[
    (&[Zone::CommercialCommit], BoundaryZone::Irreversible),
    (
        &[Zone::CredentialExposed, Zone::EgressActive],
        BoundaryZone::Irreversible,
    ),
    (
        &[Zone::SensitiveData, Zone::HighVolume, Zone::EgressActive],
        BoundaryZone::Irreversible,
    ),
    (
        &[Zone::CommercialIntent, Zone::CommercialCommit],
        BoundaryZone::Commitment,
    ),
    (
        &[Zone::CredentialAdjacent, Zone::EgressCapable],
        BoundaryZone::Commitment,
    ),
    (
        &[Zone::SensitiveData, Zone::EgressCapable],
        BoundaryZone::Sensitive,
    ),
];

/// Highest level whose zone requirements are all present.
pub fn compute_level(zones: &BTreeSet<Zone>) -> BoundaryZone {
    RULES
        .iter()
        .filter(|(required, _)| required.iter().all(|z| zones.contains(z)))
        .map(|(_, level)| *level)
        .max()
        .unwrap_or(BoundaryZone::Safe)
}

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

/// Fine-grained categorical zones a trace can enter. Zones only ever
/// accumulate on a trace; there is no way to leave one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Zone {
    CommercialIntent,
    CommercialCommit,
    CredentialAdjacent,
    CredentialExposed,
    EgressCapable,
    EgressActive,
    SensitiveData,
    HighVolume,
}

/// Coarse irreversibility ladder derived from the zones a trace has
/// entered. Strictly monotonic: [`crate::TraceState::raise_boundary`]
/// ignores downgrades.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BoundaryZone {
    #[default]
    Safe = 0,
    Sensitive = 1,
    Commitment = 2,
    Irreversible = 3,
}

impl BoundaryZone {
    pub fn as_tier(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn boundary_zone_orders_by_severity() {
        assert!(BoundaryZone::Safe < BoundaryZone::Sensitive);
        assert!(BoundaryZone::Sensitive < BoundaryZone::Commitment);
        assert!(BoundaryZone::Commitment < BoundaryZone::Irreversible);
        assert_eq!(BoundaryZone::Irreversible.as_tier(), 3);
    }

    #[test]
    fn zone_serializes_snake_case() {
        let json = serde_json::to_string(&Zone::CredentialAdjacent).unwrap_or_default();
        assert_eq!(json, "\"credential_adjacent\"");
        assert_eq!(Zone::EgressActive.to_string(), "egress_active");
    }
}

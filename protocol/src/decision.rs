use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

/// Terminal verdict for a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
    AllowWithRedaction,
    RequireApproval,
    RewriteOutput,
}

impl Decision {
    /// Fail-closed parse: any decision string we do not recognize is a
    /// `Deny`. Policy files cannot smuggle in a permissive default by way
    /// of a typo.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Self::Allow,
            "deny" => Self::Deny,
            "allow_with_redaction" => Self::AllowWithRedaction,
            "require_approval" => Self::RequireApproval,
            "rewrite_output" => Self::RewriteOutput,
            _ => Self::Deny,
        }
    }

    /// True when the caller must not run the tool as-is.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Deny | Self::RequireApproval)
    }
}

/// The evaluator's full answer: what to do, how severe the action was
/// judged, and the stable dotted identifier of the rule that decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub decision: Decision,
    pub tier: u8,
    pub reason: String,
    pub policy_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redactions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_rewrite: Option<String>,
}

impl PolicyResult {
    pub fn new(
        decision: Decision,
        tier: u8,
        reason: impl Into<String>,
        policy_id: impl Into<String>,
    ) -> Self {
        Self {
            decision,
            tier,
            reason: reason.into(),
            policy_id: policy_id.into(),
            approval_key: None,
            redactions: None,
            output_rewrite: None,
        }
    }

    pub fn allow(tier: u8, reason: impl Into<String>, policy_id: impl Into<String>) -> Self {
        Self::new(Decision::Allow, tier, reason, policy_id)
    }

    pub fn deny(tier: u8, reason: impl Into<String>, policy_id: impl Into<String>) -> Self {
        Self::new(Decision::Deny, tier, reason, policy_id)
    }

    pub fn require_approval(
        tier: u8,
        reason: impl Into<String>,
        policy_id: impl Into<String>,
        approval_key: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(Decision::RequireApproval, tier, reason, policy_id);
        result.approval_key = Some(approval_key.into());
        result
    }

    pub fn with_approval_key(mut self, key: impl Into<String>) -> Self {
        self.approval_key = Some(key.into());
        self
    }

    pub fn with_redactions(mut self, redactions: Vec<String>) -> Self {
        self.redactions = Some(redactions);
        self
    }

    pub fn with_output_rewrite(mut self, text: impl Into<String>) -> Self {
        self.output_rewrite = Some(text.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn unknown_decision_strings_fail_closed() {
        assert_eq!(Decision::parse("allow"), Decision::Allow);
        assert_eq!(Decision::parse("ALLOW"), Decision::Allow);
        assert_eq!(Decision::parse("require_approval"), Decision::RequireApproval);
        assert_eq!(Decision::parse("permit"), Decision::Deny);
        assert_eq!(Decision::parse(""), Decision::Deny);
        assert_eq!(Decision::parse("allow pretty please"), Decision::Deny);
    }

    #[test]
    fn optional_fields_are_omitted_from_wire_form() {
        let result = PolicyResult::allow(0, "ok", "tier.guarded.allow");
        let json = serde_json::to_string(&result).unwrap_or_default();
        assert!(!json.contains("approval_key"));
        assert!(!json.contains("redactions"));

        let result = PolicyResult::require_approval(2, "hold", "tier.guarded.approval", "k");
        let json = serde_json::to_string(&result).unwrap_or_default();
        assert!(json.contains("\"approval_key\":\"k\""));
    }
}

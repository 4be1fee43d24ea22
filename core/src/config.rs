//! Policy configuration surface.
//!
//! The config file is YAML, conventionally at `~/.chainwatch/policy.yaml`.
//! Every section has a safe default, so an absent or empty file yields a
//! usable guarded-mode policy. The exact bytes loaded are kept around so
//! the audit chain can record a hash of the policy that produced each
//! decision.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use chainwatch_protocol::Sensitivity;
use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

use crate::error::Result;
use crate::flags::chainwatch_home;

/// How tier classifications translate into decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EnforcementMode {
    /// Observe only; every tier is allowed.
    Advisory,
    /// Tiers 0-1 allowed, 2 needs approval, 3 denied.
    #[default]
    Guarded,
    /// Tier 0 allowed, 1 needs approval, 2-3 denied.
    Locked,
}

impl EnforcementMode {
    /// `(allow_max, approval_max)`: tiers up to `allow_max` pass, tiers up
    /// to `approval_max` require approval, everything above is denied.
    pub fn default_thresholds(self) -> (u8, u8) {
        match self {
            Self::Advisory => (3, 3),
            Self::Guarded => (1, 2),
            Self::Locked => (0, 1),
        }
    }
}

/// Optional overrides for the per-mode tier boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub allow_max: Option<u8>,
    pub approval_min: Option<u8>,
}

/// Tier floor contributed by a trace's accumulated sensitivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityWeights {
    pub low: u8,
    pub medium: u8,
    pub high: u8,
}

impl Default for SensitivityWeights {
    fn default() -> Self {
        Self {
            low: 0,
            medium: 1,
            high: 2,
        }
    }
}

impl SensitivityWeights {
    pub fn weight(&self, sensitivity: Sensitivity) -> u8 {
        match sensitivity {
            Sensitivity::Low => self.low,
            Sensitivity::Medium => self.medium,
            Sensitivity::High => self.high,
        }
    }
}

/// A purpose-bound rule. Matches when the rule's purpose equals the
/// action's declared purpose (or is `*`) and the resource pattern matches.
/// First match wins; the decision string is parsed fail-closed at use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurposeRule {
    pub purpose: String,
    pub resource: String,
    pub decision: String,
    /// Suffix of the stable policy id (`purpose.<purpose>.<id>`).
    pub id: String,
    pub reason: String,
    pub approval_key: Option<String>,
    pub redact: Option<Vec<String>>,
    pub rewrite: Option<String>,
}

/// A per-agent rule, keyed by its resource pattern. Terminal on match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentRule {
    pub resource: String,
    pub decision: String,
    pub reason: String,
    pub approval_key: Option<String>,
}

/// Scope and caps for one registered agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentPolicy {
    /// Allowed purposes; `*` allows any.
    pub purposes: Vec<String>,
    /// Resource patterns the agent may touch; empty means unrestricted.
    pub allow_resources: Vec<String>,
    pub max_sensitivity: Option<Sensitivity>,
    pub rules: Vec<AgentRule>,
}

/// Per-session caps, keyed by agent id with `*` fallback. Zero disables a
/// dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetCfg {
    pub max_bytes: u64,
    pub max_rows: u64,
    pub max_duration_secs: u64,
}

/// Per-agent-per-tool-category rate window. Zero `max_requests` disables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitCfg {
    pub max_requests: u32,
    pub window_secs: u64,
}

/// Operator extensions to the built-in denylist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenylistCfg {
    pub commands: Vec<String>,
    pub urls: Vec<String>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub enforcement_mode: EnforcementMode,
    /// Profile floor: no action in this profile is classified below this
    /// tier.
    pub min_tier: u8,
    pub thresholds: Thresholds,
    pub sensitivity_weights: SensitivityWeights,
    pub rules: Vec<PurposeRule>,
    pub agents: BTreeMap<String, AgentPolicy>,
    pub budgets: BTreeMap<String, BudgetCfg>,
    pub rate_limits: BTreeMap<String, RateLimitCfg>,
    pub denylist: DenylistCfg,
}

impl PolicyConfig {
    pub fn from_yaml(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_slice(bytes)?)
    }

    /// Load a policy file, returning the parsed config together with the
    /// exact bytes read (for policy hashing).
    pub fn load(path: &Path) -> Result<(Self, Vec<u8>)> {
        let bytes = fs::read(path)?;
        let cfg = Self::from_yaml(&bytes)?;
        Ok((cfg, bytes))
    }

    pub fn default_path() -> PathBuf {
        chainwatch_home().join("policy.yaml")
    }

    /// Load `~/.chainwatch/policy.yaml` when present, otherwise defaults.
    /// The returned bytes are `None` for defaults so the audit chain can
    /// record the sentinel hash.
    pub fn load_default() -> Result<(Self, Option<Vec<u8>>)> {
        let path = Self::default_path();
        if path.is_file() {
            let (cfg, bytes) = Self::load(&path)?;
            Ok((cfg, Some(bytes)))
        } else {
            Ok((Self::default(), None))
        }
    }

    /// Resolve `--profile` to a policy path: an existing path is used
    /// directly, otherwise the name is looked up under
    /// `~/.chainwatch/profiles/`.
    pub fn resolve_profile(name: &str) -> PathBuf {
        let direct = PathBuf::from(name);
        if direct.is_file() {
            return direct;
        }
        chainwatch_home().join("profiles").join(format!("{name}.yaml"))
    }
}

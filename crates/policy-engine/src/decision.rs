use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse severity attached to a decision for audit and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule (or the default action) does with a capability invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Proceed.
    Allow,
    /// Refuse.
    Deny,
    /// Proceed, but the caller must elevate logging.
    Audit,
    /// Proceed only after an out-of-band confirmation step.
    Confirm,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Audit => "audit",
            Self::Confirm => "confirm",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of evaluating a capability invocation against the loaded policy.
///
/// Fields are private so that `allowed` and `action` can only be paired by
/// the named constructors: a decision that is not allowed always carries
/// [`Action::Deny`]. Deserialization checks the same pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDecision")]
pub struct Decision {
    allowed: bool,
    action: Action,
    reason: String,
    matched_rules: Vec<String>,
    risk_tier: RiskTier,
    requires_audit: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct RawDecision {
    allowed: bool,
    action: Action,
    reason: String,
    #[serde(default)]
    matched_rules: Vec<String>,
    risk_tier: RiskTier,
    requires_audit: bool,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl TryFrom<RawDecision> for Decision {
    type Error = String;

    fn try_from(raw: RawDecision) -> Result<Self, Self::Error> {
        if raw.allowed == (raw.action == Action::Deny) {
            return Err(format!(
                "allowed={} is inconsistent with action '{}'",
                raw.allowed, raw.action
            ));
        }
        if !raw.allowed && !raw.requires_audit {
            return Err("a denial must require audit".to_string());
        }
        Ok(Self {
            allowed: raw.allowed,
            action: raw.action,
            reason: raw.reason,
            matched_rules: raw.matched_rules,
            risk_tier: raw.risk_tier,
            requires_audit: raw.requires_audit,
            metadata: raw.metadata,
        })
    }
}

impl Decision {
    /// An allow decision. Audit is required only for high and critical tiers.
    pub fn allow(reason: impl Into<String>, risk_tier: RiskTier) -> Self {
        Self {
            allowed: true,
            action: Action::Allow,
            reason: reason.into(),
            matched_rules: Vec::new(),
            risk_tier,
            requires_audit: matches!(risk_tier, RiskTier::High | RiskTier::Critical),
            metadata: BTreeMap::new(),
        }
    }

    /// A deny decision. Denials are always audited.
    pub fn deny(reason: impl Into<String>, risk_tier: RiskTier) -> Self {
        Self {
            allowed: false,
            action: Action::Deny,
            reason: reason.into(),
            matched_rules: Vec::new(),
            risk_tier,
            requires_audit: true,
            metadata: BTreeMap::new(),
        }
    }

    /// Allowed pending confirmation by the caller's confirmation workflow.
    pub fn require_confirmation(reason: impl Into<String>, risk_tier: RiskTier) -> Self {
        Self {
            allowed: true,
            action: Action::Confirm,
            reason: reason.into(),
            matched_rules: Vec::new(),
            risk_tier,
            requires_audit: true,
            metadata: BTreeMap::new(),
        }
    }

    /// Allowed, with elevated audit logging.
    pub fn audit(reason: impl Into<String>, risk_tier: RiskTier) -> Self {
        Self {
            allowed: true,
            action: Action::Audit,
            reason: reason.into(),
            matched_rules: Vec::new(),
            risk_tier,
            requires_audit: true,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach the identifiers of the rules or conditions behind this decision.
    pub fn with_rules<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.matched_rules.extend(rules.into_iter().map(Into::into));
        self
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn allowed(&self) -> bool {
        self.allowed
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn matched_rules(&self) -> &[String] {
        &self.matched_rules
    }

    pub fn risk_tier(&self) -> RiskTier {
        self.risk_tier
    }

    pub fn requires_audit(&self) -> bool {
        self.requires_audit
    }

    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Human-readable, multi-line explanation suitable for operator output.
    pub fn explain(&self) -> String {
        let mut lines = Vec::with_capacity(4);
        if self.allowed {
            lines.push(format!("ALLOWED: {}", self.reason));
        } else {
            lines.push(format!("DENIED: {}", self.reason));
        }
        if !self.matched_rules.is_empty() {
            lines.push(format!("Matched rules: {}", self.matched_rules.join(", ")));
        }
        lines.push(format!("Risk tier: {}", self.risk_tier));
        if self.requires_audit {
            lines.push("Note: This action will be audit logged".to_string());
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_has_correct_fields() {
        let d = Decision::allow("no rules matched", RiskTier::Low);
        assert!(d.allowed());
        assert_eq!(d.action(), Action::Allow);
        assert!(d.matched_rules().is_empty());
        assert_eq!(d.reason(), "no rules matched");
        assert!(!d.requires_audit());
    }

    #[test]
    fn allow_at_high_tier_requires_audit() {
        assert!(Decision::allow("x", RiskTier::High).requires_audit());
        assert!(Decision::allow("x", RiskTier::Critical).requires_audit());
        assert!(!Decision::allow("x", RiskTier::Medium).requires_audit());
    }

    #[test]
    fn deny_is_never_allowed_and_always_audited() {
        let d = Decision::deny("blocked", RiskTier::Low);
        assert!(!d.allowed());
        assert_eq!(d.action(), Action::Deny);
        assert!(d.requires_audit());
    }

    #[test]
    fn confirm_and_audit_are_allowed_with_audit() {
        let c = Decision::require_confirmation("ask first", RiskTier::Medium);
        assert!(c.allowed());
        assert_eq!(c.action(), Action::Confirm);
        assert!(c.requires_audit());

        let a = Decision::audit("watch this", RiskTier::Medium);
        assert!(a.allowed());
        assert_eq!(a.action(), Action::Audit);
        assert!(a.requires_audit());
    }

    #[test]
    fn builders_attach_rules_and_metadata() {
        let d = Decision::deny("nope", RiskTier::High)
            .with_rules(["denied_path:/etc/shadow"])
            .with_metadata("path", serde_json::json!("/etc/shadow"));
        assert_eq!(d.matched_rules(), ["denied_path:/etc/shadow"]);
        assert_eq!(d.metadata()["path"], "/etc/shadow");
    }

    #[test]
    fn explain_mentions_outcome_rules_and_tier() {
        let d = Decision::deny("Path is read-only", RiskTier::Medium).with_rules(["read_only:/etc/**"]);
        let text = d.explain();
        assert!(text.starts_with("DENIED: Path is read-only"));
        assert!(text.contains("Matched rules: read_only:/etc/**"));
        assert!(text.contains("Risk tier: medium"));
        assert!(text.contains("audit logged"));
    }

    #[test]
    fn serializes_with_lowercase_enums() {
        let d = Decision::require_confirmation("confirm", RiskTier::Critical);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["action"], "confirm");
        assert_eq!(json["risk_tier"], "critical");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn deserialize_rejects_unpaired_allowed_and_action() {
        let bad = r#"{"allowed":false,"action":"allow","reason":"x","matched_rules":[],"risk_tier":"low","requires_audit":true}"#;
        assert!(serde_json::from_str::<Decision>(bad).is_err());

        let bad = r#"{"allowed":true,"action":"deny","reason":"x","matched_rules":[],"risk_tier":"low","requires_audit":true}"#;
        assert!(serde_json::from_str::<Decision>(bad).is_err());

        let unaudited = r#"{"allowed":false,"action":"deny","reason":"x","risk_tier":"high","requires_audit":false}"#;
        assert!(serde_json::from_str::<Decision>(unaudited).is_err());
    }

    #[test]
    fn deserialize_accepts_decisions_built_by_constructors() {
        let d = Decision::deny("blocked", RiskTier::High).with_rules(["r1"]);
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(serde_json::from_str::<Decision>(&json).unwrap(), d);

        let confirm = Decision::require_confirmation("confirm", RiskTier::Critical);
        let json = serde_json::to_string(&confirm).unwrap();
        assert_eq!(serde_json::from_str::<Decision>(&json).unwrap(), confirm);
    }

    #[test]
    fn risk_tiers_are_ordered() {
        assert!(RiskTier::Low < RiskTier::Medium);
        assert!(RiskTier::High < RiskTier::Critical);
    }
}

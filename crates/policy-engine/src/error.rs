use thiserror::Error;

use crate::decision::Decision;

/// Configuration errors. Raised while compiling a policy, never while
/// evaluating one.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A rule's `capability_pattern` is not a valid regular expression.
    #[error("rule '{rule}' has an invalid capability pattern '{pattern}': {source}")]
    InvalidRulePattern {
        rule: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A regex or glob inside a condition set is malformed.
    #[error("invalid {field} pattern '{pattern}': {reason}")]
    InvalidPattern {
        field: &'static str,
        pattern: String,
        reason: String,
    },

    /// An IP or CIDR entry in the network condition set is malformed.
    #[error("invalid {field} entry '{entry}': expected an IP address or CIDR range")]
    InvalidCidr { field: &'static str, entry: String },

    /// A rule's extra `conditions` entry has an unsupported shape.
    #[error("rule '{rule}' has an invalid condition '{key}': {reason}")]
    InvalidCondition {
        rule: String,
        key: String,
        reason: String,
    },

    /// A document-level check failed (version, rule names).
    #[error("policy validation failed: {0}")]
    Validation(String),
}

/// Raised by [`Engine::enforce`](crate::Engine::enforce) when a capability
/// invocation is not allowed.
#[derive(Debug, Error)]
#[error("policy violation: {}", .decision.reason())]
pub struct PolicyViolation {
    pub decision: Decision,
}

impl PolicyViolation {
    pub fn new(decision: Decision) -> Self {
        Self { decision }
    }
}

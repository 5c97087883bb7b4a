//! # policy-engine
//!
//! Capability-level access control for an autonomous agent. Before an
//! executor runs a capability it asks the [`Engine`] for a [`Decision`],
//! which says whether the call may proceed, needs confirmation or must be
//! audited, together with a risk tier and the rules behind it.
//!
//! Evaluation order is fixed: safe mode, then filesystem / command / network
//! / data conditions, then prioritized rules, then the default action.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use policy_engine::{loader, Engine};
//! use serde_json::json;
//!
//! let engine = Engine::new(loader::load_policy()).unwrap();
//! let decision = engine.evaluate(
//!     "filesystem_read",
//!     &json!({ "path": "/home/me/.ssh/id_rsa" }),
//!     &json!({}),
//! );
//! println!("{}", decision.explain());
//! ```

pub mod conditions;
mod decision;
mod error;
mod evaluator;
pub mod loader;
pub mod matcher;
pub mod rules;
mod schema;

// Re-export primary public API at crate root.
pub use conditions::{
    evaluate_command_condition, evaluate_data_condition, evaluate_filesystem_condition,
    evaluate_network_condition, CommandPolicy, DataPayload, DataPolicy, FileOperation,
    FilesystemPolicy, NetworkPolicy, NetworkTarget,
};
pub use decision::{Action, Decision, RiskTier};
pub use error::{PolicyError, PolicyViolation};
pub use evaluator::{is_high_risk_capability, CompiledPolicy, Engine};
pub use matcher::match_domain;
pub use schema::{
    CommandCondition, DataClassification, DataCondition, FilesystemCondition, NetworkCondition,
    PolicyConfiguration, Rule,
};

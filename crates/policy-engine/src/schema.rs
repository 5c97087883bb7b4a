use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::decision::Action;
use crate::error::PolicyError;

/// Top-level policy document. The engine treats it as read-only; a reload
/// replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfiguration {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Evaluated by descending priority; ties keep this order.
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub filesystem: FilesystemCondition,
    #[serde(default)]
    pub commands: CommandCondition,
    #[serde(default)]
    pub network: NetworkCondition,
    #[serde(default)]
    pub data: DataCondition,
    /// Applied when no rule decides.
    #[serde(default = "default_action")]
    pub default_action: Action,
    /// Blocks high-risk capabilities that no allow rule covers.
    #[serde(default = "default_true")]
    pub safe_mode: bool,
}

impl Default for PolicyConfiguration {
    fn default() -> Self {
        Self {
            version: default_version(),
            name: default_name(),
            description: String::new(),
            rules: Vec::new(),
            filesystem: FilesystemCondition::default(),
            commands: CommandCondition::default(),
            network: NetworkCondition::default(),
            data: DataCondition::default(),
            default_action: default_action(),
            safe_mode: true,
        }
    }
}

impl PolicyConfiguration {
    /// Enabled rules whose pattern matches `capability_name`, highest
    /// priority first.
    ///
    /// Patterns are compiled on every call, and an invalid one is reported
    /// rather than skipped. [`Engine::rules_for_capability`] answers the same
    /// question from its compiled rules.
    ///
    /// [`Engine::rules_for_capability`]: crate::Engine::rules_for_capability
    pub fn rules_for_capability(&self, capability_name: &str) -> Result<Vec<&Rule>, PolicyError> {
        let mut matching = Vec::new();
        for rule in self.rules.iter().filter(|r| r.enabled) {
            let re = Regex::new(&format!("^(?:{})", rule.capability_pattern)).map_err(|source| {
                PolicyError::InvalidRulePattern {
                    rule: rule.name.clone(),
                    pattern: rule.capability_pattern.clone(),
                    source,
                }
            })?;
            if re.is_match(capability_name) {
                matching.push(rule);
            }
        }
        matching.sort_by_key(|r| Reverse(r.priority));
        Ok(matching)
    }
}

/// A pattern-matched, prioritized mapping from capability name to action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique within a configuration.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Regular expression matched from the start of the capability name.
    pub capability_pattern: String,
    pub action: Action,
    /// Higher values are evaluated first.
    #[serde(default)]
    pub priority: i64,
    /// Extra predicates keyed `param.<name>` or `context.<name>`. A value is
    /// either matched for equality or, when it is a map, interpreted as a
    /// compound check with `regex`, `min`, `max` and `in` keys.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Rule {
    pub fn new(name: impl Into<String>, capability_pattern: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            capability_pattern: capability_pattern.into(),
            action,
            priority: 0,
            conditions: BTreeMap::new(),
            enabled: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, key: impl Into<String>, expected: serde_json::Value) -> Self {
        self.conditions.insert(key.into(), expected);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Condition sets
// ---------------------------------------------------------------------------

/// Filesystem access restrictions. Paths are glob patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesystemCondition {
    /// When non-empty, paths outside these globs are denied.
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default = "default_denied_paths")]
    pub denied_paths: Vec<String>,
    /// Only read and list operations are allowed here.
    #[serde(default = "default_read_only_paths")]
    pub read_only_paths: Vec<String>,
    #[serde(default = "default_true")]
    pub write_restricted: bool,
    #[serde(default = "default_write_allowed_paths")]
    pub write_allowed_paths: Vec<String>,
    #[serde(default)]
    pub allow_symlinks: bool,
    /// Bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for FilesystemCondition {
    fn default() -> Self {
        Self {
            allowed_paths: Vec::new(),
            denied_paths: default_denied_paths(),
            read_only_paths: default_read_only_paths(),
            write_restricted: true,
            write_allowed_paths: default_write_allowed_paths(),
            allow_symlinks: false,
            max_file_size: default_max_file_size(),
        }
    }
}

/// Shell command restrictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandCondition {
    /// Regexes; when non-empty, commands must match one of them.
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    /// Regexes searched anywhere in the command line.
    #[serde(default = "default_denied_commands")]
    pub denied_commands: Vec<String>,
    /// Literal substrings.
    #[serde(default = "default_denied_patterns")]
    pub denied_patterns: Vec<String>,
    #[serde(default)]
    pub allowed_cwd: Vec<String>,
    /// Seconds.
    #[serde(default = "default_max_timeout")]
    pub max_timeout: u64,
    #[serde(default = "default_true")]
    pub allow_pipes: bool,
    #[serde(default = "default_true")]
    pub allow_redirects: bool,
}

impl Default for CommandCondition {
    fn default() -> Self {
        Self {
            allowed_commands: Vec::new(),
            denied_commands: default_denied_commands(),
            denied_patterns: default_denied_patterns(),
            allowed_cwd: Vec::new(),
            max_timeout: default_max_timeout(),
            allow_pipes: true,
            allow_redirects: true,
        }
    }
}

/// Network egress restrictions.
///
/// Domain patterns accept an exact host, `*.suffix` or `.suffix`. IP entries
/// accept a single address or a CIDR range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkCondition {
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default = "default_denied_domains")]
    pub denied_domains: Vec<String>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub denied_ips: Vec<String>,
    /// Block private, loopback and link-local addresses.
    #[serde(default = "default_true")]
    pub block_private_ranges: bool,
    #[serde(default = "default_allowed_ports")]
    pub allowed_ports: Vec<u16>,
    #[serde(default = "default_denied_ports")]
    pub denied_ports: Vec<u16>,
    #[serde(default = "default_max_request_size")]
    pub max_request_size: u64,
    #[serde(default = "default_max_response_size")]
    pub max_response_size: u64,
}

impl Default for NetworkCondition {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            denied_domains: default_denied_domains(),
            allowed_ips: Vec::new(),
            denied_ips: Vec::new(),
            block_private_ranges: true,
            allowed_ports: default_allowed_ports(),
            denied_ports: default_denied_ports(),
            max_request_size: default_max_request_size(),
            max_response_size: default_max_response_size(),
        }
    }
}

/// Data classification and exfiltration restrictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCondition {
    #[serde(default = "default_max_classification")]
    pub max_classification: DataClassification,
    #[serde(default = "default_true")]
    pub block_exfiltration: bool,
    #[serde(default = "default_true")]
    pub block_pii: bool,
    #[serde(default = "default_sensitive_patterns")]
    pub sensitive_patterns: Vec<String>,
    #[serde(default)]
    pub allowed_export_domains: Vec<String>,
}

impl Default for DataCondition {
    fn default() -> Self {
        Self {
            max_classification: default_max_classification(),
            block_exfiltration: true,
            block_pii: true,
            sensitive_patterns: default_sensitive_patterns(),
            allowed_export_domains: Vec::new(),
        }
    }
}

/// Totally ordered: `public < internal < confidential < restricted`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DataClassification {
    Public,
    #[default]
    Internal,
    Confidential,
    Restricted,
}

impl DataClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Confidential => "confidential",
            Self::Restricted => "restricted",
        }
    }
}

impl fmt::Display for DataClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_version() -> String {
    "1.0".to_string()
}

fn default_name() -> String {
    "default".to_string()
}

fn default_action() -> Action {
    Action::Deny
}

fn default_true() -> bool {
    true
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_denied_paths() -> Vec<String> {
    strings(&[
        "/etc/shadow",
        "/etc/passwd",
        "**/.ssh/**",
        "**/.gnupg/**",
        "**/credentials*",
        "**/*.pem",
        "**/*.key",
        "**/secrets/**",
    ])
}

fn default_read_only_paths() -> Vec<String> {
    strings(&["/etc/**", "/usr/**", "/bin/**", "/sbin/**"])
}

fn default_write_allowed_paths() -> Vec<String> {
    strings(&["./workspace/**/*", "./**/*"])
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

fn default_denied_commands() -> Vec<String> {
    strings(&[
        r"^rm\s+-rf\s+/",
        r"^rm\s+-rf\s+/\*",
        r"^mkfs\.",
        r"^dd\s+if=",
        r":\(\)\{:\|:&\};:",
        r">\s*/dev/sd[a-z]",
        r"^chmod\s+777",
        r"^curl.*\|\s*(ba)?sh",
        r"^wget.*\|\s*(ba)?sh",
    ])
}

fn default_denied_patterns() -> Vec<String> {
    strings(&["rm -rf /", "> /dev/sda", ":(){ :|:& };:"])
}

fn default_max_timeout() -> u64 {
    300
}

fn default_denied_domains() -> Vec<String> {
    strings(&["*.onion", "localhost", "127.0.0.1", "0.0.0.0"])
}

fn default_allowed_ports() -> Vec<u16> {
    vec![80, 443, 8080, 8443]
}

fn default_denied_ports() -> Vec<u16> {
    // SSH, Telnet, SMTP, RDP
    vec![22, 23, 25, 3389]
}

fn default_max_request_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_response_size() -> u64 {
    100 * 1024 * 1024
}

fn default_max_classification() -> DataClassification {
    DataClassification::Internal
}

fn default_sensitive_patterns() -> Vec<String> {
    strings(&[
        r"(?i)api[_-]?key",
        r"(?i)secret[_-]?key",
        r"(?i)password",
        r"(?i)bearer\s+[a-zA-Z0-9\-_]+",
        r"(?i)authorization:\s*bearer",
        r"sk-[a-zA-Z0-9]{20,}",
        r"sk-ant-[a-zA-Z0-9\-]+",
        r"ghp_[a-zA-Z0-9]{36}",
        r"AKIA[0-9A-Z]{16}",
    ])
}

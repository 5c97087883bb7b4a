use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::conditions::resolve_path;
use crate::decision::Action;
use crate::evaluator::CompiledPolicy;
use crate::schema::{
    CommandCondition, DataCondition, FilesystemCondition, NetworkCondition, PolicyConfiguration,
    Rule,
};

/// Path of a policy file that takes precedence over the search paths.
pub const POLICY_PATH_ENV: &str = "AGENT_POLICY_PATH";
/// Overrides `safe_mode` from whichever policy was loaded.
pub const SAFE_MODE_ENV: &str = "AGENT_SAFE_MODE";
/// Workspace root used by [`default_policy`].
pub const WORKSPACE_DIR_ENV: &str = "AGENT_WORKSPACE_DIR";

/// Searched in order when no explicit path is configured.
pub const DEFAULT_POLICY_PATHS: &[&str] = &[
    "./agent_policy.yaml",
    "./config/agent_policy.yaml",
    "~/.config/agent/policy.yaml",
    "/etc/agent/policy.yaml",
];

/// Load a [`PolicyConfiguration`] from a YAML file on disk. A leading `~` is
/// expanded to the home directory.
pub fn load_policy_from_file(path: impl AsRef<Path>) -> Result<PolicyConfiguration> {
    let path = expand_home(path.as_ref());
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read policy file: {}", path.display()))?;
    let config = load_policy_from_str(&contents)
        .with_context(|| format!("failed to parse policy file: {}", path.display()))?;
    info!(path = %path.display(), policy = %config.name, "loaded policy file");
    Ok(config)
}

/// Parse and validate a [`PolicyConfiguration`] from a YAML string.
pub fn load_policy_from_str(yaml: &str) -> Result<PolicyConfiguration> {
    let config: PolicyConfiguration =
        serde_yml::from_str(yaml).context("YAML deserialization failed")?;
    validate(&config)?;
    Ok(config)
}

/// Load the file named by `AGENT_POLICY_PATH`. Returns `None` when the
/// variable is unset or the file cannot be loaded; failures are logged.
pub fn load_policy_from_env() -> Option<PolicyConfiguration> {
    load_policy_from_path_var(std::env::var(POLICY_PATH_ENV).ok())
}

fn load_policy_from_path_var(value: Option<String>) -> Option<PolicyConfiguration> {
    let path = value.filter(|v| !v.trim().is_empty())?;
    match load_policy_from_file(&path) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(path = %path, error = %format!("{e:#}"), "failed to load policy from {POLICY_PATH_ENV}");
            None
        }
    }
}

/// Resolve the active policy: `AGENT_POLICY_PATH`, then
/// [`DEFAULT_POLICY_PATHS`], then [`default_policy`]. Environment overrides
/// are applied last. Never fails.
pub fn load_policy() -> PolicyConfiguration {
    let config = load_policy_from_env()
        .or_else(|| load_first_existing(DEFAULT_POLICY_PATHS))
        .unwrap_or_else(|| {
            info!("no policy file found, using default policy");
            default_policy()
        });
    apply_env_overrides(config)
}

fn load_first_existing(candidates: &[&str]) -> Option<PolicyConfiguration> {
    candidates.iter().find_map(|candidate| {
        let path = expand_home(Path::new(candidate));
        if !path.exists() {
            return None;
        }
        match load_policy_from_file(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                debug!(path = %path.display(), error = %format!("{e:#}"), "skipping policy path");
                None
            }
        }
    })
}

/// Apply `AGENT_SAFE_MODE` on top of `config`. The values `0`, `false`,
/// `no`, `off` and the empty string disable safe mode; anything else
/// enables it.
pub fn apply_env_overrides(config: PolicyConfiguration) -> PolicyConfiguration {
    apply_safe_mode_override(config, std::env::var(SAFE_MODE_ENV).ok().as_deref())
}

fn apply_safe_mode_override(
    mut config: PolicyConfiguration,
    value: Option<&str>,
) -> PolicyConfiguration {
    if let Some(value) = value {
        let safe_mode = !matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "off" | ""
        );
        if safe_mode != config.safe_mode {
            info!(from = config.safe_mode, to = safe_mode, "{SAFE_MODE_ENV} override");
            config.safe_mode = safe_mode;
        }
    }
    config
}

/// The restrictive built-in policy. Shell commands and network egress are
/// blocked; filesystem access is limited to the workspace
/// (`AGENT_WORKSPACE_DIR`, default `./workspace`) and the current directory.
pub fn default_policy() -> PolicyConfiguration {
    let workspace =
        std::env::var(WORKSPACE_DIR_ENV).unwrap_or_else(|_| "./workspace".to_string());
    default_policy_for_workspace(&workspace)
}

fn default_policy_for_workspace(workspace: &str) -> PolicyConfiguration {
    let workspace_glob = format!("{}/**/*", absolute_glob_root(workspace));
    let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    PolicyConfiguration {
        version: "1.0".to_string(),
        name: "default-safe".to_string(),
        description: "Default safe mode policy - restrictive by default".to_string(),
        safe_mode: true,
        default_action: Action::Deny,
        rules: Vec::new(),
        filesystem: FilesystemCondition {
            allowed_paths: vec![
                workspace_glob.clone(),
                format!("{}/**/*", absolute_glob_root(".")),
            ],
            denied_paths: strings(&[
                "/etc/shadow",
                "/etc/passwd",
                "/etc/sudoers",
                "**/.ssh/id_*",
                "**/.ssh/authorized_keys",
                "**/.env",
                "**/*.pem",
                "**/*.key",
                "**/credentials*",
                "**/secrets*",
            ]),
            write_restricted: true,
            write_allowed_paths: vec![workspace_glob],
            ..FilesystemCondition::default()
        },
        commands: CommandCondition {
            allowed_commands: Vec::new(),
            denied_commands: strings(&[".*"]),
            denied_patterns: strings(&["rm -rf /", "> /dev/sda", ":(){ :|:& };:"]),
            ..CommandCondition::default()
        },
        network: NetworkCondition {
            allowed_domains: Vec::new(),
            denied_domains: strings(&["*"]),
            block_private_ranges: true,
            ..NetworkCondition::default()
        },
        data: DataCondition {
            sensitive_patterns: strings(&[
                r"-----BEGIN.*PRIVATE KEY-----",
                r"password\s*[=:]\s*\S+",
                r"api[_-]?key\s*[=:]\s*\S+",
                r"secret\s*[=:]\s*\S+",
                r"token\s*[=:]\s*\S+",
                r"\b[A-Za-z0-9+/]{40,}\b",
            ]),
            block_pii: true,
            ..DataCondition::default()
        },
    }
}

/// A development policy that allows nearly everything. Only for trusted
/// environments.
pub fn permissive_policy() -> PolicyConfiguration {
    PolicyConfiguration {
        version: "1.0".to_string(),
        name: "development".to_string(),
        description: "Permissive policy for development - use with caution".to_string(),
        safe_mode: false,
        default_action: Action::Allow,
        rules: vec![Rule::new("allow-all", ".*", Action::Allow)
            .with_description("Allow all capabilities (development mode)")],
        filesystem: FilesystemCondition {
            allowed_paths: vec!["**/*".to_string()],
            denied_paths: ["/etc/shadow", "/etc/passwd", "**/.ssh/id_*"]
                .map(String::from)
                .to_vec(),
            ..FilesystemCondition::default()
        },
        commands: CommandCondition {
            allowed_commands: vec![".*".to_string()],
            ..CommandCondition::default()
        },
        network: NetworkCondition {
            allowed_domains: vec!["*".to_string()],
            block_private_ranges: false,
            ..NetworkCondition::default()
        },
        data: DataCondition::default(),
    }
}

/// Layer `overlay` on top of `base`. Rules are merged by name with the
/// overlay's version winning in place; new rules are appended. Scalar fields
/// and condition sets come from the overlay.
pub fn merge_policies(
    base: PolicyConfiguration,
    overlay: PolicyConfiguration,
) -> PolicyConfiguration {
    let mut rules = base.rules;
    for rule in overlay.rules {
        match rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
    }
    PolicyConfiguration { rules, ..overlay }
}

/// Write `config` as YAML, creating parent directories as needed.
pub fn save_policy_to_file(config: &PolicyConfiguration, path: impl AsRef<Path>) -> Result<()> {
    let path = expand_home(path.as_ref());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    let yaml = serde_yml::to_string(config).context("YAML serialization failed")?;
    std::fs::write(&path, yaml)
        .with_context(|| format!("failed to write policy file: {}", path.display()))?;
    info!(path = %path.display(), policy = %config.name, "saved policy file");
    Ok(())
}

/// Run post-deserialization validation checks.
fn validate(config: &PolicyConfiguration) -> Result<()> {
    // Version gate
    let major = config.version.split('.').next().unwrap_or_default();
    if major != "1" {
        bail!(
            "unsupported policy version '{}'; only 1.x is supported",
            config.version
        );
    }

    // Rule names must be unique
    let mut seen = HashSet::new();
    for rule in &config.rules {
        if rule.name.trim().is_empty() {
            bail!("rule name must not be empty");
        }
        if !seen.insert(&rule.name) {
            bail!("duplicate rule name: '{}'", rule.name);
        }
    }

    CompiledPolicy::compile(config.clone()).context("policy does not compile")?;
    Ok(())
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

/// Absolute, glob-escaped form of `dir` for building path patterns.
fn absolute_glob_root(dir: &str) -> String {
    let absolute = resolve_path(dir).unwrap_or_else(|_| PathBuf::from(dir));
    globset::escape(absolute.to_string_lossy().trim_end_matches('/'))
}

use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::trace;

use crate::decision::{Decision, RiskTier};
use crate::error::PolicyError;
use crate::matcher::{compile_globs, NamedGlob};
use crate::schema::FilesystemCondition;

/// The kind of access a filesystem capability performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileOperation {
    Read,
    Write,
    Delete,
    List,
    Create,
    Modify,
}

impl FileOperation {
    /// Guess the operation from a capability name. Unknown names are treated
    /// as reads.
    pub fn infer(capability_name: &str) -> Self {
        let name = capability_name.to_ascii_lowercase();
        if name.contains("write") || name.contains("create") {
            Self::Write
        } else if name.contains("delete") || name.contains("remove") {
            Self::Delete
        } else if name.contains("list") {
            Self::List
        } else {
            Self::Read
        }
    }

    /// Operations refused on read-only paths.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Write | Self::Delete | Self::Create | Self::Modify)
    }

    fn writes_content(&self) -> bool {
        matches!(self, Self::Write | Self::Create | Self::Modify)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Create => "create",
            Self::Modify => "modify",
        }
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled form of [`FilesystemCondition`].
#[derive(Debug, Clone)]
pub struct FilesystemPolicy {
    allowed: Vec<NamedGlob>,
    denied: Vec<NamedGlob>,
    read_only: Vec<NamedGlob>,
    allow_symlinks: bool,
    max_file_size: u64,
}

impl FilesystemPolicy {
    pub fn compile(condition: &FilesystemCondition) -> Result<Self, PolicyError> {
        Ok(Self {
            allowed: compile_globs("allowed_paths", &condition.allowed_paths)?,
            denied: compile_globs("denied_paths", &condition.denied_paths)?,
            read_only: compile_globs("read_only_paths", &condition.read_only_paths)?,
            allow_symlinks: condition.allow_symlinks,
            max_file_size: condition.max_file_size,
        })
    }

    /// Check a single path access. `size` is the number of bytes about to be
    /// written, when known.
    pub fn evaluate(&self, path: &str, operation: FileOperation, size: Option<u64>) -> Decision {
        let resolved = match resolve_path(path) {
            Ok(p) => p,
            Err(reason) => {
                return Decision::deny(format!("Invalid path: {reason}"), RiskTier::High)
                    .with_rules(["invalid_path"]);
            }
        };
        let resolved_str = resolved.to_string_lossy();
        trace!(path, resolved = %resolved_str, %operation, "checking filesystem condition");

        if !self.allow_symlinks && is_symlink(path) {
            return Decision::deny(format!("Symlinks are not allowed: {path}"), RiskTier::Medium)
                .with_rules(["symlink"])
                .with_metadata("path", path.into());
        }

        let matches = |glob: &NamedGlob| glob.is_match(path) || glob.is_match(&resolved_str);

        if let Some(glob) = self.denied.iter().find(|g| matches(g)) {
            return Decision::deny(
                format!("Path matches denied pattern: {}", glob.pattern),
                RiskTier::High,
            )
            .with_rules([format!("denied_path:{}", glob.pattern)])
            .with_metadata("path", resolved_str.to_string().into());
        }

        if operation.is_mutating() {
            if let Some(glob) = self.read_only.iter().find(|g| matches(g)) {
                return Decision::deny(
                    format!("Path is read-only ({}), cannot {operation}", glob.pattern),
                    RiskTier::Medium,
                )
                .with_rules([format!("read_only:{}", glob.pattern)]);
            }
        }

        if operation.writes_content() {
            if let Some(size) = size.filter(|s| *s > self.max_file_size) {
                return Decision::deny(
                    format!(
                        "File size {size} bytes exceeds limit of {} bytes",
                        self.max_file_size
                    ),
                    RiskTier::Medium,
                )
                .with_rules(["max_file_size"]);
            }
        }

        if !self.allowed.is_empty() {
            return match self.allowed.iter().find(|g| matches(g)) {
                Some(glob) => Decision::allow("Path is in allowed list", RiskTier::Low)
                    .with_rules([format!("allowed_path:{}", glob.pattern)]),
                None => Decision::deny("Path not in allowed list", RiskTier::Medium),
            };
        }

        Decision::allow("Path not explicitly denied", RiskTier::Low)
    }
}

pub fn evaluate_filesystem_condition(
    policy: &FilesystemPolicy,
    path: &str,
    operation: FileOperation,
    size: Option<u64>,
) -> Decision {
    policy.evaluate(path, operation, size)
}

fn is_symlink(path: &str) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Make `raw` absolute. Existing paths are canonicalized (following
/// symlinks); anything else is joined to the working directory and
/// normalized lexically.
pub(crate) fn resolve_path(raw: &str) -> Result<PathBuf, String> {
    if raw.trim().is_empty() {
        return Err("path is empty".to_string());
    }
    if raw.contains('\0') {
        return Err("path contains a NUL byte".to_string());
    }

    let path = Path::new(raw);
    if let Ok(canonical) = fs::canonicalize(path) {
        return Ok(canonical);
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| format!("working directory is unavailable: {e}"))?
            .join(path)
    };
    Ok(normalize(&absolute))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

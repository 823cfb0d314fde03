//! Path and command access policy, spec §4.D "Policy".

use std::path::{Path, PathBuf};

use crate::config::SandboxConfig;

#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    path_allowlist: Vec<String>,
    path_denylist: Vec<String>,
    command_allowlist: Vec<String>,
    command_denylist: Vec<String>,
}

impl SandboxPolicy {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            path_allowlist: config.path_allowlist.clone(),
            path_denylist: config.path_denylist.clone(),
            command_allowlist: config.command_allowlist.clone(),
            command_denylist: config.command_denylist.clone(),
        }
    }

    /// Default allow is workspace-only; prefix-based allow/deny,
    /// denylist wins. `rel` is workspace-relative (already resolved to
    /// not escape the workspace root by the caller).
    pub fn allows_path(&self, rel: &Path) -> bool {
        let rel_str = rel.to_string_lossy();
        if self.path_denylist.iter().any(|p| rel_str.starts_with(p.as_str())) {
            return false;
        }
        if self.path_allowlist.is_empty() {
            return true;
        }
        self.path_allowlist.iter().any(|p| rel_str.starts_with(p.as_str()))
    }

    /// Substring/prefix match; denylist wins.
    pub fn allows_command(&self, command: &str) -> bool {
        if self.command_denylist.iter().any(|d| command.contains(d.as_str())) {
            return false;
        }
        if self.command_allowlist.is_empty() {
            return true;
        }
        self.command_allowlist.iter().any(|a| command.starts_with(a.as_str()))
    }
}

/// Resolve a possibly-absolute path against a workspace root the way
/// the sandbox does: absolute paths outside the root are resolved
/// as-is and subject to the same policy check.
pub fn resolve(root: &Path, requested: &str) -> PathBuf {
    let requested = Path::new(requested);
    if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allow: &[&str], deny: &[&str]) -> SandboxPolicy {
        SandboxPolicy {
            path_allowlist: allow.iter().map(|s| s.to_string()).collect(),
            path_denylist: deny.iter().map(|s| s.to_string()).collect(),
            command_allowlist: Vec::new(),
            command_denylist: Vec::new(),
        }
    }

    #[test]
    fn default_allow_is_workspace_only() {
        let p = policy(&[], &[]);
        assert!(p.allows_path(Path::new("src/main.rs")));
    }

    #[test]
    fn denylist_wins_over_allowlist() {
        let p = policy(&["src"], &["src/secret"]);
        assert!(p.allows_path(Path::new("src/main.rs")));
        assert!(!p.allows_path(Path::new("src/secret/key.pem")));
    }

    #[test]
    fn command_denylist_blocks_by_substring() {
        let mut p = policy(&[], &[]);
        p.command_denylist.push("rm -rf /".into());
        assert!(!p.allows_command("rm -rf / --no-preserve-root"));
        assert!(p.allows_command("ls -la"));
    }
}

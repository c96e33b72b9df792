// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Workspace/output boundary enforcement for filesystem-bearing tools.
//!
//! All tools that open paths consult this policy; none of them canonicalize
//! paths themselves.  The check is lexical: `..` components are resolved
//! against the candidate path only, so the policy gives the same answer
//! whether or not the target exists yet.

use std::path::{Component, Path, PathBuf};

/// Distinguishes the read-only workspace root from the writable output root.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    workspace: PathBuf,
    output: PathBuf,
}

impl PathPolicy {
    pub fn new(workspace: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            output: output.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Resolve a path for reading.  Reads are allowed anywhere under the
    /// workspace or the output root.  Relative paths resolve against the
    /// workspace.
    pub fn resolve_read(&self, raw: &str) -> Result<PathBuf, String> {
        let resolved = self.resolve(raw, &self.workspace)?;
        if resolved.starts_with(&self.workspace) || resolved.starts_with(&self.output) {
            Ok(resolved)
        } else {
            Err(format!(
                "path '{raw}' is outside the workspace and output roots"
            ))
        }
    }

    /// Resolve a path for writing.  Writes are confined to the output root.
    /// Relative paths resolve against the output root.
    pub fn resolve_write(&self, raw: &str) -> Result<PathBuf, String> {
        let resolved = self.resolve(raw, &self.output)?;
        if resolved.starts_with(&self.output) {
            Ok(resolved)
        } else {
            Err(format!("path '{raw}' is outside the writable output root"))
        }
    }

    /// Join relative paths against `base` and normalize `.` / `..`
    /// components lexically.  Rejects attempts to pop past the root.
    fn resolve(&self, raw: &str, base: &Path) -> Result<PathBuf, String> {
        let candidate = Path::new(raw);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            base.join(candidate)
        };

        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(format!("path '{raw}' escapes the filesystem root"));
                    }
                }
                Component::CurDir => {}
                other => normalized.push(other.as_os_str()),
            }
        }
        Ok(normalized)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PathPolicy {
        PathPolicy::new("/work", "/work/out")
    }

    #[test]
    fn relative_read_resolves_against_workspace() {
        let p = policy().resolve_read("src/main.rs").unwrap();
        assert_eq!(p, PathBuf::from("/work/src/main.rs"));
    }

    #[test]
    fn relative_write_resolves_against_output() {
        let p = policy().resolve_write("plans/a.json").unwrap();
        assert_eq!(p, PathBuf::from("/work/out/plans/a.json"));
    }

    #[test]
    fn read_outside_workspace_rejected() {
        assert!(policy().resolve_read("/etc/passwd").is_err());
    }

    #[test]
    fn dotdot_escape_rejected_for_read() {
        assert!(policy().resolve_read("../../etc/passwd").is_err());
    }

    #[test]
    fn dotdot_inside_workspace_normalizes() {
        let p = policy().resolve_read("src/../doc/readme.md").unwrap();
        assert_eq!(p, PathBuf::from("/work/doc/readme.md"));
    }

    #[test]
    fn write_into_workspace_but_outside_output_rejected() {
        assert!(policy().resolve_write("/work/src/main.rs").is_err());
    }

    #[test]
    fn write_dotdot_escape_rejected() {
        assert!(policy().resolve_write("../src/main.rs").is_err());
    }

    #[test]
    fn read_from_output_root_allowed() {
        let p = policy().resolve_read("/work/out/rfc/x.json").unwrap();
        assert_eq!(p, PathBuf::from("/work/out/rfc/x.json"));
    }

    #[test]
    fn curdir_components_ignored() {
        let p = policy().resolve_read("./src/./lib.rs").unwrap();
        assert_eq!(p, PathBuf::from("/work/src/lib.rs"));
    }
}

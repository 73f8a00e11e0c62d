//! Workspace resolution.
//!
//! Runs execute inside a directory resolved under a single configured root.
//! The resolver validates existence before anything is spawned and reports
//! whether the workspace carries a `CLAUDE.md` agent-instructions file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;

/// Agent-instructions file looked for in each workspace.
pub const INSTRUCTIONS_FILE: &str = "CLAUDE.md";

/// A resolved, existing workspace directory.
#[derive(Debug, Clone, Serialize)]
pub struct Workspace {
    /// Name relative to the root.
    pub name: String,
    /// Absolute directory path.
    pub path: PathBuf,
    /// Whether the workspace carries an instructions file.
    pub has_instructions: bool,
}

/// Resolves and lists workspaces under one root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceResolver {
    root: PathBuf,
}

impl WorkspaceResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `name` to an existing directory under the root.
    ///
    /// Rejects names that would escape the root and directories that do not
    /// exist ("does not exist" wording is load-bearing: the API layer maps
    /// it to a client error).
    pub async fn resolve(&self, name: &str) -> Result<Workspace> {
        if name.is_empty() {
            bail!("workspace name must not be empty");
        }
        if name.starts_with('/') || name.split('/').any(|part| part == "..") {
            bail!("invalid workspace name: {name}");
        }

        let path = self.root.join(name);
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("workspace path does not exist: {}", path.display()))?;
        if !metadata.is_dir() {
            bail!("workspace path is not a directory: {}", path.display());
        }

        let has_instructions = tokio::fs::metadata(path.join(INSTRUCTIONS_FILE))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);

        Ok(Workspace {
            name: name.to_string(),
            path,
            has_instructions,
        })
    }

    /// List candidate workspaces: non-hidden directories directly under the
    /// root. A missing root yields an empty list rather than an error.
    pub async fn list(&self) -> Result<Vec<Workspace>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };

        let mut workspaces = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let path = entry.path();
            let has_instructions = tokio::fs::metadata(path.join(INSTRUCTIONS_FILE))
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            workspaces.push(Workspace {
                name,
                path,
                has_instructions,
            });
        }

        workspaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workspaces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_existing_workspace() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("proj")).unwrap();
        std::fs::write(root.path().join("proj").join(INSTRUCTIONS_FILE), "# hi").unwrap();

        let resolver = WorkspaceResolver::new(root.path());
        let ws = resolver.resolve("proj").await.unwrap();
        assert_eq!(ws.name, "proj");
        assert!(ws.has_instructions);
        assert!(ws.path.ends_with("proj"));
    }

    #[tokio::test]
    async fn resolve_missing_workspace_mentions_does_not_exist() {
        let root = tempfile::tempdir().unwrap();
        let resolver = WorkspaceResolver::new(root.path());

        let err = resolver.resolve("ghost").await.unwrap_err();
        assert!(format!("{err:#}").contains("does not exist"));
    }

    #[tokio::test]
    async fn resolve_rejects_traversal() {
        let root = tempfile::tempdir().unwrap();
        let resolver = WorkspaceResolver::new(root.path());

        assert!(resolver.resolve("../outside").await.is_err());
        assert!(resolver.resolve("/etc").await.is_err());
        assert!(resolver.resolve("a/../../b").await.is_err());
        assert!(resolver.resolve("").await.is_err());
    }

    #[tokio::test]
    async fn list_returns_sorted_non_hidden_dirs() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("beta")).unwrap();
        std::fs::create_dir(root.path().join("alpha")).unwrap();
        std::fs::create_dir(root.path().join(".hidden")).unwrap();
        std::fs::write(root.path().join("file.txt"), "x").unwrap();

        let resolver = WorkspaceResolver::new(root.path());
        let names: Vec<_> = resolver
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn list_with_missing_root_is_empty() {
        let resolver = WorkspaceResolver::new("/nonexistent/tether-root");
        assert!(resolver.list().await.unwrap().is_empty());
    }
}

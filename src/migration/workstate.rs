//! Work-state manifest: per-project git metadata
//!
//! For each immediate subdirectory of the agent's work root that is a git
//! repository, capture enough metadata to rebuild it on the target:
//! remote, branch, commit, the uncommitted patch, and the untracked file
//! listing. The manifest is data-only; the target clones the remote,
//! checks out the commit, and applies the patch.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::warn;

use crate::error::{FlockError, Result};

/// Captured state of one git project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    /// Path of the project relative to the work root
    pub relative_path: String,
    /// `origin` remote URL, if one is configured
    pub remote_url: Option<String>,
    /// Checked-out branch name
    pub branch: String,
    /// HEAD commit sha
    pub commit_sha: String,
    /// Full `git diff HEAD` output, or `None` when the tree is clean
    pub uncommitted_patch: Option<String>,
    /// Untracked (non-ignored) files at capture time
    pub untracked_files: Vec<String>,
}

/// All captured projects under one work root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkStateManifest {
    /// One entry per git project; non-git subdirectories are skipped
    pub projects: Vec<ProjectState>,
}

async fn run_git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| FlockError::Internal {
            message: format!("failed to spawn git: {e}"),
        })?;
    if !output.status.success() {
        return Err(FlockError::Internal {
            message: format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
}

async fn capture_project(dir: &Path, relative_path: String) -> Result<ProjectState> {
    let remote_url = run_git(dir, &["remote", "get-url", "origin"]).await.ok();
    let branch = run_git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
    let commit_sha = run_git(dir, &["rev-parse", "HEAD"]).await?;
    let patch = run_git(dir, &["diff", "HEAD"]).await?;
    let untracked = run_git(dir, &["ls-files", "--others", "--exclude-standard"]).await?;
    Ok(ProjectState {
        relative_path,
        remote_url,
        branch,
        commit_sha,
        uncommitted_patch: (!patch.is_empty()).then_some(patch),
        untracked_files: untracked
            .lines()
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect(),
    })
}

/// Captures the manifest for every git project under `work_root`.
///
/// Missing work root, non-git subdirectories, and a missing `git` binary
/// all degrade to a smaller (possibly empty) manifest with a warning,
/// never a failed snapshot.
pub async fn capture_work_state(work_root: &Path) -> WorkStateManifest {
    let mut manifest = WorkStateManifest::default();
    let mut entries = match tokio::fs::read_dir(work_root).await {
        Ok(entries) => entries,
        Err(_) => return manifest,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !path.join(".git").exists() {
            continue;
        }
        let relative_path = entry.file_name().to_string_lossy().to_string();
        match capture_project(&path, relative_path.clone()).await {
            Ok(project) => manifest.projects.push(project),
            Err(e) => {
                warn!(project = %relative_path, error = %e, "skipping project in work-state capture");
            }
        }
    }
    manifest.projects.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    manifest
}

/// Rebuilds one project at `dest`: clone, checkout, apply patch.
///
/// # Errors
///
/// Fails with `RehydrateFailed` when the project has no remote to clone
/// from or any git step fails.
pub async fn restore_project(project: &ProjectState, dest: &Path) -> Result<()> {
    let remote = project.remote_url.as_deref().ok_or_else(|| {
        FlockError::RehydrateFailed {
            message: format!("project {} has no remote to clone from", project.relative_path),
        }
    })?;
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let dest_name = dest
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| FlockError::RehydrateFailed {
            message: "project destination has no file name".to_string(),
        })?;

    run_git(parent, &["clone", remote, &dest_name])
        .await
        .map_err(|e| FlockError::RehydrateFailed {
            message: format!("clone of {} failed: {e}", project.relative_path),
        })?;
    run_git(dest, &["checkout", "--detach", &project.commit_sha])
        .await
        .map_err(|e| FlockError::RehydrateFailed {
            message: format!("checkout of {} failed: {e}", project.commit_sha),
        })?;

    if let Some(patch) = &project.uncommitted_patch {
        let patch_path = dest.join(".flock-rehydrate.patch");
        tokio::fs::write(&patch_path, patch).await?;
        let apply = run_git(dest, &["apply", ".flock-rehydrate.patch"]).await;
        let _ = tokio::fs::remove_file(&patch_path).await;
        apply.map_err(|e| FlockError::RehydrateFailed {
            message: format!("patch apply for {} failed: {e}", project.relative_path),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    async fn init_repo(dir: &Path) {
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "flock@test.invalid"],
            vec!["config", "user.name", "Flock Test"],
        ] {
            run_git(dir, &args).await.unwrap();
        }
        tokio::fs::write(dir.join("README.md"), "# demo\n").await.unwrap();
        run_git(dir, &["add", "."]).await.unwrap();
        run_git(dir, &["commit", "-q", "-m", "initial"]).await.unwrap();
    }

    #[tokio::test]
    async fn test_should_skip_non_git_directories_when_capturing() {
        let work = tempdir().unwrap();
        tokio::fs::create_dir(work.path().join("plain-dir")).await.unwrap();
        tokio::fs::write(work.path().join("loose-file.txt"), "x").await.unwrap();
        let manifest = capture_work_state(work.path()).await;
        assert!(manifest.projects.is_empty());
    }

    #[tokio::test]
    async fn test_should_return_empty_manifest_when_work_root_is_missing() {
        let manifest = capture_work_state(Path::new("/nonexistent/flock-work")).await;
        assert!(manifest.projects.is_empty());
    }

    #[tokio::test]
    async fn test_should_capture_commit_and_untracked_when_project_is_git() {
        if !git_available().await {
            eprintln!("git not available, skipping");
            return;
        }
        let work = tempdir().unwrap();
        let project = work.path().join("my-project");
        tokio::fs::create_dir(&project).await.unwrap();
        init_repo(&project).await;
        tokio::fs::write(project.join("scratch.txt"), "untracked").await.unwrap();

        let manifest = capture_work_state(work.path()).await;
        assert_eq!(manifest.projects.len(), 1);
        let captured = &manifest.projects[0];
        assert_eq!(captured.relative_path, "my-project");
        assert_eq!(captured.commit_sha.len(), 40);
        assert!(captured.uncommitted_patch.is_none());
        assert_eq!(captured.untracked_files, vec!["scratch.txt"]);
    }

    #[tokio::test]
    async fn test_should_capture_patch_when_tree_is_dirty() {
        if !git_available().await {
            eprintln!("git not available, skipping");
            return;
        }
        let work = tempdir().unwrap();
        let project = work.path().join("my-project");
        tokio::fs::create_dir(&project).await.unwrap();
        init_repo(&project).await;
        tokio::fs::write(project.join("README.md"), "# demo\nedited\n")
            .await
            .unwrap();

        let manifest = capture_work_state(work.path()).await;
        let patch = manifest.projects[0].uncommitted_patch.as_ref().unwrap();
        assert!(patch.contains("edited"));
    }

    #[tokio::test]
    async fn test_should_clone_and_apply_patch_when_restoring_project() {
        if !git_available().await {
            eprintln!("git not available, skipping");
            return;
        }
        let source_work = tempdir().unwrap();
        let origin = source_work.path().join("my-project");
        tokio::fs::create_dir(&origin).await.unwrap();
        init_repo(&origin).await;
        // A local path works as the clone remote.
        let mut manifest_dir = origin.clone();
        tokio::fs::write(origin.join("README.md"), "# demo\nwip change\n")
            .await
            .unwrap();

        let project = capture_project(&manifest_dir, "my-project".to_string())
            .await
            .unwrap();
        let project = ProjectState {
            remote_url: Some(origin.to_string_lossy().to_string()),
            ..project
        };
        manifest_dir.pop();

        let target_work = tempdir().unwrap();
        let dest = target_work.path().join("my-project");
        restore_project(&project, &dest).await.unwrap();

        assert!(dest.join(".git").exists());
        let restored = tokio::fs::read_to_string(dest.join("README.md")).await.unwrap();
        assert!(restored.contains("wip change"));
    }

    #[tokio::test]
    async fn test_should_fail_restore_when_project_has_no_remote() {
        let project = ProjectState {
            relative_path: "orphan".to_string(),
            remote_url: None,
            branch: "main".to_string(),
            commit_sha: "0".repeat(40),
            uncommitted_patch: None,
            untracked_files: Vec::new(),
        };
        let target = tempdir().unwrap();
        let err = restore_project(&project, &target.path().join("orphan"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlockError::RehydrateFailed { .. }));
    }
}

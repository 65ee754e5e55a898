//! Target-side rehydration
//!
//! Re-verifies the staged archive, unpacks it into the target home, and
//! rebuilds each work-state project. Project paths are normalized before
//! any filesystem write; a relative path whose canonical form escapes the
//! target work root is rejected with a warning and skipped while the rest
//! of the payload continues (partial success).

use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{FlockError, Result};
use crate::migration::snapshot::verify_snapshot;
use crate::migration::workstate::{WorkStateManifest, restore_project};

/// Declared shape of the portable archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortableArchive {
    /// Expected hex SHA-256
    pub checksum: String,
    /// Expected size in bytes
    pub size_bytes: u64,
}

/// Everything the target needs to rebuild an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationPayload {
    /// Archive shape for re-verification
    pub portable: PortableArchive,
    /// Identity material; `None` in central mode
    pub agent_identity: Option<serde_json::Value>,
    /// Git manifest of the agent's work root
    pub work_state: WorkStateManifest,
}

/// Outcome of one rehydration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RehydrateResult {
    /// Whether the home was rebuilt (possible even with warnings)
    pub success: bool,
    /// Where the home landed
    pub home_path: String,
    /// Terminal error, when rehydration failed
    pub error: Option<String>,
    /// Non-fatal problems (skipped projects)
    pub warnings: Vec<String>,
    /// When rehydration finished
    pub completed_at: DateTime<Utc>,
}

impl RehydrateResult {
    fn failure(home_path: &Path, error: impl Into<String>, warnings: Vec<String>) -> Self {
        Self {
            success: false,
            home_path: home_path.to_string_lossy().to_string(),
            error: Some(error.into()),
            warnings,
            completed_at: Utc::now(),
        }
    }
}

/// Lexically resolves `relative` under `root`, rejecting every form that
/// would escape it.
///
/// Absolute paths, prefix/root components, and `..` traversal past the
/// root all resolve to `None`. No filesystem access happens here, so the
/// check holds for paths that do not exist yet.
pub fn resolve_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    if relative.is_absolute() {
        return None;
    }
    let mut stack: Vec<&std::ffi::OsStr> = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => stack.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if stack.pop().is_none() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if stack.is_empty() {
        return None;
    }
    let mut resolved = root.to_path_buf();
    for part in stack {
        resolved.push(part);
    }
    Some(resolved)
}

fn extract_archive_sync(archive_path: &Path, dest: &Path) -> std::io::Result<()> {
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);
    archive.set_overwrite(true);
    archive.unpack(dest)
}

async fn extract_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dest).await?;
    let archive_path = archive_path.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_archive_sync(&archive_path, &dest))
        .await
        .map_err(|e| FlockError::internal(format!("extract task panicked: {e}")))?
        .map_err(FlockError::Io)
}

/// Rebuilds an agent's home and work projects on this node.
///
/// Never returns an `Err`; every failure mode is reported inside the
/// result so the transport can relay it verbatim.
#[instrument(skip_all, fields(home = %target_home_path.display()))]
pub async fn rehydrate(
    archive_path: &Path,
    payload: &MigrationPayload,
    target_home_path: &Path,
    target_work_path: &Path,
) -> RehydrateResult {
    let mut warnings = Vec::new();

    let verification = verify_snapshot(
        archive_path,
        &payload.portable.checksum,
        Some(payload.portable.size_bytes),
    )
    .await;
    if !verification.verified {
        let reason = verification
            .failure_reason
            .map_or_else(|| "unknown".to_string(), |reason| reason.to_string());
        return RehydrateResult::failure(
            target_home_path,
            format!("archive re-verification failed: {reason}"),
            warnings,
        );
    }

    if let Err(e) = extract_archive(archive_path, target_home_path).await {
        return RehydrateResult::failure(
            target_home_path,
            format!("archive extraction failed: {e}"),
            warnings,
        );
    }

    for project in &payload.work_state.projects {
        let Some(dest) = resolve_within(target_work_path, &project.relative_path) else {
            warn!(relative_path = %project.relative_path, "rejecting project path");
            warnings.push(format!(
                "Path traversal detected in project path '{}', skipping",
                project.relative_path
            ));
            continue;
        };
        if let Err(e) = restore_project(project, &dest).await {
            return RehydrateResult::failure(
                target_home_path,
                format!("project restore failed: {e}"),
                warnings,
            );
        }
    }

    info!(warnings = warnings.len(), "rehydration complete");
    RehydrateResult {
        success: true,
        home_path: target_home_path.to_string_lossy().to_string(),
        error: None,
        warnings,
        completed_at: Utc::now(),
    }
}

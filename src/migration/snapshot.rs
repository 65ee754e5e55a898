//! Portable snapshot: streamed tar+gzip plus streaming SHA-256
//!
//! The agent's home directory travels as one `tar.gz` archive. Both the
//! digest and the archive are produced with bounded memory: the archive is
//! streamed straight to disk and the hash is computed over 64 KiB chunks,
//! never loading the whole archive.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::domain::{VerificationFailureReason, VerificationResult};
use crate::domain_types::MigrationId;
use crate::error::{FlockError, Result};
use crate::migration::workstate::{WorkStateManifest, capture_work_state};

/// Transfer cap for one portable archive (4 GiB)
pub const MAX_PORTABLE_SIZE_BYTES: u64 = 4 * 1024 * 1024 * 1024;

const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// One produced snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Where the archive was staged
    pub archive_path: PathBuf,
    /// Hex SHA-256 of the archive
    pub checksum: String,
    /// Archive size in bytes
    pub size_bytes: u64,
    /// Git manifest of the agent's work root
    pub work_state: WorkStateManifest,
}

fn hash_file_sync(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn archive_dir_sync(source: &Path, archive_path: &Path) -> std::io::Result<()> {
    let file = File::create(archive_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", source)?;
    let encoder = builder.into_inner()?;
    let mut file = encoder.finish()?;
    file.flush()?;
    Ok(())
}

fn check_archive_sync(archive_path: &Path) -> std::io::Result<()> {
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);
    // Walking the entries forces full decompression, surfacing truncation
    // and corrupt streams.
    for entry in archive.entries()? {
        let mut entry = entry?;
        std::io::copy(&mut entry, &mut std::io::sink())?;
    }
    Ok(())
}

/// Streaming SHA-256 of a file, as lowercase hex.
///
/// Deterministic across repeated calls for the same content.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub async fn compute_sha256(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file_sync(&path))
        .await
        .map_err(|e| FlockError::internal(format!("hash task panicked: {e}")))?
        .map_err(FlockError::Io)
}

/// Produces the portable snapshot of one home directory.
///
/// The archive is staged under `<tmp_dir>/<migration_id>/<migration_id>.tar.gz`.
/// The work-state manifest is captured from `work_root` when given.
///
/// # Errors
///
/// Fails with `SNAPSHOT_PORTABLE_SIZE_EXCEEDED` (`SizeExceeded`) when the
/// archive would exceed the 4 GiB cap, and with `Io` on filesystem errors.
#[instrument(skip(home_path, tmp_dir, work_root))]
pub async fn create_snapshot(
    home_path: &Path,
    migration_id: &MigrationId,
    tmp_dir: &Path,
    work_root: Option<&Path>,
) -> Result<Snapshot> {
    let staging = tmp_dir.join(migration_id.as_str());
    tokio::fs::create_dir_all(&staging).await?;
    let archive_path = staging.join(format!("{migration_id}.tar.gz"));

    let work_state = match work_root {
        Some(root) => capture_work_state(root).await,
        None => WorkStateManifest::default(),
    };

    let source = home_path.to_path_buf();
    let archive_target = archive_path.clone();
    tokio::task::spawn_blocking(move || archive_dir_sync(&source, &archive_target))
        .await
        .map_err(|e| FlockError::internal(format!("archive task panicked: {e}")))?
        .map_err(FlockError::Io)?;

    let size_bytes = tokio::fs::metadata(&archive_path).await?.len();
    if size_bytes > MAX_PORTABLE_SIZE_BYTES {
        let _ = tokio::fs::remove_file(&archive_path).await;
        return Err(FlockError::SizeExceeded {
            size_bytes,
            max_bytes: MAX_PORTABLE_SIZE_BYTES,
        });
    }

    let checksum = compute_sha256(&archive_path).await?;
    info!(size_bytes, checksum = %checksum, "snapshot created");
    Ok(Snapshot {
        archive_path,
        checksum,
        size_bytes,
        work_state,
    })
}

/// Verifies a staged archive against the expected digest (and size, when
/// declared).
///
/// Never returns an error: every failure mode maps onto a
/// [`VerificationFailureReason`]. A missing file, malformed archive, or
/// stream failure is `ARCHIVE_CORRUPT`.
pub async fn verify_snapshot(
    archive_path: &Path,
    expected_checksum: &str,
    expected_size: Option<u64>,
) -> VerificationResult {
    let metadata = match tokio::fs::metadata(archive_path).await {
        Ok(metadata) => metadata,
        Err(_) => {
            return VerificationResult::fail(VerificationFailureReason::ArchiveCorrupt, None);
        }
    };
    if let Some(expected_size) = expected_size {
        if metadata.len() != expected_size {
            return VerificationResult::fail(VerificationFailureReason::SizeMismatch, None);
        }
    }

    let computed = match compute_sha256(archive_path).await {
        Ok(computed) => computed,
        Err(_) => {
            return VerificationResult::fail(VerificationFailureReason::ArchiveCorrupt, None);
        }
    };
    if computed != expected_checksum {
        return VerificationResult::fail(
            VerificationFailureReason::ChecksumMismatch,
            Some(computed),
        );
    }

    let path = archive_path.to_path_buf();
    let structurally_sound = tokio::task::spawn_blocking(move || check_archive_sync(&path))
        .await
        .map(|result| result.is_ok())
        .unwrap_or(false);
    if !structurally_sound {
        return VerificationResult::fail(
            VerificationFailureReason::ArchiveCorrupt,
            Some(computed),
        );
    }

    VerificationResult::ok(computed)
}

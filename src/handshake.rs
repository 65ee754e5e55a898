//! Post-migration handshake
//!
//! After a migration completes, the target home may contain a
//! `POST_MIGRATION.md` file with outstanding tasks for the rehydrated
//! agent. The agent observes it with `has`/`read` and acknowledges with
//! `clear`. Absence is the normal steady state.

use std::path::{Path, PathBuf};

use crate::error::Result;

const HANDSHAKE_FILE: &str = "POST_MIGRATION.md";

/// Accessor for one home's handshake file
pub struct PostMigrationHandshake {
    path: PathBuf,
}

impl PostMigrationHandshake {
    /// Creates an accessor for a home directory
    pub fn for_home(home_path: &Path) -> Self {
        Self {
            path: home_path.join(HANDSHAKE_FILE),
        }
    }

    /// Whether outstanding tasks exist
    pub async fn has(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Reads the outstanding tasks, if any
    ///
    /// # Errors
    ///
    /// Returns an I/O error for anything other than absence.
    pub async fn read(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Acknowledges and removes the handshake file. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an I/O error for anything other than absence.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes outstanding tasks (used by the completion hook when the
    /// source left notes for the rehydrated agent)
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub async fn write(&self, content: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_should_report_absent_when_home_is_fresh() {
        let home = tempdir().unwrap();
        let handshake = PostMigrationHandshake::for_home(home.path());
        assert!(!handshake.has().await);
        assert_eq!(handshake.read().await.unwrap(), None);
        // Clearing an absent file is fine.
        handshake.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_should_round_trip_content_when_writing_then_reading() {
        let home = tempdir().unwrap();
        let handshake = PostMigrationHandshake::for_home(home.path());
        handshake.write("- [ ] re-verify credentials\n").await.unwrap();
        assert!(handshake.has().await);
        assert_eq!(
            handshake.read().await.unwrap().as_deref(),
            Some("- [ ] re-verify credentials\n")
        );
        handshake.clear().await.unwrap();
        assert!(!handshake.has().await);
    }
}

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use super::RepoError;

/// Upgrades an on-disk repo to a newer format version.
pub trait Migrator: Send + Sync {
    fn run_migration(&self, root: &Path, target: u32) -> Result<(), RepoError>;
}

/// Runs the standalone `fs-repo-migrations` tool.
#[derive(Debug, Clone)]
pub struct ExternalMigrator {
    binary: PathBuf,
}

impl ExternalMigrator {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for ExternalMigrator {
    fn default() -> Self {
        Self::new("fs-repo-migrations")
    }
}

impl Migrator for ExternalMigrator {
    fn run_migration(&self, root: &Path, target: u32) -> Result<(), RepoError> {
        info!("Running {:?} -to {} on {:?}", self.binary, target, root);

        let output = Command::new(&self.binary)
            .arg("-to")
            .arg(target.to_string())
            .arg("-y")
            .env("UDFS_PATH", root)
            .output()
            .map_err(|e| RepoError::Migration(format!("failed to run {:?}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(RepoError::Migration(format!(
                "{:?} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tool_is_migration_error() {
        let migrator = ExternalMigrator::new("/nonexistent/fs-repo-migrations");
        let err = migrator
            .run_migration(Path::new("/tmp"), super::super::REPO_VERSION)
            .unwrap_err();
        assert!(matches!(err, RepoError::Migration(_)));
    }
}

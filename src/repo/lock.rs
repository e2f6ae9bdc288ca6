use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use super::RepoError;

pub const LOCK_FILE: &str = "repo.lock";

/// Exclusive ownership of a repo directory.
///
/// Backed by an advisory lock on `repo.lock`, so the OS releases it when the
/// owning process exits, however it exits. The file itself stays behind and
/// records the last owner's pid; a leftover file without a live lock is
/// simply taken over.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
    file: File,
}

impl RepoLock {
    pub fn acquire(root: &Path) -> Result<Self, RepoError> {
        let path = root.join(LOCK_FILE);
        let io_err = |source| RepoError::Io {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        if let Err(err) = file.try_lock_exclusive() {
            if err.kind() != fs2::lock_contended_error().kind() {
                return Err(io_err(err));
            }
            let owner = std::fs::read_to_string(&path).unwrap_or_default();
            return Err(RepoError::Locked {
                path,
                owner: owner.trim().to_string(),
            });
        }

        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        write!(file, "{}", std::process::id()).map_err(io_err)?;
        debug!("Acquired repo lock {:?}", path);

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        // Closing the file releases the lock as well; unlocking first makes
        // the release visible before the handle is gone.
        let _ = FileExt::unlock(&self.file);
        debug!("Released repo lock {:?}", self.path);
    }
}

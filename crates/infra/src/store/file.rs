//! JSON file job store with atomic replace.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use fanout_core::{JobSnapshot, StorageError, StorageResult};

use super::JobStore;

/// Stores the snapshot as pretty-printed JSON at a fixed path.
///
/// Writes go to a sibling temp file which is fsynced and then renamed over
/// the canonical path, so readers only ever see a complete snapshot.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    path: PathBuf,
}

impl FileJobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "job.json".to_string());
        self.path
            .with_file_name(format!(".{}.tmp.{}", name, Uuid::now_v7()))
    }

    fn write_temp(&self, tmp_path: &Path, payload: &[u8]) -> StorageResult<()> {
        let mut file = fs::File::create(tmp_path).map_err(|e| StorageError::io(tmp_path, e))?;
        file.write_all(payload)
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|e| StorageError::io(tmp_path, e))?;
        file.sync_all().map_err(|e| StorageError::io(tmp_path, e))
    }
}

impl JobStore for FileJobStore {
    fn load(&self) -> StorageResult<Option<JobSnapshot>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        if raw.trim().is_empty() {
            return Err(StorageError::corrupt(format!(
                "{} is empty",
                self.path.display()
            )));
        }

        let snapshot = serde_json::from_str(&raw)?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &JobSnapshot) -> StorageResult<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }

        let payload = serde_json::to_vec_pretty(snapshot)?;
        let tmp_path = self.temp_path();

        let promoted = self
            .write_temp(&tmp_path, &payload)
            .and_then(|_| fs::rename(&tmp_path, &self.path).map_err(|e| StorageError::io(&self.path, e)));

        if let Err(err) = promoted {
            if let Err(cleanup) = fs::remove_file(&tmp_path) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %tmp_path.display(), error = %cleanup, "failed to remove temp snapshot");
                }
            }
            return Err(err);
        }

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            sync_dir(dir);
        }

        debug!(path = %self.path.display(), bytes = payload.len(), "snapshot saved");
        Ok(())
    }
}

/// Persist the rename itself.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %e, "directory fsync skipped");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

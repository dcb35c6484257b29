//! File-backed state store.
//!
//! # On-disk layout
//!
//! ```text
//! <state_dir>/
//!   <volume-name>.json       # one record per volume
//!   <volume-name>.json.tmp   # in-flight write, renamed into place
//! ```
//!
//! The store is not synchronised internally; [`crate::VolumeDriver`] owns it
//! behind its lifecycle lock.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::VolumeError;
use crate::types::{Volume, validate_name};

const RECORD_SUFFIX: &str = ".json";

/// Durable volume records, one `<name>.json` document per volume in `dir`.
#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open the store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, VolumeError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| VolumeError::state("open", &dir.display().to_string(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{RECORD_SUFFIX}"))
    }

    /// Load the record for `name`.
    pub async fn get(&self, name: &str) -> Result<Volume, VolumeError> {
        if validate_name(name).is_err() {
            return Err(VolumeError::NotFound(name.to_owned()));
        }
        let path = self.record_path(name);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VolumeError::NotFound(name.to_owned()));
            }
            Err(e) => return Err(VolumeError::state("read", name, e)),
        };
        serde_json::from_str(&json).map_err(|e| VolumeError::state("decode", name, e))
    }

    /// All records, sorted by name.  Unreadable documents are skipped.
    pub async fn list(&self) -> Result<Vec<Volume>, VolumeError> {
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| VolumeError::state("list", "*", e))?;

        let mut volumes = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| VolumeError::state("list", "*", e))?
        {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.ends_with(RECORD_SUFFIX) {
                continue;
            }

            let json = match tokio::fs::read_to_string(&path).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read volume state, skipping");
                    continue;
                }
            };
            match serde_json::from_str::<Volume>(&json) {
                Ok(v) => volumes.push(v),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse volume state, skipping");
                }
            }
        }

        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    /// Insert or replace the record keyed by `volume.name`.
    pub async fn set(&self, volume: &Volume) -> Result<(), VolumeError> {
        validate_name(&volume.name)?;
        let path = self.record_path(&volume.name);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(volume)
            .map_err(|e| VolumeError::state("encode", &volume.name, e))?;
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| VolumeError::state("write", &volume.name, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| VolumeError::state("write", &volume.name, e))?;

        debug!(name = %volume.name, "volume state saved");
        Ok(())
    }

    /// Remove the record for `name`; absent records are not an error.
    pub async fn delete(&self, name: &str) -> Result<(), VolumeError> {
        if validate_name(name).is_err() {
            return Ok(());
        }
        match tokio::fs::remove_file(self.record_path(name)).await {
            Ok(()) => {
                debug!(%name, "volume state deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VolumeError::state("delete", name, e)),
        }
    }
}

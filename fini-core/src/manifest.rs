use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{FiniError, Result};
use crate::util::atomic::write_json_atomic;

/// directoryName -> (subdirectoryName -> cid)
pub type Mapping = BTreeMap<String, BTreeMap<String, String>>;

/// Durable JSON manifest of uploaded subdirectories.
///
/// Writes go through a temp-file rename, so a crash leaves either the old
/// or the new mapping on disk. No inter-process lock is taken: a concurrent
/// writer in another process can still lose an update between our read and
/// our rename.
#[derive(Clone, Debug)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current mapping; empty when the file does not exist yet.
    pub fn load(&self) -> Result<Mapping> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Mapping::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Set `mapping[directory][subdirectory] = cid`, keeping every other entry,
    /// and persist the full mapping.
    pub fn merge(&self, directory: &str, subdirectory: &str, cid: &str) -> Result<Mapping> {
        self.merge_inner(directory, subdirectory, cid)
            .map_err(|e| FiniError::ManifestWrite(format!("{}: {e}", self.path.display())))
    }

    fn merge_inner(&self, directory: &str, subdirectory: &str, cid: &str) -> Result<Mapping> {
        if !self.path.exists() {
            write_json_atomic(&self.path, &Mapping::new())?;
        }
        let mut mapping = self.load()?;
        mapping
            .entry(directory.to_string())
            .or_default()
            .insert(subdirectory.to_string(), cid.to_string());
        write_json_atomic(&self.path, &mapping)?;
        debug!(path = %self.path.display(), directory, subdirectory, cid, "manifest merged");
        Ok(mapping)
    }
}

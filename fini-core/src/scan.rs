use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{FiniError, Result};
use crate::settings::SizePolicy;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subdirectory {
    pub name: String,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
}

impl Subdirectory {
    /// Upload progress as a percentage of the declared size; 0 when empty.
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.uploaded_bytes as f64 / self.total_bytes as f64 * 100.0
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySet {
    pub path: PathBuf,
    pub name: String,
    pub subdirectories: Vec<Subdirectory>,
}

impl DirectorySet {
    pub fn subdirectory_path(&self, index: usize) -> Option<PathBuf> {
        self.subdirectories
            .get(index)
            .map(|s| self.path.join(&s.name))
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.subdirectories.iter().position(|s| s.name == name)
    }
}

/// List the immediate child directories of `root` (sorted by name) and
/// measure each one according to `policy`.
pub fn scan(root: &Path, name: &str, policy: SizePolicy) -> Result<DirectorySet> {
    let md = fs::metadata(root)
        .map_err(|e| FiniError::Scan(format!("{}: {e}", root.display())))?;
    if !md.is_dir() {
        return Err(FiniError::Scan(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut names = Vec::new();
    let entries =
        fs::read_dir(root).map_err(|e| FiniError::Scan(format!("{}: {e}", root.display())))?;
    for entry in entries {
        let entry = entry.map_err(scan_err)?;
        if entry.file_type().map_err(scan_err)?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    let subdirectories = names
        .into_iter()
        .map(|n| {
            let total_bytes = directory_size(&root.join(&n), policy)?;
            Ok(Subdirectory {
                name: n,
                total_bytes,
                uploaded_bytes: 0,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DirectorySet {
        path: root.to_path_buf(),
        name: name.to_string(),
        subdirectories,
    })
}

fn scan_err(e: impl std::fmt::Display) -> FiniError {
    FiniError::Scan(e.to_string())
}

/// Sum of regular-file sizes under `dir`.
pub fn directory_size(dir: &Path, policy: SizePolicy) -> Result<u64> {
    let mut total = 0u64;
    match policy {
        SizePolicy::Shallow => {
            for entry in fs::read_dir(dir).map_err(scan_err)? {
                let md = fs::metadata(entry.map_err(scan_err)?.path()).map_err(scan_err)?;
                if md.is_file() {
                    total += md.len();
                }
            }
        }
        SizePolicy::Recursive => {
            for e in WalkDir::new(dir).follow_links(false) {
                let e = e.map_err(scan_err)?;
                if e.file_type().is_file() {
                    total += e.metadata().map_err(scan_err)?.len();
                }
            }
        }
    }
    Ok(total)
}

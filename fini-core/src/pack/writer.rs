use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ciborium::value::{Integer, Value};
use rayon::prelude::*;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{FiniError, Result};
use crate::pack::blockstore::{Archive, TempBlockStore};
use crate::pack::car::{CarWriter, encode_cbor, link};
use crate::pack::cid::Cid;

/// Leaf block size.
pub const BLOCK_SIZE: usize = 256 * 1024;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackStats {
    pub files: u64,
    /// Sum of every packed file's size.
    pub total_bytes: u64,
    pub blocks: u64,
    pub unique_blocks: u64,
    pub archive_bytes: u64,
}

/// Turns one subdirectory into an uploadable archive.
pub trait Packager: Send + Sync {
    fn package(&self, dir: &Path) -> Result<Archive>;
}

#[derive(Clone, Debug)]
pub struct ArchivePackager {
    pub block_size: usize,
    /// Where backing files are created; system temp dir when None.
    pub temp_dir: Option<PathBuf>,
}

impl Default for ArchivePackager {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            temp_dir: None,
        }
    }
}

impl Packager for ArchivePackager {
    fn package(&self, dir: &Path) -> Result<Archive> {
        let tmp = match &self.temp_dir {
            Some(d) => NamedTempFile::new_in(d),
            None => NamedTempFile::new(),
        }
        .map_err(|e| FiniError::Encoding(format!("create backing store: {e}")))?;

        let out = BufWriter::new(tmp.reopen().map_err(encoding)?);
        let (cid, stats) = pack_to(dir, out, self.block_size).map_err(|e| match e {
            FiniError::Encoding(_) => e,
            other => encoding(other),
        })?;
        debug!(dir = %dir.display(), %cid, bytes = stats.archive_bytes, "packed");
        let len = stats.archive_bytes;
        Ok(Archive::new(
            cid,
            stats,
            Box::new(TempBlockStore::new(tmp, len)),
        ))
    }
}

fn encoding(e: impl std::fmt::Display) -> FiniError {
    FiniError::Encoding(e.to_string())
}

/// Every regular file below `dir`, sorted, symlinks not followed.
pub fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for e in WalkDir::new(dir).follow_links(false) {
        let e = e.map_err(encoding)?;
        if e.file_type().is_file() {
            files.push(e.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn rel_display(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Clone)]
struct BlockPlan {
    cid: Cid,
    off: u64,
    len: u64,
}

struct FilePlan {
    path: PathBuf,
    rel: String,
    size: u64,
    blocks: Vec<BlockPlan>,
}

/// First occurrence of a unique block, re-read during the write pass.
struct WritePlan<'a> {
    cid: Cid,
    src: &'a Path,
    off: u64,
    len: u64,
}

fn plan_file(path: &Path, root: &Path, block_size: usize) -> Result<FilePlan> {
    let mut f = File::open(path).map_err(encoding)?;
    let mut buf = vec![0u8; block_size];
    let mut blocks = Vec::new();
    let mut off = 0u64;
    loop {
        let n = read_full(&mut f, &mut buf).map_err(encoding)?;
        if n == 0 {
            break;
        }
        blocks.push(BlockPlan {
            cid: Cid::raw(&buf[..n]),
            off,
            len: n as u64,
        });
        off += n as u64;
        if n < block_size {
            break;
        }
    }
    Ok(FilePlan {
        path: path.to_path_buf(),
        rel: rel_display(path, root),
        size: off,
        blocks,
    })
}

fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let k = r.read(&mut buf[filled..])?;
        if k == 0 {
            break;
        }
        filled += k;
    }
    Ok(filled)
}

fn root_node(plans: &[FilePlan]) -> Value {
    let files = plans
        .iter()
        .map(|fp| {
            Value::Map(vec![
                (Value::Text("path".into()), Value::Text(fp.rel.clone())),
                (
                    Value::Text("size".into()),
                    Value::Integer(Integer::from(fp.size)),
                ),
                (
                    Value::Text("blocks".into()),
                    Value::Array(fp.blocks.iter().map(|b| link(&b.cid)).collect()),
                ),
            ])
        })
        .collect();
    Value::Map(vec![(Value::Text("files".into()), Value::Array(files))])
}

/// Encode every file below `dir` into a CARv1 written to `out`.
/// Returns the root CID and packing statistics.
pub fn pack_to<W: Write>(dir: &Path, out: W, block_size: usize) -> Result<(Cid, PackStats)> {
    let block_size = block_size.max(1);
    let files = collect_files(dir)?;
    if files.is_empty() {
        return Err(FiniError::Encoding(format!(
            "no files found in {}",
            dir.display()
        )));
    }

    let plans: Vec<FilePlan> = files
        .par_iter() // each file independent
        .map(|p| plan_file(p, dir, block_size))
        .collect::<Result<Vec<_>>>()?;

    let mut seen: HashSet<Cid> = HashSet::new();
    let mut writes: Vec<WritePlan<'_>> = Vec::new();
    let mut stats = PackStats {
        files: plans.len() as u64,
        ..Default::default()
    };
    for fp in &plans {
        stats.total_bytes += fp.size;
        stats.blocks += fp.blocks.len() as u64;
        for b in &fp.blocks {
            if seen.insert(b.cid) {
                writes.push(WritePlan {
                    cid: b.cid,
                    src: &fp.path,
                    off: b.off,
                    len: b.len,
                });
            }
        }
    }
    stats.unique_blocks = writes.len() as u64;

    let root_bytes = encode_cbor(&root_node(&plans))?;
    let root = Cid::dag_cbor(&root_bytes);

    let mut car = CarWriter::new(out, &[root])?;
    car.write_block(&root, &root_bytes)?;

    let mut buf = vec![0u8; block_size];
    for w in &writes {
        let mut src = File::open(w.src).map_err(encoding)?;
        src.seek(SeekFrom::Start(w.off)).map_err(encoding)?;
        let n = read_full(&mut src, &mut buf[..w.len as usize]).map_err(encoding)?;
        let data = &buf[..n];
        if n as u64 != w.len || Cid::raw(data) != w.cid {
            return Err(FiniError::Encoding(format!(
                "{} changed while packing",
                w.src.display()
            )));
        }
        car.write_block(&w.cid, data)?;
    }
    let (_, written) = car.finish()?;
    stats.archive_bytes = written;

    Ok((root, stats))
}

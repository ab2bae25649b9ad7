use std::path::Path;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::warn;

use crate::activity::ActivityLog;
use crate::error::{FiniError, Result};
use crate::pack::cid::Cid;
use crate::pack::writer::PackStats;

/// Backing storage for one encoded archive.
pub trait BlockStore: Send + Sync {
    fn path(&self) -> &Path;
    fn len(&self) -> u64;
    fn close(self: Box<Self>) -> Result<()>;
}

/// Archive bytes held in a temporary file that is removed on close.
pub struct TempBlockStore {
    file: NamedTempFile,
    len: u64,
}

impl TempBlockStore {
    pub fn new(file: NamedTempFile, len: u64) -> Self {
        Self { file, len }
    }
}

impl BlockStore for TempBlockStore {
    fn path(&self) -> &Path {
        self.file.path()
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.file
            .close()
            .map_err(|e| FiniError::ResourceRelease(e.to_string()))
    }
}

pub struct Archive {
    cid: Cid,
    stats: PackStats,
    store: Box<dyn BlockStore>,
}

impl Archive {
    pub fn new(cid: Cid, stats: PackStats, store: Box<dyn BlockStore>) -> Self {
        Self { cid, stats, store }
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn stats(&self) -> &PackStats {
        &self.stats
    }

    pub fn store(&self) -> &dyn BlockStore {
        self.store.as_ref()
    }

    pub fn size(&self) -> u64 {
        self.store.len()
    }

    pub fn into_parts(self) -> (Cid, PackStats, Box<dyn BlockStore>) {
        (self.cid, self.stats, self.store)
    }

    pub fn close(self) -> Result<()> {
        self.store.close()
    }
}

/// Owns an archive for the span of one upload job and releases its block
/// store exactly once: through `release`, or on drop for every other exit.
pub struct ArchiveGuard {
    inner: Option<Archive>,
    activity: Arc<ActivityLog>,
}

impl ArchiveGuard {
    pub fn new(archive: Archive, activity: Arc<ActivityLog>) -> Self {
        Self {
            inner: Some(archive),
            activity,
        }
    }

    pub fn archive(&self) -> &Archive {
        match &self.inner {
            Some(a) => a,
            None => unreachable!("released guards are consumed"),
        }
    }

    /// Close the block store. Failure is logged and reported, never raised.
    pub fn release(mut self) -> bool {
        self.release_inner()
    }

    fn release_inner(&mut self) -> bool {
        let Some(archive) = self.inner.take() else {
            return true;
        };
        self.activity.record("closing blockstore");
        match archive.close() {
            Ok(()) => true,
            Err(e) => {
                let msg = match e {
                    FiniError::ResourceRelease(m) => m,
                    other => other.to_string(),
                };
                self.activity
                    .record(format!("failed to close blockstore: {msg}"));
                warn!(error = %msg, "failed to close blockstore");
                false
            }
        }
    }
}

impl Drop for ArchiveGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        inner: TempBlockStore,
        closes: Arc<AtomicUsize>,
        fail: bool,
    }

    impl BlockStore for CountingStore {
        fn path(&self) -> &Path {
            self.inner.path()
        }
        fn len(&self) -> u64 {
            self.inner.len()
        }
        fn close(self: Box<Self>) -> Result<()> {
            let CountingStore {
                inner,
                closes,
                fail,
            } = *self;
            closes.fetch_add(1, Ordering::SeqCst);
            Box::new(inner).close()?;
            if fail {
                return Err(FiniError::ResourceRelease("device busy".into()));
            }
            Ok(())
        }
    }

    fn archive(closes: &Arc<AtomicUsize>, fail: bool) -> (Archive, std::path::PathBuf) {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"car").unwrap();
        let path = f.path().to_path_buf();
        let store = CountingStore {
            inner: TempBlockStore::new(f, 3),
            closes: Arc::clone(closes),
            fail,
        };
        (
            Archive::new(Cid::raw(b"car"), PackStats::default(), Box::new(store)),
            path,
        )
    }

    #[test]
    fn explicit_release_closes_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let (a, path) = archive(&closes, false);
        let guard = ArchiveGuard::new(a, Arc::new(ActivityLog::disabled()));
        assert_eq!(guard.archive().size(), 3);
        assert!(guard.release());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!path.exists());
    }

    #[test]
    fn drop_releases_on_early_exit() {
        let closes = Arc::new(AtomicUsize::new(0));
        let (a, path) = archive(&closes, false);
        {
            let _guard = ArchiveGuard::new(a, Arc::new(ActivityLog::disabled()));
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!path.exists());
    }

    #[test]
    fn release_failure_is_logged_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ActivityLog::open(dir.path().join("log.txt")));
        let closes = Arc::new(AtomicUsize::new(0));
        let (a, _) = archive(&closes, true);
        assert!(!ArchiveGuard::new(a, Arc::clone(&log)).release());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let text = std::fs::read_to_string(dir.path().join("log.txt")).unwrap();
        let failures: Vec<_> = text
            .lines()
            .filter(|l| l.contains("failed to close blockstore: device busy"))
            .collect();
        assert_eq!(failures.len(), 1);
    }
}

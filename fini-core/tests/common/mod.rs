#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use fini_core::activity::ActivityLog;
use fini_core::credentials::{Credentials, MemoryCredentials};
use fini_core::pack::blockstore::{Archive, BlockStore};
use fini_core::progress::{ProgressEvent, ProgressReceiver};
use fini_core::store::client::{ChunkReceipt, Transport, TransportError};
use fini_core::{ArchivePackager, FiniError, Packager, Result, Settings, Uploader};

/// Counts calls; fails every call with `status` when set.
#[derive(Default)]
pub struct CountingTransport {
    pub calls: AtomicUsize,
    pub fail_status: Option<u16>,
}

impl CountingTransport {
    pub fn failing(status: u16) -> Self {
        Self {
            fail_status: Some(status),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for CountingTransport {
    fn send_chunk(
        &self,
        _token: &str,
        _chunk: Bytes,
    ) -> impl Future<Output = std::result::Result<ChunkReceipt, TransportError>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self.fail_status;
        async move {
            match status {
                Some(status) => Err(TransportError::Status {
                    status,
                    message: "simulated outage".into(),
                }),
                None => Ok(ChunkReceipt::default()),
            }
        }
    }
}

/// Wraps the real packager and counts invocations.
#[derive(Default)]
pub struct CountingPackager {
    pub inner: ArchivePackager,
    pub calls: AtomicUsize,
}

impl CountingPackager {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Packager for CountingPackager {
    fn package(&self, dir: &Path) -> Result<Archive> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.package(dir)
    }
}

/// Packs normally but hands out block stores whose close always fails.
#[derive(Default)]
pub struct FailingReleasePackager {
    pub inner: ArchivePackager,
}

struct FailingClose(Box<dyn BlockStore>);

impl BlockStore for FailingClose {
    fn path(&self) -> &Path {
        self.0.path()
    }

    fn len(&self) -> u64 {
        self.0.len()
    }

    fn close(self: Box<Self>) -> Result<()> {
        let FailingClose(inner) = *self;
        inner.close()?;
        Err(FiniError::ResourceRelease("simulated close failure".into()))
    }
}

impl Packager for FailingReleasePackager {
    fn package(&self, dir: &Path) -> Result<Archive> {
        let (cid, stats, store) = self.inner.package(dir)?.into_parts();
        Ok(Archive::new(cid, stats, Box::new(FailingClose(store))))
    }
}

/// Root `R` with `A` (3 files, 300 bytes) and `B` (1 file, 100 bytes).
pub fn sample_root(base: &Path) -> std::path::PathBuf {
    let root = base.join("R");
    std::fs::create_dir_all(root.join("A")).unwrap();
    std::fs::create_dir_all(root.join("B")).unwrap();
    for (i, byte) in [b'x', b'y', b'z'].into_iter().enumerate() {
        std::fs::write(root.join("A").join(format!("a{i}.bin")), vec![byte; 100]).unwrap();
    }
    std::fs::write(root.join("B/b.bin"), vec![b'w'; 100]).unwrap();
    root
}

pub fn settings(data_dir: &Path) -> Settings {
    Settings {
        chunk_size: 128,
        max_retries: 2,
        retry_base_delay: Duration::from_millis(1),
        attempt_timeout: Duration::from_secs(5),
        ..Settings::with_data_dir(data_dir)
    }
}

pub fn uploader<T: Transport>(
    settings: Settings,
    token: Option<&str>,
    transport: T,
    packager: Arc<dyn Packager>,
) -> Uploader<T> {
    let creds: Arc<dyn Credentials> = Arc::new(match token {
        Some(t) => MemoryCredentials::with_token(t),
        None => MemoryCredentials::default(),
    });
    let activity = Arc::new(ActivityLog::open(settings.log_path()));
    Uploader::new(settings, creds, transport, packager, activity)
}

pub fn drain(rx: &mut ProgressReceiver) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

pub fn errors(events: &[ProgressEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::JobError { error, .. } => Some(error.as_str()),
            _ => None,
        })
        .collect()
}

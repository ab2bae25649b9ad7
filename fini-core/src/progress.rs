use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use crate::scan::DirectorySet;

/// Everything an observer needs to render a run. Owned by the orchestrator,
/// handed out by value only.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub dir_set: DirectorySet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Update {
    /// One chunk of `bytes` stored for subdirectory `index`.
    Chunk { index: usize, bytes: u64 },
    Error(String),
    ManifestWritten(PathBuf),
}

impl ProgressState {
    pub fn scanned(dir_set: DirectorySet) -> Self {
        Self {
            dir_set,
            ..Default::default()
        }
    }

    pub fn is_erroring(&self) -> bool {
        self.error.is_some()
    }

    /// Next state after `update`. Chunk progress only ever grows the one
    /// subdirectory it names; an error replaces any earlier error and
    /// leaves every other field alone.
    pub fn next(&self, update: &Update) -> ProgressState {
        let mut next = self.clone();
        match update {
            Update::Chunk { index, bytes } => {
                if let Some(sub) = next.dir_set.subdirectories.get_mut(*index) {
                    sub.uploaded_bytes = sub.uploaded_bytes.saturating_add(*bytes);
                }
            }
            Update::Error(msg) => next.error = Some(msg.clone()),
            Update::ManifestWritten(path) => next.manifest_path = Some(path.clone()),
        }
        next
    }
}

/// Snapshot published to the observer after every state change.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    Scanned {
        dir_set: DirectorySet,
    },
    ChunkProgress {
        dir_set: DirectorySet,
        subdirectory: String,
        uploaded_bytes: u64,
    },
    JobError {
        dir_set: DirectorySet,
        error: String,
    },
    ManifestUpdated {
        dir_set: DirectorySet,
        manifest_path: PathBuf,
    },
}

impl ProgressEvent {
    pub fn dir_set(&self) -> &DirectorySet {
        match self {
            ProgressEvent::Scanned { dir_set }
            | ProgressEvent::ChunkProgress { dir_set, .. }
            | ProgressEvent::JobError { dir_set, .. }
            | ProgressEvent::ManifestUpdated { dir_set, .. } => dir_set,
        }
    }

    fn after(state: &ProgressState, update: &Update) -> Self {
        let dir_set = state.dir_set.clone();
        match update {
            Update::Chunk { index, .. } => {
                let sub = dir_set.subdirectories.get(*index).cloned().unwrap_or_default();
                ProgressEvent::ChunkProgress {
                    dir_set,
                    subdirectory: sub.name,
                    uploaded_bytes: sub.uploaded_bytes,
                }
            }
            Update::Error(error) => ProgressEvent::JobError {
                dir_set,
                error: error.clone(),
            },
            Update::ManifestWritten(manifest_path) => ProgressEvent::ManifestUpdated {
                dir_set,
                manifest_path: manifest_path.clone(),
            },
        }
    }
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Folds updates into the run's `ProgressState` and publishes each result.
pub struct Aggregator {
    state: ProgressState,
    tx: ProgressSender,
}

impl Aggregator {
    pub fn new(dir_set: DirectorySet, tx: ProgressSender) -> Self {
        Self {
            state: ProgressState::scanned(dir_set),
            tx,
        }
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    pub fn snapshot(&self) -> ProgressState {
        self.state.clone()
    }

    /// Scan confirmation.
    pub fn publish_scanned(&self) {
        self.publish(ProgressEvent::Scanned {
            dir_set: self.state.dir_set.clone(),
        });
    }

    pub fn apply(&mut self, update: Update) -> &ProgressState {
        let next = self.state.next(&update);
        let event = ProgressEvent::after(&next, &update);
        self.state = next;
        self.publish(event);
        &self.state
    }

    fn publish(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            trace!("progress observer gone; snapshot dropped");
        }
    }
}

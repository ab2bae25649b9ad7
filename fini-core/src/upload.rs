use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

use crate::activity::ActivityLog;
use crate::credentials::Credentials;
use crate::error::{FiniError, Result};
use crate::manifest::ManifestStore;
use crate::pack::blockstore::ArchiveGuard;
use crate::pack::writer::Packager;
use crate::progress::{Aggregator, ProgressEvent, ProgressSender, Update};
use crate::scan::{DirectorySet, scan};
use crate::settings::{FailurePolicy, Settings};
use crate::store::client::{StoreClient, Transport};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Scanned,
    UploadingJob(usize),
    JobDone(usize),
    /// Terminal under fail-fast.
    JobFailed(usize),
    AllDone,
}

#[derive(Debug)]
pub enum JobOutcome {
    /// Stored remotely. `manifest_error` is set when recording the CID failed.
    Done {
        cid: String,
        manifest_error: Option<String>,
    },
    Failed(FiniError),
    /// Not started because an earlier job failed.
    Skipped,
}

#[derive(Debug)]
pub struct RunReport {
    pub dir_set: DirectorySet,
    pub jobs: Vec<(String, JobOutcome)>,
    pub state: RunState,
    pub manifest_path: PathBuf,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::AllDone
            && self.jobs.iter().all(|(_, j)| {
                matches!(
                    j,
                    JobOutcome::Done {
                        manifest_error: None,
                        ..
                    }
                )
            })
    }

    pub fn first_failure(&self) -> Option<(&str, &FiniError)> {
        self.jobs.iter().find_map(|(name, j)| match j {
            JobOutcome::Failed(e) => Some((name.as_str(), e)),
            _ => None,
        })
    }

    pub fn into_first_error(self) -> Option<FiniError> {
        self.jobs.into_iter().find_map(|(_, j)| match j {
            JobOutcome::Failed(e) => Some(e),
            JobOutcome::Done {
                manifest_error: Some(m),
                ..
            } => Some(FiniError::ManifestWrite(m)),
            _ => None,
        })
    }
}

/// Drives scan -> package -> store -> record for every subdirectory of a
/// root, one job at a time.
pub struct Uploader<T> {
    settings: Settings,
    credentials: Arc<dyn Credentials>,
    client: StoreClient<T>,
    packager: Arc<dyn Packager>,
    manifest: ManifestStore,
    activity: Arc<ActivityLog>,
    state: RunState,
}

impl<T: Transport> Uploader<T> {
    pub fn new(
        settings: Settings,
        credentials: Arc<dyn Credentials>,
        transport: T,
        packager: Arc<dyn Packager>,
        activity: Arc<ActivityLog>,
    ) -> Self {
        let client = StoreClient::new(transport, settings.retry_policy(), settings.chunk_size);
        let manifest = ManifestStore::new(settings.manifest_path());
        Self {
            settings,
            credentials,
            client,
            packager,
            manifest,
            activity,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn client(&self) -> &StoreClient<T> {
        &self.client
    }

    pub fn manifest(&self) -> &ManifestStore {
        &self.manifest
    }

    /// Select a new root and upload all of its subdirectories. Publishes a
    /// scan confirmation, then a snapshot for every progress change.
    pub async fn set_dir(
        &mut self,
        root: &Path,
        name: &str,
        tx: ProgressSender,
    ) -> Result<RunReport> {
        self.activity.record(format_args!(
            "dir set: path - {}, name - {name}",
            root.display()
        ));
        self.state = RunState::Idle;

        let policy = self.settings.size_policy;
        let (scan_root, scan_name) = (root.to_path_buf(), name.to_string());
        let scanned = tokio::task::spawn_blocking(move || scan(&scan_root, &scan_name, policy))
            .await
            .map_err(|e| FiniError::Scan(e.to_string()))
            .and_then(|r| r);
        let dir_set = match scanned {
            Ok(d) => d,
            Err(e) => {
                self.activity.record(format_args!("error: {e}"));
                error!(error = %e, "scan failed");
                let empty = DirectorySet {
                    path: root.to_path_buf(),
                    name: name.to_string(),
                    subdirectories: Vec::new(),
                };
                // the observer still learns why nothing happened
                let _ = tx.send(ProgressEvent::JobError {
                    dir_set: empty,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };
        self.activity.record(format_args!(
            "subdirs: {}",
            serde_json::to_string(&dir_set.subdirectories)?
        ));
        self.state = RunState::Scanned;

        let mut progress = Aggregator::new(dir_set, tx);
        progress.publish_scanned();
        Ok(self.process_uploads(&mut progress).await)
    }

    async fn process_uploads(&mut self, progress: &mut Aggregator) -> RunReport {
        let names: Vec<String> = progress
            .state()
            .dir_set
            .subdirectories
            .iter()
            .map(|s| s.name.clone())
            .collect();
        let mut jobs = Vec::with_capacity(names.len());
        let mut aborted = None;

        for (i, name) in names.into_iter().enumerate() {
            if aborted.is_some() {
                jobs.push((name, JobOutcome::Skipped));
                continue;
            }
            self.state = RunState::UploadingJob(i);
            match self.upload_dir(i, progress).await {
                Ok(outcome) => {
                    self.state = RunState::JobDone(i);
                    jobs.push((name, outcome));
                }
                Err(e) => {
                    self.state = RunState::JobFailed(i);
                    jobs.push((name, JobOutcome::Failed(e)));
                    if self.settings.failure_policy == FailurePolicy::FailFast {
                        aborted = Some(i);
                    }
                }
            }
        }

        if aborted.is_none() {
            self.state = RunState::AllDone;
        }
        info!(
            state = ?self.state,
            jobs = jobs.len(),
            erroring = progress.state().is_erroring(),
            "run finished"
        );
        RunReport {
            dir_set: progress.snapshot().dir_set,
            jobs,
            state: self.state.clone(),
            manifest_path: self.manifest.path().to_path_buf(),
        }
    }

    /// Package and store subdirectory `index`, then record its CID.
    /// Failures are published before being returned.
    pub async fn upload_dir(&self, index: usize, progress: &mut Aggregator) -> Result<JobOutcome> {
        let dir_set = &progress.state().dir_set;
        let (Some(sub), Some(path)) = (
            dir_set.subdirectories.get(index).map(|s| s.name.clone()),
            dir_set.subdirectory_path(index),
        ) else {
            return Err(FiniError::Format(format!("no subdirectory at index {index}")));
        };
        let directory = dir_set.name.clone();
        self.activity.record(format_args!("beginning upload: {sub}"));

        let Some(token) = self.credentials.get_token() else {
            return Err(self.fail(progress, FiniError::MissingToken));
        };

        let packager = Arc::clone(&self.packager);
        let packed = tokio::task::spawn_blocking(move || packager.package(&path))
            .await
            .map_err(|e| FiniError::Encoding(e.to_string()))
            .and_then(|r| r);
        let archive = match packed {
            Ok(a) => a,
            Err(e) => return Err(self.fail(progress, e)),
        };

        let guard = ArchiveGuard::new(archive, Arc::clone(&self.activity));
        let cid = guard.archive().cid().to_string();
        let stored = self
            .client
            .store(guard.archive(), &token, |bytes| {
                progress.apply(Update::Chunk { index, bytes });
            })
            .await;
        guard.release();

        if let Err(e) = stored {
            return Err(self.fail(progress, e));
        }
        self.activity.record(format_args!("upload finished: {sub}"));

        self.activity
            .record(format_args!("adding to manifest: {sub} - {cid}"));
        let manifest_error = match self.manifest.merge(&directory, &sub, &cid) {
            Ok(_) => {
                progress.apply(Update::ManifestWritten(self.manifest.path().to_path_buf()));
                None
            }
            Err(e) => {
                // recorded upload stays valid; only the bookkeeping failed
                let msg = e.to_string();
                self.fail(progress, e);
                Some(msg)
            }
        };
        Ok(JobOutcome::Done {
            cid,
            manifest_error,
        })
    }

    fn fail(&self, progress: &mut Aggregator, e: FiniError) -> FiniError {
        self.activity.record(format_args!("error: {e}"));
        error!(error = %e, "upload job failed");
        progress.apply(Update::Error(e.to_string()));
        e
    }
}

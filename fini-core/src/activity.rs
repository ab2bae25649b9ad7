use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{info, warn};

/// Append-only activity log: one `[<local time>] <message>` line per record.
/// Never truncated, never rotated.
#[derive(Debug, Default)]
pub struct ActivityLog {
    path: Option<PathBuf>,
}

impl ActivityLog {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Records go to tracing only.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, message: impl Display) {
        info!(target: "fini::activity", "{message}");
        let Some(path) = &self.path else {
            return;
        };
        let line = format!("[{}] {}\n", localized_timestamp(), message);
        let res = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = res {
            warn!(path = %path.display(), error = %e, "could not append to activity log");
        }
    }
}

/// Local wall-clock time as `M/D/YYYY, h:mm:ss AM`; UTC when the local
/// offset is unavailable.
pub fn localized_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let fmt = format_description!(
        "[month padding:none]/[day padding:none]/[year], [hour repr:12 padding:none]:[minute]:[second] [period]"
    );
    now.format(fmt)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

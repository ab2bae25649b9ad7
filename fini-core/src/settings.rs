use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::store::client::RetryPolicy;

pub const DEFAULT_ENDPOINT: &str = "https://api.nft.storage";
pub const DEFAULT_MAX_RETRIES: u32 = 10;
/// Bytes sent per upload request.
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

pub const MANIFEST_FILE: &str = "fini_manifest.json";
pub const LOG_FILE: &str = "fini_log.txt";
pub const CREDENTIALS_FILE: &str = "config.json";

/// How the scanner measures a subdirectory's declared size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SizePolicy {
    /// Regular files directly inside the subdirectory only.
    #[default]
    Shallow,
    /// Every regular file below the subdirectory, matching what gets packed.
    Recursive,
}

impl FromStr for SizePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shallow" => Ok(SizePolicy::Shallow),
            "recursive" => Ok(SizePolicy::Recursive),
            other => Err(format!("unknown size policy `{other}` (expected shallow|recursive)")),
        }
    }
}

/// What happens to queued jobs after one job fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    #[default]
    FailFast,
    Continue,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub endpoint: String,
    pub max_retries: u32,
    pub chunk_size: usize,
    /// Upper bound for one upload attempt; hardening only.
    pub attempt_timeout: Duration,
    pub retry_base_delay: Duration,
    /// Holds the manifest, the activity log and stored credentials.
    pub data_dir: PathBuf,
    pub size_policy: SizePolicy,
    pub failure_policy: FailurePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            chunk_size: DEFAULT_CHUNK_SIZE,
            attempt_timeout: Duration::from_secs(120),
            retry_base_delay: Duration::from_millis(250),
            data_dir: PathBuf::from("."),
            size_policy: SizePolicy::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl Settings {
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir.join(MANIFEST_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_FILE)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
            attempt_timeout: self.attempt_timeout,
            ..RetryPolicy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_service() {
        let s = Settings::default();
        assert_eq!(s.endpoint, "https://api.nft.storage");
        assert_eq!(s.max_retries, 10);
        assert_eq!(s.size_policy, SizePolicy::Shallow);
        assert_eq!(s.failure_policy, FailurePolicy::FailFast);
    }

    #[test]
    fn data_files_live_under_data_dir() {
        let s = Settings::with_data_dir("/tmp/fini");
        assert_eq!(s.manifest_path(), PathBuf::from("/tmp/fini/fini_manifest.json"));
        assert_eq!(s.log_path(), PathBuf::from("/tmp/fini/fini_log.txt"));
        assert_eq!(s.credentials_path(), PathBuf::from("/tmp/fini/config.json"));
    }

    #[test]
    fn size_policy_parses_case_insensitively() {
        assert_eq!("Recursive".parse::<SizePolicy>(), Ok(SizePolicy::Recursive));
        assert_eq!("shallow".parse::<SizePolicy>(), Ok(SizePolicy::Shallow));
        assert!("deep".parse::<SizePolicy>().is_err());
    }
}

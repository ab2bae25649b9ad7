use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::util::atomic::write_json_atomic;

/// Read/write contract of the API token holder. The token is opaque; it is
/// only ever validated by the remote service.
pub trait Credentials: Send + Sync {
    /// The stored token, `None` when absent or empty.
    fn get_token(&self) -> Option<String>;

    fn set_token(&self, token: &str) -> Result<()>;

    fn has_token(&self) -> bool {
        self.get_token().is_some()
    }

    fn clear_token(&self) -> Result<()> {
        self.set_token("")
    }
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StoredConfig {
    #[serde(default)]
    api_token: String,
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

/// Token kept as `{"apiToken": "..."}` in a JSON config file. Unknown keys
/// in that file are preserved.
#[derive(Clone, Debug)]
pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StoredConfig> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(StoredConfig::default()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Credentials for FileCredentials {
    fn get_token(&self) -> Option<String> {
        match self.read() {
            Ok(cfg) if !cfg.api_token.is_empty() => Some(cfg.api_token),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable credentials file");
                None
            }
        }
    }

    fn set_token(&self, token: &str) -> Result<()> {
        let mut cfg = self.read()?;
        cfg.api_token = token.to_string();
        write_json_atomic(&self.path, &cfg)
    }
}

#[derive(Debug, Default)]
pub struct MemoryCredentials {
    token: Mutex<String>,
}

impl MemoryCredentials {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(token.to_string()),
        }
    }
}

impl Credentials for MemoryCredentials {
    fn get_token(&self) -> Option<String> {
        let t = self.token.lock().map(|t| t.clone()).unwrap_or_default();
        (!t.is_empty()).then_some(t)
    }

    fn set_token(&self, token: &str) -> Result<()> {
        if let Ok(mut t) = self.token.lock() {
            *t = token.to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let creds = FileCredentials::new(dir.path().join("config.json"));
        assert!(!creds.has_token());

        creds.set_token("secret").unwrap();
        assert_eq!(creds.get_token().as_deref(), Some("secret"));

        creds.clear_token().unwrap();
        assert!(!creds.has_token());
        assert_eq!(creds.get_token(), None);
    }

    #[test]
    fn unrelated_settings_survive_token_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"apiToken": "", "theme": "dark"}"#).unwrap();
        let creds = FileCredentials::new(&path);
        creds.set_token("t").unwrap();

        let v: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["apiToken"], "t");
        assert_eq!(v["theme"], "dark");
    }

    #[test]
    fn corrupt_config_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let garbage = br#"{"theme": "dark", "apiTok"#;
        fs::write(&path, garbage).unwrap();
        let creds = FileCredentials::new(&path);

        assert!(creds.set_token("t").is_err());
        assert!(creds.clear_token().is_err());
        assert_eq!(fs::read(&path).unwrap(), garbage);
    }

    #[test]
    fn memory_store_treats_empty_as_absent() {
        let creds = MemoryCredentials::default();
        assert!(!creds.has_token());
        creds.set_token("abc").unwrap();
        assert!(creds.has_token());
        creds.clear_token().unwrap();
        assert_eq!(creds.get_token(), None);
    }
}

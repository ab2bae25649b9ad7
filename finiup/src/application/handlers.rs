use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fini_core::activity::ActivityLog;
use fini_core::credentials::{Credentials, FileCredentials};
use fini_core::error::{FiniError, Result};
use fini_core::pack::car::read_car;
use fini_core::pack::writer::BLOCK_SIZE;
use fini_core::progress::{ProgressEvent, ProgressReceiver, channel};
use fini_core::settings::{DEFAULT_CHUNK_SIZE, FailurePolicy};
use fini_core::{ArchivePackager, HttpTransport, ManifestStore, Settings, Uploader, pack_to, scan};

use tracing::{info, warn};

use crate::presentation::cli::GlobalArgs;

pub fn settings_from_args(args: &GlobalArgs) -> Settings {
    let data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);
    Settings {
        endpoint: args.endpoint.clone(),
        max_retries: args.max_retries,
        chunk_size: args.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
        size_policy: args.size_policy,
        failure_policy: if args.continue_on_error {
            FailurePolicy::Continue
        } else {
            FailurePolicy::FailFast
        },
        ..Settings::with_data_dir(data_dir)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("fini"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Manifest key for a root: its final path component.
fn root_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string())
}

fn credentials(settings: &Settings) -> FileCredentials {
    FileCredentials::new(settings.credentials_path())
}

pub fn handle_upload(settings: Settings, root: PathBuf, name: Option<String>) -> Result<()> {
    std::fs::create_dir_all(&settings.data_dir)?;
    let name = name.unwrap_or_else(|| root_name(&root));
    let creds: Arc<dyn Credentials> = Arc::new(credentials(&settings));
    let transport = HttpTransport::new(&settings.endpoint)?;
    let activity = Arc::new(ActivityLog::open(settings.log_path()));
    let packager = Arc::new(ArchivePackager::default());
    let mut uploader = Uploader::new(settings, creds, transport, packager, activity);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (tx, rx) = channel();
    let (report, _) = rt.block_on(async {
        tokio::join!(uploader.set_dir(&root, &name, tx), render(rx))
    });
    let report = report?;

    for (sub, job) in &report.jobs {
        info!(subdirectory = %sub, outcome = ?job, "job finished");
    }
    if let Some((sub, e)) = report.first_failure() {
        warn!(subdirectory = %sub, error = %e, state = ?report.state, "upload run failed");
    }
    match report.into_first_error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Print every snapshot until the run drops its sender.
async fn render(mut rx: ProgressReceiver) {
    while let Some(event) = rx.recv().await {
        match &event {
            ProgressEvent::Scanned { dir_set } => {
                eprintln!(
                    "scanned {} ({} subdirectories)",
                    dir_set.path.display(),
                    dir_set.subdirectories.len()
                );
            }
            ProgressEvent::ChunkProgress {
                dir_set,
                subdirectory,
                uploaded_bytes,
            } => {
                let percent = dir_set
                    .position(subdirectory)
                    .map(|i| dir_set.subdirectories[i].percent())
                    .unwrap_or_default();
                eprintln!("  {subdirectory:<24} {uploaded_bytes:>12} B {percent:>6.1}%");
            }
            ProgressEvent::JobError { error, .. } => eprintln!("error: {error}"),
            ProgressEvent::ManifestUpdated { manifest_path, .. } => {
                eprintln!("manifest updated: {}", manifest_path.display());
            }
        }
    }
}

pub fn handle_scan(settings: &Settings, root: PathBuf) -> Result<()> {
    let dir_set = scan(&root, &root_name(&root), settings.size_policy)?;
    info!(
        root = %root.display(),
        subdirectories = dir_set.subdirectories.len(),
        policy = ?settings.size_policy,
        "scanned"
    );
    println!("{}", serde_json::to_string_pretty(&dir_set)?);
    Ok(())
}

pub fn handle_pack(dir: PathBuf, out: PathBuf) -> Result<()> {
    let file = BufWriter::new(File::create(&out)?);
    let (cid, stats) = pack_to(&dir, file, BLOCK_SIZE)?;
    let stats = serde_json::to_string(&stats)?;
    info!(dir = %dir.display(), %cid, %stats, "packed");
    println!("{cid}");
    Ok(())
}

pub fn handle_list(archive: PathBuf) -> Result<()> {
    let car = read_car(BufReader::new(File::open(&archive)?))?;
    let mut out = std::io::stdout().lock();
    for root in &car.roots {
        writeln!(out, "root  {root}")?;
    }
    for (cid, data) in &car.blocks {
        writeln!(out, "block {cid} {}", data.len())?;
    }
    Ok(())
}

pub fn handle_manifest(settings: &Settings) -> Result<()> {
    let store = ManifestStore::new(settings.manifest_path());
    let mapping = store.load()?;
    eprintln!("{}", store.path().display());
    println!("{}", serde_json::to_string_pretty(&mapping)?);
    Ok(())
}

pub fn handle_token_set(settings: &Settings, token: &str) -> Result<()> {
    if token.trim().is_empty() {
        return Err(FiniError::MissingToken);
    }
    std::fs::create_dir_all(&settings.data_dir)?;
    credentials(settings).set_token(token)?;
    eprintln!("token stored");
    Ok(())
}

pub fn handle_token_clear(settings: &Settings) -> Result<()> {
    let creds = credentials(settings);
    if creds.path().exists() {
        creds.clear_token()?;
    }
    eprintln!("token cleared");
    Ok(())
}

pub fn handle_token_status(settings: &Settings) -> Result<()> {
    let creds = credentials(settings);
    if creds.has_token() {
        println!("token: set ({})", creds.path().display());
    } else {
        println!("token: missing");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fini_core::settings::SizePolicy;

    fn args(data_dir: &Path) -> GlobalArgs {
        GlobalArgs {
            endpoint: "http://127.0.0.1:9".into(),
            data_dir: Some(data_dir.to_path_buf()),
            max_retries: 1,
            chunk_size: Some(64),
            size_policy: SizePolicy::Recursive,
            continue_on_error: true,
        }
    }

    #[test]
    fn settings_follow_flags() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings_from_args(&args(dir.path()));
        assert_eq!(s.chunk_size, 64);
        assert_eq!(s.max_retries, 1);
        assert_eq!(s.failure_policy, FailurePolicy::Continue);
        assert_eq!(s.manifest_path(), dir.path().join("fini_manifest.json"));
    }

    #[test]
    fn root_name_is_last_component() {
        assert_eq!(root_name(Path::new("/photos/2024")), "2024");
    }

    #[test]
    fn token_commands_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings_from_args(&args(&dir.path().join("nested")));
        handle_token_set(&s, "abc").unwrap();
        assert!(credentials(&s).has_token());
        handle_token_clear(&s).unwrap();
        assert!(!credentials(&s).has_token());
        assert!(matches!(handle_token_set(&s, "  "), Err(FiniError::MissingToken)));
    }

    #[test]
    fn pack_then_list_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("a.txt"), b"hello").unwrap();
        let out = dir.path().join("a.car");
        handle_pack(src, out.clone()).unwrap();
        let car = read_car(File::open(&out).unwrap()).unwrap();
        assert_eq!(car.roots.len(), 1);
        handle_list(out).unwrap();
    }

    #[test]
    fn upload_without_token_reports_missing_token() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("R");
        std::fs::create_dir_all(root.join("A")).unwrap();
        std::fs::write(root.join("A/x"), b"x").unwrap();
        let s = settings_from_args(&args(&dir.path().join("data")));
        let err = handle_upload(s, root, None).unwrap_err();
        assert!(matches!(err, FiniError::MissingToken));
    }
}

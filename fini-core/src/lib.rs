#![forbid(unsafe_code)]

pub mod activity;
pub mod credentials;
pub mod error;
pub mod manifest;
pub mod progress;
pub mod scan;
pub mod settings;
pub mod upload;

pub mod util {
    pub mod atomic;
    pub mod varint;
}

pub mod pack {
    pub mod blockstore;
    pub mod car;
    pub mod cid;
    pub mod writer;
}

pub mod store {
    pub mod client;
    pub mod http;
}

// Re-exports: stable API surface
pub use error::{FiniError, Result};
pub use manifest::ManifestStore;
pub use pack::writer::{ArchivePackager, Packager, pack_to};
pub use progress::{ProgressEvent, ProgressState};
pub use scan::{DirectorySet, Subdirectory, scan};
pub use settings::Settings;
pub use store::http::HttpTransport;
pub use upload::{JobOutcome, RunReport, RunState, Uploader};

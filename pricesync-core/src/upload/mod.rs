//! Upload of export files to remote storage.

pub mod drive;

pub use drive::DriveUploader;

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Transport(String),

    #[error("upload rejected with HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// A file as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub web_view_link: Option<String>,
}

pub trait Uploader: Send + Sync {
    fn name(&self) -> &str;

    /// Upload `path`, replacing a remote file of the same name if there is one.
    fn upload(&self, path: &Path) -> Result<RemoteFile, UploadError>;
}

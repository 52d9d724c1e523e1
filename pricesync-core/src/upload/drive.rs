//! Google Drive uploader.
//!
//! Looks the file up by name inside the target folder, then either updates
//! its content (`PATCH`) or creates it (`POST`), both as a
//! `multipart/related` upload carrying JSON metadata plus the file body.
//! Authentication is a pre-issued OAuth access token.

use super::{RemoteFile, UploadError, Uploader};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

pub const DRIVE_API_URL: &str = "https://www.googleapis.com";

const BOUNDARY: &str = "pricesync-upload-boundary";
const FILE_FIELDS: &str = "id,name,webViewLink";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    web_view_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

pub struct DriveUploader {
    client: reqwest::blocking::Client,
    access_token: String,
    folder_id: String,
    base_url: String,
}

impl DriveUploader {
    pub fn new(
        access_token: impl Into<String>,
        folder_id: impl Into<String>,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            access_token: access_token.into(),
            folder_id: folder_id.into(),
            base_url: DRIVE_API_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Drive search expression for a non-trashed file `name` in the folder.
    pub fn search_query(&self, name: &str) -> String {
        format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query_literal(name),
            escape_query_literal(&self.folder_id)
        )
    }

    fn find_existing(&self, name: &str) -> Result<Option<String>, UploadError> {
        let response = self
            .client
            .get(format!("{}/drive/v3/files", self.base_url))
            .bearer_auth(&self.access_token)
            .query(&[
                ("q", self.search_query(name).as_str()),
                ("fields", "files(id,name)"),
                ("spaces", "drive"),
            ])
            .send()?;
        let list: FileList = check(response)?.json()?;
        Ok(list.files.into_iter().next().map(|f| f.id))
    }
}

impl Uploader for DriveUploader {
    fn name(&self) -> &str {
        "google-drive"
    }

    fn upload(&self, path: &Path) -> Result<RemoteFile, UploadError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = std::fs::read(path).map_err(|source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let existing = self.find_existing(&name)?;
        let request = match &existing {
            Some(id) => {
                let metadata = json!({ "name": name });
                self.client
                    .patch(format!("{}/upload/drive/v3/files/{id}", self.base_url))
                    .body(related_body(&metadata, &content))
            }
            None => {
                let metadata = json!({ "name": name, "parents": [self.folder_id] });
                self.client
                    .post(format!("{}/upload/drive/v3/files", self.base_url))
                    .body(related_body(&metadata, &content))
            }
        };

        let response = request
            .bearer_auth(&self.access_token)
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={BOUNDARY}"),
            )
            .send()?;
        let file: DriveFile = check(response)?.json()?;

        tracing::info!(
            file = %name,
            id = %file.id,
            replaced = existing.is_some(),
            "uploaded to Google Drive"
        );
        Ok(RemoteFile {
            id: file.id,
            name: if file.name.is_empty() { name } else { file.name },
            web_view_link: file.web_view_link,
        })
    }
}

fn check(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(UploadError::Api {
        status: status.as_u16(),
        body: response.text().unwrap_or_default(),
    })
}

/// Single quotes and backslashes must be escaped inside Drive query strings.
fn escape_query_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Two-part `multipart/related` body: JSON metadata, then the file.
pub fn related_body(metadata: &serde_json::Value, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

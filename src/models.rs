//! Data models for Microsoft Graph drive API requests and responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file or folder in OneDrive, as returned after an upload completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub e_tag: Option<String>,
    #[serde(default, rename = "cTag")]
    pub c_tag: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub created_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub folder: Option<serde_json::Value>,
}

impl DriveItem {
    /// Whether this item is a folder rather than a file.
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }
}

impl std::fmt::Display for DriveItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let size_str = self
            .size
            .map(format_size)
            .unwrap_or_else(|| "-".to_string());
        let name = self.name.as_deref().unwrap_or("-");
        write!(f, "{}\t{}\t{}", self.id, size_str, name)
    }
}

/// The subset of an item needed to stream its content.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadableItem {
    pub id: String,
    pub size: u64,
    /// Pre-authenticated, short-lived URL. Requests to it carry no credential.
    #[serde(default, rename = "@microsoft.graph.downloadUrl")]
    pub download_url: Option<String>,
}

/// Format bytes into human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// What the server should do when an item with the same name already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictBehavior {
    #[default]
    Rename,
    Fail,
    Replace,
}

/// Information about a file to upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadMetadata {
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: ConflictBehavior,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Name with extension of the uploaded file.
    pub name: String,
    /// Folder under the app root. Only used to build the session URL.
    #[serde(skip)]
    pub path: String,
}

impl UploadMetadata {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            conflict_behavior: ConflictBehavior::default(),
            description: None,
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn with_conflict_behavior(mut self, behavior: ConflictBehavior) -> Self {
        self.conflict_behavior = behavior;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Body of a createUploadSession request.
#[derive(Debug, Serialize)]
pub struct UploadSessionRequest<'a> {
    pub item: &'a UploadMetadata,
}

/// Raw createUploadSession response. The upload URL is optional here so a
/// missing one can be reported as a typed error instead of a parse failure.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionResponse {
    #[serde(default)]
    pub upload_url: Option<String>,
    #[serde(default)]
    pub expiration_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_expected_ranges: Vec<String>,
}

/// The signed-in user, as returned by `GET /me`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.display_name.as_deref().unwrap_or("-");
        match self.user_principal_name.as_deref().or(self.mail.as_deref()) {
            Some(login) => write!(f, "{} <{}> ({})", name, login, self.id),
            None => write!(f, "{} ({})", name, self.id),
        }
    }
}

/// OAuth2 token response from the Microsoft identity platform.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Microsoft Graph error envelope.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

//! Client configuration: application identity, persisted tokens and endpoints.

use std::fs;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DriveError, Result};
use crate::models::TokenResponse;

/// Microsoft Graph API v1.0 base URL.
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Microsoft identity platform endpoint for the common tenant.
pub const LOGIN_BASE: &str = "https://login.microsoftonline.com/common/oauth2/v2.0";

/// Environment variable holding the application (client) id.
pub const CLIENT_ID_VAR: &str = "ONEDRIVE_CLIENT_ID";

/// Environment variable holding the application secret.
pub const CLIENT_SECRET_VAR: &str = "ONEDRIVE_CLIENT_SECRET";

/// Scopes needed to upload into and read from the app folder.
pub const DEFAULT_SCOPES: &[&str] = &[
    "openid",
    "offline_access",
    "User.Read",
    "Files.ReadWrite.AppFolder",
];

/// Registered application identity used for token requests.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientInfo {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Read the client id and secret from `ONEDRIVE_CLIENT_ID` and `ONEDRIVE_CLIENT_SECRET`.
    pub fn from_env() -> Result<Self> {
        Self::from_env_vars(CLIENT_ID_VAR, CLIENT_SECRET_VAR)
    }

    /// Read the client id and secret from the named environment variables.
    pub fn from_env_vars(id_var: &str, secret_var: &str) -> Result<Self> {
        let client_id =
            std::env::var(id_var).map_err(|_| DriveError::MissingEnvVar(id_var.to_string()))?;
        let client_secret = std::env::var(secret_var)
            .map_err(|_| DriveError::MissingEnvVar(secret_var.to_string()))?;
        Ok(Self::new(client_id, client_secret))
    }
}

/// An access token together with its expiration and refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Token layout that records when the token was issued and its lifetime
/// instead of the expiration instant.
#[derive(Debug, Deserialize)]
struct IssuedToken {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    expires_in: i64,
    created: DateTime<Utc>,
}

impl From<IssuedToken> for StoredToken {
    fn from(token: IssuedToken) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token.filter(|t| !t.is_empty()),
            expires_at: expiry(token.created, token.expires_in),
            scope: token.scope,
        }
    }
}

/// `issued_at + lifetime_secs`, saturating at the largest representable instant.
fn expiry(issued_at: DateTime<Utc>, lifetime_secs: i64) -> DateTime<Utc> {
    chrono::Duration::try_seconds(lifetime_secs)
        .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl StoredToken {
    /// Build a token from a token endpoint response received at `issued_at`.
    pub fn from_response(response: TokenResponse, issued_at: DateTime<Utc>) -> Self {
        let expires_in = i64::try_from(response.expires_in).unwrap_or(i64::MAX);

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: expiry(issued_at, expires_in),
            scope: response.scope,
        }
    }

    /// Parse token JSON in either the `expires_at` layout or the
    /// `created` + `expires_in` layout.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        match serde_json::from_slice::<StoredToken>(json) {
            Ok(token) => Ok(token),
            Err(err) => match serde_json::from_slice::<IssuedToken>(json) {
                Ok(issued) => Ok(issued.into()),
                Err(_) => Err(err.into()),
            },
        }
    }

    /// Whether the token can no longer be used at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Load a token from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let content = content.trim();

        // Accept both plain JSON and the compact blob form.
        if content.starts_with('{') {
            Self::from_json(content.as_bytes())
        } else {
            Self::decode(content)
        }
    }

    /// Write the token as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Encode as a URL-safe base64 blob of the token JSON.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode a URL-safe base64 token blob.
    ///
    /// Accepts blobs produced by [`StoredToken::encode`] as well as blobs of
    /// the `created` + `expires_in` layout.
    pub fn decode(blob: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(blob.trim().trim_end_matches('='))?;
        Self::from_json(&bytes)
    }
}

/// Endpoints and transport settings for a client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Graph API base, without a trailing slash.
    pub api_base: String,
    /// OAuth2 token endpoint used for refreshes.
    pub token_endpoint: String,
    /// Whole-request timeout. `None` keeps the transport default.
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: GRAPH_API_BASE.to_string(),
            token_endpoint: format!("{}/token", LOGIN_BASE),
            timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the HTTP client shared by every part of a [`crate::OneDriveClient`].
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }
}

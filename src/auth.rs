//! Bearer credentials for the Graph API, refreshed on demand.

use std::sync::Arc;

use chrono::Utc;
use reqwest::{Client, Url};
use tokio::sync::Mutex;

use crate::config::{ClientInfo, StoredToken, DEFAULT_SCOPES, LOGIN_BASE};
use crate::error::{DriveError, Result};
use crate::models::TokenResponse;

/// OAuth2 token endpoint of the Microsoft identity platform.
#[derive(Debug)]
struct TokenEndpoint {
    client_info: ClientInfo,
    token_endpoint: String,
    client: Client,
}

impl TokenEndpoint {
    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> Result<StoredToken> {
        self.request_token(&[
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    /// Redeem an authorization code delivered to `redirect_uri`.
    async fn redeem_code(&self, code: &str, redirect_uri: &str) -> Result<StoredToken> {
        self.request_token(&[
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    /// POST a grant together with the application identity and scopes.
    async fn request_token(&self, grant: &[(&str, &str)]) -> Result<StoredToken> {
        let scope = DEFAULT_SCOPES.join(" ");
        let mut params = vec![
            ("client_id", self.client_info.client_id.as_str()),
            ("client_secret", self.client_info.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];
        params.extend_from_slice(grant);

        let issued_at = Utc::now();
        let response = self
            .client
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| DriveError::AuthenticationError(format!("token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::AuthenticationError(format!(
                "Status {}: {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            DriveError::AuthenticationError(format!("malformed token response: {}", e))
        })?;

        Ok(StoredToken::from_response(token_response, issued_at))
    }
}

/// An access token that refreshes itself once its expiration instant passes.
///
/// Clones share the same token state, so a refresh performed through one clone
/// is seen by all of them. Refreshes are serialized: callers arriving while a
/// refresh is in flight wait for it and then reuse its result.
#[derive(Debug, Clone)]
pub struct ExpiringCredential {
    token: Arc<Mutex<StoredToken>>,
    endpoint: Arc<TokenEndpoint>,
}

impl ExpiringCredential {
    /// Create a credential from a previously obtained token.
    ///
    /// # Arguments
    /// * `token` - Current access token, its expiration and refresh token
    /// * `client_info` - Application identity used when refreshing
    /// * `token_endpoint` - OAuth2 token endpoint URL
    /// * `client` - HTTP client used for refresh requests
    pub fn new(
        token: StoredToken,
        client_info: ClientInfo,
        token_endpoint: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            token: Arc::new(Mutex::new(token)),
            endpoint: Arc::new(TokenEndpoint {
                client_info,
                token_endpoint: token_endpoint.into(),
                client,
            }),
        }
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;

        if !token.is_expired() {
            return Ok(token.access_token.clone());
        }

        let refresh_token = token.refresh_token.clone().ok_or_else(|| {
            DriveError::AuthenticationError(
                "access token expired and no refresh token is available".to_string(),
            )
        })?;

        tracing::debug!(expired_at = %token.expires_at, "access token expired, refreshing");
        let mut refreshed = self.endpoint.refresh(&refresh_token).await?;

        // The identity platform may omit a rotated refresh token.
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }

        tracing::info!(expires_at = %refreshed.expires_at, "access token refreshed");
        *token = refreshed;

        Ok(token.access_token.clone())
    }

    /// Copy of the current token state, e.g. to persist it after a refresh.
    pub async fn snapshot(&self) -> StoredToken {
        self.token.lock().await.clone()
    }
}

/// Source of the `Authorization` header for Graph requests.
#[derive(Debug, Clone)]
pub enum Authorization {
    /// A fixed bearer token that is never refreshed.
    Static(String),
    /// A token refreshed through the OAuth2 refresh-token grant.
    Expiring(ExpiringCredential),
}

impl Authorization {
    /// Produce a currently valid bearer token.
    pub async fn bearer_token(&self) -> Result<String> {
        match self {
            Authorization::Static(token) if token.is_empty() => Err(
                DriveError::AuthenticationError("empty access token".to_string()),
            ),
            Authorization::Static(token) => Ok(token.clone()),
            Authorization::Expiring(credential) => credential.access_token().await,
        }
    }
}

impl From<ExpiringCredential> for Authorization {
    fn from(credential: ExpiringCredential) -> Self {
        Authorization::Expiring(credential)
    }
}

/// Build the URL a user visits to grant this application access.
///
/// The code delivered to `redirect_uri` is exchanged for tokens outside this
/// crate.
pub fn authorization_url(client_info: &ClientInfo, redirect_uri: &str, state: &str) -> Result<Url> {
    let scope = DEFAULT_SCOPES.join(" ");
    Url::parse_with_params(
        &format!("{}/authorize", LOGIN_BASE),
        &[
            ("client_id", client_info.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", redirect_uri),
            ("response_mode", "query"),
            ("prompt", "select_account"),
            ("scope", scope.as_str()),
            ("state", state),
        ],
    )
    .map_err(|e| DriveError::AuthenticationError(format!("invalid authorization URL: {}", e)))
}

/// Redeem the authorization code returned to `redirect_uri` for a token.
///
/// `redirect_uri` must match the one used to build the authorization URL.
pub async fn exchange_code(
    client: &Client,
    client_info: &ClientInfo,
    code: &str,
    redirect_uri: &str,
    token_endpoint: &str,
) -> Result<StoredToken> {
    let endpoint = TokenEndpoint {
        client_info: client_info.clone(),
        token_endpoint: token_endpoint.to_string(),
        client: client.clone(),
    };

    let token = endpoint.redeem_code(code, redirect_uri).await?;
    tracing::info!(expires_at = %token.expires_at, "authorization code redeemed");
    Ok(token)
}

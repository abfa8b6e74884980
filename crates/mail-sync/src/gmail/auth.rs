//! Gmail OAuth2 token management
//!
//! Accounts are connected out of band; the daemon receives a stored token
//! with a refresh token and keeps the access token fresh on demand.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use crate::config::GmailCredentials;

/// Seconds before expiry at which a token is treated as expired
const EXPIRY_BUFFER_SECS: i64 = 300;

/// The token endpoint refused the refresh token (`invalid_grant`)
///
/// The grant was revoked or expired. Only a new consent fixes this, so the
/// account must be signed out rather than retried.
#[derive(Debug, thiserror::Error)]
#[error("refresh token rejected: {0}")]
pub struct AuthRejectedError(pub String);

/// Source of bearer tokens for Gmail API requests
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Result<String>;
}

/// Stored token data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
}

impl StoredToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at > now + EXPIRY_BUFFER_SECS)
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// Error body from the token endpoint
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Refreshing token source for one connected Gmail account
pub struct GmailAuth {
    credentials: GmailCredentials,
    token: Mutex<StoredToken>,
    token_path: Option<PathBuf>,
}

impl GmailAuth {
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    pub fn new(credentials: GmailCredentials, token: StoredToken) -> Self {
        Self {
            credentials,
            token: Mutex::new(token),
            token_path: None,
        }
    }

    /// Persist refreshed tokens to this file
    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = Some(path.into());
        self
    }

    /// Snapshot of the current token
    pub fn current_token(&self) -> StoredToken {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Refresh an access token using a refresh token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let mut response = ureq::post(Self::TOKEN_URL)
            .config()
            .http_status_as_error(false)
            .build()
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(classify_token_error(status, &body));
        }

        let mut token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse refresh token response")?;

        // Google omits the refresh token when it did not rotate it
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }

    fn save_token(&self, token: &StoredToken) -> Result<()> {
        let Some(path) = &self.token_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config::save_json_file(path, token)
    }
}

impl TokenSource for GmailAuth {
    fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        let now = chrono::Utc::now().timestamp();
        if token.is_fresh(now) {
            return Ok(token.access_token.clone());
        }

        let refresh_token = token
            .refresh_token
            .clone()
            .ok_or_else(|| AuthRejectedError("no refresh token stored".to_string()))?;

        log::debug!("Refreshing Gmail access token");
        let response = self.refresh_access_token(&refresh_token)?;
        *token = StoredToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: response.expires_in.map(|d| now + d as i64),
        };

        if let Err(e) = self.save_token(&token) {
            log::warn!("Failed to persist refreshed token: {:#}", e);
        }
        Ok(token.access_token.clone())
    }
}

/// Fixed bearer token, for tests and short-lived tooling
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

fn classify_token_error(status: u16, body: &str) -> anyhow::Error {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) if err.error == "invalid_grant" => AuthRejectedError(
            err.error_description
                .unwrap_or_else(|| "invalid_grant".to_string()),
        )
        .into(),
        Ok(err) => anyhow::anyhow!("Token endpoint returned {}: {}", status, err.error),
        Err(_) => anyhow::anyhow!("Token endpoint returned {}", status),
    }
}

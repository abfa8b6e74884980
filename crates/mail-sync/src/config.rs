//! Configuration loading for the sync service
//!
//! Three files live in the shared config directory:
//! - `google-credentials.json`: OAuth client (Google Cloud Console format)
//! - `sync.json`: engine tuning, every field optional
//! - `accounts.json`: connected accounts and their tokens
//!
//! OAuth credentials are resolved in order of priority:
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file (Google Cloud Console format)
//! 3. Runtime environment variables (fallback)

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checkpoint::DEFAULT_SCHEMA_VERSION;
use crate::gmail::StoredToken;
use crate::models::{AccountKey, AccountSetup, IncrementalStrategy, IngestionStrategy};
use crate::ratelimit::RateLimiter;
use crate::sync::DEFAULT_PAGE_SIZE;

/// Credentials filename in the config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Engine settings filename
pub const SYNC_CONFIG_FILE: &str = "sync.json";

/// Connected accounts filename
pub const ACCOUNTS_FILE: &str = "accounts.json";

/// Overrides `watch_topic` from `sync.json`
pub const WATCH_TOPIC_ENV: &str = "MAIL_SYNC_WATCH_TOPIC";

/// OAuth credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format (installed app)
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials
    /// 2. JSON file (`google-credentials.json` in the config directory)
    /// 3. Runtime environment variables
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Load credentials embedded at compile time via environment variables.
    /// Build with: GOOGLE_CLIENT_ID=xxx GOOGLE_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// Default credentials file path in the config directory
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

/// Engine settings (`sync.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Per-account token bucket size, in quota units
    pub rate_limit_capacity: u32,
    /// Quota units restored per second. Gmail grants 250; keep a reserve.
    pub rate_limit_refill_per_sec: f64,
    /// Default ingestion strategy for accounts without an override
    pub ingestion: IngestionStrategy,
    /// Default incremental strategy for accounts without an override
    pub incremental: IncrementalStrategy,
    /// Bumping this forces every account through a fresh full sync
    pub schema_version: u32,
    pub page_size: u32,
    /// Pub/Sub topic for push notifications; no watch is registered when unset
    pub watch_topic: Option<String>,
    pub watch_interval_secs: u64,
    /// Hard limit for one sync invocation
    pub sync_timeout_secs: u64,
    /// Interval of the daemon's fallback poll
    pub poll_interval_secs: u64,
    /// An account whose last sync is older than this is reported stale
    pub stale_after_secs: u64,
    /// Per-account command queue depth
    pub queue_depth: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rate_limit_capacity: 1000,
            rate_limit_refill_per_sec: 200.0,
            ingestion: IngestionStrategy::default(),
            incremental: IncrementalStrategy::default(),
            schema_version: DEFAULT_SCHEMA_VERSION,
            page_size: DEFAULT_PAGE_SIZE,
            watch_topic: None,
            watch_interval_secs: 24 * 60 * 60,
            sync_timeout_secs: 30 * 60,
            poll_interval_secs: 5 * 60,
            stale_after_secs: 60 * 60,
            queue_depth: 16,
        }
    }
}

impl SyncConfig {
    /// Load `sync.json` from the config directory, falling back to defaults
    pub fn load() -> Result<Self> {
        let config: Self = config::load_json_optional(SYNC_CONFIG_FILE)?.unwrap_or_default();
        config.with_env_overrides().validated()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = config::load_json_file(path)?;
        config.with_env_overrides().validated()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(topic) = std::env::var(WATCH_TOPIC_ENV)
            && !topic.trim().is_empty()
        {
            self.watch_topic = Some(topic.trim().to_string());
        }
        self
    }

    fn validated(self) -> Result<Self> {
        ensure!(self.rate_limit_capacity > 0, "rate_limit_capacity must be positive");
        ensure!(
            self.rate_limit_refill_per_sec > 0.0,
            "rate_limit_refill_per_sec must be positive"
        );
        ensure!(self.page_size > 0, "page_size must be positive");
        ensure!(self.queue_depth > 0, "queue_depth must be positive");
        Ok(self)
    }

    /// A fresh limiter for one account
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.rate_limit_capacity, self.rate_limit_refill_per_sec)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// One connected account in `accounts.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub user_id: String,
    pub workspace_id: String,
    pub address: String,
    pub token: StoredToken,
    /// Set when the account was signed out after an authorization failure
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion: Option<IngestionStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental: Option<IncrementalStrategy>,
}

impl AccountEntry {
    pub fn key(&self) -> AccountKey {
        AccountKey::new(&self.user_id, &self.workspace_id)
    }

    pub fn setup(&self) -> AccountSetup {
        AccountSetup {
            key: self.key(),
            address: self.address.clone(),
            ingestion: self.ingestion,
            incremental: self.incremental,
        }
    }

    /// File the refreshed token for this account is persisted to
    pub fn token_path(&self, dir: &Path) -> PathBuf {
        dir.join("tokens")
            .join(format!("{}-{}.json", self.workspace_id, self.user_id))
    }

    /// Latest token: the persisted refresh if one exists, else the configured one
    pub fn load_token(&self, dir: &Path) -> Result<StoredToken> {
        let path = self.token_path(dir);
        if path.exists() {
            return config::load_json_file(&path);
        }
        Ok(self.token.clone())
    }
}

/// Connected accounts (`accounts.json`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountsFile {
    #[serde(default)]
    pub accounts: Vec<AccountEntry>,
}

impl AccountsFile {
    /// Load from the config directory; a missing file means no accounts
    pub fn load() -> Result<Self> {
        Ok(config::load_json_optional(ACCOUNTS_FILE)?.unwrap_or_default())
    }

    pub fn save(&self) -> Result<()> {
        config::save_json(ACCOUNTS_FILE, self)
    }

    /// Accounts that have not been disabled
    pub fn active(&self) -> impl Iterator<Item = &AccountEntry> {
        self.accounts.iter().filter(|a| !a.disabled)
    }

    pub fn find_mut(&mut self, key: &AccountKey) -> Option<&mut AccountEntry> {
        self.accounts
            .iter_mut()
            .find(|a| a.user_id == key.user_id && a.workspace_id == key.workspace_id)
    }

    /// Mark an account disabled; returns whether it was found
    pub fn disable(&mut self, key: &AccountKey) -> bool {
        match self.find_mut(key) {
            Some(entry) => {
                entry.disabled = true;
                true
            }
            None => false,
        }
    }

    /// Drop an account; returns whether it was found
    pub fn remove(&mut self, key: &AccountKey) -> bool {
        let before = self.accounts.len();
        self.accounts
            .retain(|a| !(a.user_id == key.user_id && a.workspace_id == key.workspace_id));
        self.accounts.len() != before
    }
}

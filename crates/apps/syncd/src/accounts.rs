//! `accounts.json` as the account lifecycle owner

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use mail_sync::{AccountKey, AccountLifecycle, AccountsFile};
use tokio::sync::Mutex;

/// Persists sign-outs back to `accounts.json`
pub struct AccountsFileLifecycle {
    accounts: Mutex<AccountsFile>,
}

impl AccountsFileLifecycle {
    pub fn new(accounts: AccountsFile) -> Self {
        Self {
            accounts: Mutex::new(accounts),
        }
    }
}

#[async_trait]
impl AccountLifecycle for AccountsFileLifecycle {
    async fn disable(&self, key: &AccountKey) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        if !accounts.disable(key) {
            warn!("[{}] Not in accounts file, nothing to disable", key);
            return Ok(());
        }
        accounts.save()?;
        info!("[{}] Account disabled; reconnect it to resume syncing", key);
        Ok(())
    }

    async fn remove(&self, key: &AccountKey) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        if accounts.remove(key) {
            accounts.save()?;
            info!("[{}] Account removed from accounts file", key);
        }
        Ok(())
    }
}

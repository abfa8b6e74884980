//! Account lifecycle callbacks

use anyhow::Result;
use async_trait::async_trait;
use log::info;

use crate::models::AccountKey;

/// Owner of account records outside the sync engine
///
/// The supervisor calls back here when an account is signed out.
#[async_trait]
pub trait AccountLifecycle: Send + Sync {
    /// The credential was rejected; keep the account but stop using it
    async fn disable(&self, key: &AccountKey) -> Result<()>;

    /// The account was signed out on purpose
    async fn remove(&self, key: &AccountKey) -> Result<()>;
}

/// Lifecycle that only logs, for embedders that manage accounts themselves
pub struct LoggingLifecycle;

#[async_trait]
impl AccountLifecycle for LoggingLifecycle {
    async fn disable(&self, key: &AccountKey) -> Result<()> {
        info!("[{}] Account disabled", key);
        Ok(())
    }

    async fn remove(&self, key: &AccountKey) -> Result<()> {
        info!("[{}] Account removed", key);
        Ok(())
    }
}

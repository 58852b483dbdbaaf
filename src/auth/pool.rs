// Credential pool - round-robin selection with transparent token refresh

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::providers::TokenRefresher;
use super::{parse_accounts, Account, Credential};
use crate::config::BlobSource;

/// Pools older than this are rebuilt on the next acquisition.
pub const RELOAD_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Default)]
struct PoolState {
    accounts: Vec<Account>,
    cursor: usize,
    last_reload: Option<Instant>,
}

impl PoolState {
    fn is_stale(&self, interval: Duration) -> bool {
        match self.last_reload {
            None => true,
            Some(at) => self.accounts.is_empty() || at.elapsed() >= interval,
        }
    }

    fn next(&mut self) -> Option<Account> {
        if self.accounts.is_empty() {
            return None;
        }
        let idx = self.cursor % self.accounts.len();
        self.cursor = self.cursor.wrapping_add(1);
        Some(self.accounts[idx].clone())
    }
}

pub struct CredentialPool {
    source: Arc<dyn BlobSource>,
    refresher: Arc<dyn TokenRefresher>,
    reload_interval: Duration,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    pub fn new(source: Arc<dyn BlobSource>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            source,
            refresher,
            reload_interval: RELOAD_INTERVAL,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn with_reload_interval(mut self, interval: Duration) -> Self {
        self.reload_interval = interval;
        self
    }

    /// Rebuild the pool from the account source. Never fails: a bad source
    /// leaves an empty pool behind.
    pub fn reload(&self) {
        self.install(load_accounts(self.source.as_ref()));
    }

    /// [`reload`](Self::reload) with the source read on the blocking pool.
    pub async fn reload_async(&self) {
        let source = self.source.clone();
        let fetched = tokio::task::spawn_blocking(move || load_accounts(source.as_ref())).await;
        let accounts = match fetched {
            Ok(accounts) => accounts,
            Err(e) => {
                tracing::error!("Account reload task failed: {}", e);
                Vec::new()
            }
        };
        self.install(accounts);
    }

    fn install(&self, accounts: Vec<Account>) {
        tracing::info!("Credential pool reloaded with {} accounts", accounts.len());

        let mut state = self.state.lock();
        state.accounts = accounts;
        state.last_reload = Some(Instant::now());
    }

    pub fn len(&self) -> usize {
        self.state.lock().accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick the next account by rotation and hand back a usable token.
    ///
    /// Accounts whose token fails to refresh are skipped. At most one pass
    /// over the pool is made; `None` means no credential is available.
    pub async fn acquire(&self) -> Option<Credential> {
        let stale = self.state.lock().is_stale(self.reload_interval);
        if stale {
            self.reload_async().await;
        }

        let attempts = self.len();
        for _ in 0..attempts {
            let account = self.state.lock().next()?;

            let now = chrono::Utc::now().timestamp();
            if !account.token.needs_refresh(now) {
                let token = account.token.access_token.clone();
                return Some(Credential::from_account(&account, token));
            }

            tracing::info!("Token for {} is near expiry, refreshing", account.email);
            match self.refresh(&account).await {
                Some(token) => {
                    let refreshed = self.find(&account.id).unwrap_or(account);
                    return Some(Credential::from_account(&refreshed, token));
                }
                None => {
                    tracing::warn!(
                        "Skipping account {} after failed refresh, trying next",
                        account.email
                    );
                }
            }
        }

        tracing::error!("No credential available after {} attempts", attempts);
        None
    }

    /// Exchange the account's refresh token and store the result in the pool.
    pub async fn refresh(&self, account: &Account) -> Option<String> {
        let response = match self.refresher.refresh(&account.token.refresh_token).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Token refresh for {} failed: {}", account.email, e);
                return None;
            }
        };

        let now = chrono::Utc::now().timestamp();
        let mut state = self.state.lock();
        if let Some(pooled) = state.accounts.iter_mut().find(|a| a.id == account.id) {
            pooled.token.access_token = response.access_token.clone();
            pooled.token.expires_in = response.expires_in;
            pooled.token.expiry_timestamp = now.saturating_add(response.expires_in);
            if let Some(new_refresh) = response.refresh_token.filter(|r| !r.is_empty()) {
                pooled.token.refresh_token = new_refresh;
            }
        }

        tracing::info!("Refreshed token for {}", account.email);
        Some(response.access_token)
    }

    fn find(&self, id: &str) -> Option<Account> {
        self.state.lock().accounts.iter().find(|a| a.id == id).cloned()
    }
}

fn load_accounts(source: &dyn BlobSource) -> Vec<Account> {
    match source.fetch() {
        Ok(Some(raw)) => match parse_accounts(&raw) {
            Ok(accounts) => accounts,
            Err(e) => {
                tracing::error!("Failed to parse account list: {}", e);
                Vec::new()
            }
        },
        Ok(None) => Vec::new(),
        Err(e) => {
            tracing::error!("Failed to load account list: {}", e);
            Vec::new()
        }
    }
}

// Upstream accounts and the credential pool built from them

use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};

pub mod pool;
pub mod providers;

pub use pool::CredentialPool;

/// Seconds before expiry at which a token is treated as stale.
pub const REFRESH_SKEW_SECS: i64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub expiry_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl TokenInfo {
    pub fn needs_refresh(&self, now: i64) -> bool {
        now >= self.expiry_timestamp.saturating_sub(REFRESH_SKEW_SECS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Default)]
pub enum SubscriptionTier {
    Ultra,
    Pro,
    Free,
    #[default]
    Unspecified,
}

impl SubscriptionTier {
    /// Lower sorts first.
    pub fn priority(self) -> u8 {
        match self {
            Self::Ultra => 0,
            Self::Pro => 1,
            Self::Free => 2,
            Self::Unspecified => 3,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ULTRA" => Self::Ultra,
            "PRO" => Self::Pro,
            "FREE" => Self::Free,
            _ => Self::Unspecified,
        }
    }
}

fn deserialize_tier<'de, D>(deserializer: D) -> std::result::Result<SubscriptionTier, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .map(SubscriptionTier::parse)
        .unwrap_or_default())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub email: String,
    pub token: TokenInfo,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub proxy_disabled: bool,
    #[serde(default, deserialize_with = "deserialize_tier")]
    pub subscription_tier: SubscriptionTier,
}

impl Account {
    pub fn is_enabled(&self) -> bool {
        !self.disabled && !self.proxy_disabled
    }
}

/// What a request handler gets back from the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub account_id: String,
    pub email: String,
    pub access_token: String,
    pub project_id: Option<String>,
}

impl Credential {
    fn from_account(account: &Account, access_token: String) -> Self {
        Self {
            account_id: account.id.clone(),
            email: account.email.clone(),
            access_token,
            project_id: account
                .token
                .project_id
                .clone()
                .filter(|p| !p.trim().is_empty()),
        }
    }
}

/// Parse the account list, drop disabled entries and order by tier.
///
/// The sort is stable, so accounts within a tier keep their input order.
pub fn parse_accounts(raw: &str) -> Result<Vec<Account>> {
    let accounts: Vec<Account> = serde_json::from_str(raw)?;
    let total = accounts.len();

    let mut enabled: Vec<Account> = accounts.into_iter().filter(Account::is_enabled).collect();
    enabled.sort_by_key(|a| a.subscription_tier.priority());

    tracing::debug!("Parsed {} accounts ({} enabled)", total, enabled.len());
    Ok(enabled)
}

//! Access-token lifetime management.
//!
//! Tokens are long-lived (about 60 days) and can be exchanged for a fresh one
//! while still valid. [`ensure_fresh_token`] decides whether an exchange is
//! due under the configured [`RefreshPolicy`] and performs it.
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::budget::RequestBudget;
use crate::db::{self, Pool};
use crate::error::SyncError;
use crate::graph::GraphService;
use crate::model::{Account, RefreshOutcome};

/// Lifetime assumed for a grant whose response omits `expires_in`.
pub const DEFAULT_GRANT_LIFETIME_SECS: i64 = 60 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshPolicy {
    /// Refresh when less than `fraction` of the total lifetime remains. The
    /// total is `expires_at - issued_at`, or `nominal_lifetime` when the
    /// issuance time is unknown.
    LifetimeFraction {
        fraction: f64,
        nominal_lifetime: Duration,
    },
    /// Refresh when less than `threshold` remains.
    Absolute { threshold: Duration },
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        RefreshPolicy::LifetimeFraction {
            fraction: 0.10,
            nominal_lifetime: Duration::days(60),
        }
    }
}

impl RefreshPolicy {
    /// Remaining lifetime below which `account`'s token is due.
    pub fn threshold(&self, account: &Account) -> Duration {
        match self {
            RefreshPolicy::LifetimeFraction {
                fraction,
                nominal_lifetime,
            } => {
                let total = account
                    .token_issued_at
                    .map(|issued| account.token_expires_at - issued)
                    .filter(|lifetime| *lifetime > Duration::zero())
                    .unwrap_or(*nominal_lifetime);
                Duration::milliseconds((total.num_milliseconds() as f64 * fraction) as i64)
            }
            RefreshPolicy::Absolute { threshold } => *threshold,
        }
    }

    pub fn needs_refresh(&self, account: &Account, now: DateTime<Utc>) -> bool {
        account.token_expires_at - now < self.threshold(account)
    }
}

/// Exchange `account`'s token if the policy says it is due.
///
/// On success the store and `account` both carry the new token. Failures
/// leave the stored token untouched and come back as
/// [`RefreshOutcome::Failed`]; nothing here aborts the caller.
#[instrument(skip_all, fields(account = %account.ig_user_id))]
pub async fn ensure_fresh_token(
    pool: &Pool,
    api: &dyn GraphService,
    budget: &RequestBudget,
    policy: &RefreshPolicy,
    account: &mut Account,
    now: DateTime<Utc>,
) -> RefreshOutcome {
    if !policy.needs_refresh(account, now) {
        debug!(expires_at = %account.token_expires_at, "token still fresh");
        return RefreshOutcome::Skipped;
    }
    if !budget.try_consume(1) {
        info!("token refresh due but request budget is exhausted");
        return RefreshOutcome::BudgetExhausted;
    }

    info!(expires_at = %account.token_expires_at, "refreshing access token");
    let grant = match api.exchange_token(&account.access_token).await {
        Ok(grant) => grant,
        Err(error) => {
            warn!(%error, "token refresh failed");
            return RefreshOutcome::Failed { error };
        }
    };

    let lifetime = grant.expires_in.unwrap_or(DEFAULT_GRANT_LIFETIME_SECS);
    let Some(expires_at) = grant_expiry(now, lifetime) else {
        warn!(expires_in = lifetime, "token grant carries an unusable lifetime");
        return RefreshOutcome::Failed {
            error: SyncError::RemoteCall(format!("invalid expires_in in token grant: {lifetime}")),
        };
    };
    if let Err(err) = db::update_account_token(
        pool,
        &account.ig_user_id,
        &grant.access_token,
        expires_at,
        now,
    )
    .await
    {
        warn!(?err, "failed to store refreshed token");
        return RefreshOutcome::Failed { error: err.into() };
    }

    account.access_token = grant.access_token;
    account.token_expires_at = expires_at;
    account.token_issued_at = Some(now);
    info!(%expires_at, "access token refreshed");
    RefreshOutcome::Refreshed { expires_at }
}

/// Expiry for a grant lasting `lifetime_secs`; `None` unless the lifetime is
/// positive and lands inside chrono's range.
fn grant_expiry(now: DateTime<Utc>, lifetime_secs: i64) -> Option<DateTime<Utc>> {
    if lifetime_secs <= 0 {
        return None;
    }
    Duration::try_seconds(lifetime_secs).and_then(|lifetime| now.checked_add_signed(lifetime))
}

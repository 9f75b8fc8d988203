use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::SyncError;

/// A connected remote account as stored in `instagram_accounts`.
#[derive(Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Account {
    pub ig_user_id: String,
    pub account_name: String,
    pub access_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub token_issued_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub priority: i64,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("ig_user_id", &self.ig_user_id)
            .field("account_name", &self.account_name)
            .field("access_token", &"[REDACTED]")
            .field("token_expires_at", &self.token_expires_at)
            .field("token_issued_at", &self.token_issued_at)
            .field("last_synced_at", &self.last_synced_at)
            .field("priority", &self.priority)
            .finish()
    }
}

/// An `instagram_accounts` row that could not be decoded into an [`Account`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableAccount {
    pub ig_user_id: String,
    pub account_name: String,
    pub error: SyncError,
}

/// A stored post row from `instagram_posts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub media_id: String,
    pub ig_user_id: String,
    pub caption: Option<String>,
    pub media_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

/// One post as returned by the remote media listing, already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePost {
    pub media_id: String,
    pub caption: Option<String>,
    pub media_url: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// One page of the media listing, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaPage {
    pub posts: Vec<RemotePost>,
    /// Absolute URL of the next page, if the remote returned one.
    pub next: Option<String>,
}

/// Result of a token exchange with the issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// Token still has enough lifetime left; nothing was called.
    Skipped,
    Refreshed { expires_at: DateTime<Utc> },
    BudgetExhausted,
    Failed { error: SyncError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No further page cursor, or an empty page.
    EndOfFeed,
    /// Hit a post at or before the prior watermark.
    ReachedWatermark,
    BudgetExhausted,
    /// The optional `max_pages` guard was reached.
    PageCap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub posts_seen: u64,
    pub posts_inserted: u64,
    pub pages_fetched: u32,
    /// Publish time of the first (newest) post seen in this call.
    pub new_watermark: Option<DateTime<Utc>>,
    pub stop: StopReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed(FetchReport),
    /// Budget was already empty on entry; nothing was called.
    BudgetExhausted,
    Failed {
        error: SyncError,
        posts_inserted: u64,
        pages_fetched: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    BudgetExhausted,
    BudgetExhaustedAfterTokenCheck,
    TokenRefreshFailed {
        error: SyncError,
    },
    FetchFailed {
        error: SyncError,
        posts_inserted: u64,
    },
    WatermarkCommitFailed {
        error: SyncError,
        posts_inserted: u64,
    },
    Panicked {
        message: String,
    },
    /// The stored row could not be read; nothing was called for it.
    InvalidAccount {
        error: SyncError,
    },
}

impl SkipReason {
    pub fn error(&self) -> Option<&SyncError> {
        match self {
            SkipReason::TokenRefreshFailed { error }
            | SkipReason::FetchFailed { error, .. }
            | SkipReason::WatermarkCommitFailed { error, .. }
            | SkipReason::InvalidAccount { error } => Some(error),
            _ => None,
        }
    }

    pub fn is_budget(&self) -> bool {
        matches!(
            self,
            SkipReason::BudgetExhausted | SkipReason::BudgetExhaustedAfterTokenCheck
        )
    }

    /// Posts that were committed before the account was given up on.
    pub fn posts_inserted(&self) -> u64 {
        match self {
            SkipReason::FetchFailed { posts_inserted, .. }
            | SkipReason::WatermarkCommitFailed { posts_inserted, .. } => *posts_inserted,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccountStatus {
    Synced {
        posts_inserted: u64,
        pages_fetched: u32,
        stop: StopReason,
        watermark: Option<DateTime<Utc>>,
        watermark_advanced: bool,
    },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountReport {
    pub ig_user_id: String,
    pub account_name: String,
    /// `None` when the account was skipped before the token check.
    pub token: Option<RefreshOutcome>,
    #[serde(flatten)]
    pub status: AccountStatus,
}

impl AccountReport {
    pub fn is_synced(&self) -> bool {
        matches!(self.status, AccountStatus::Synced { .. })
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match &self.status {
            AccountStatus::Skipped { reason } => Some(reason),
            AccountStatus::Synced { .. } => None,
        }
    }

    pub fn posts_inserted(&self) -> u64 {
        match &self.status {
            AccountStatus::Synced { posts_inserted, .. } => *posts_inserted,
            AccountStatus::Skipped { reason } => reason.posts_inserted(),
        }
    }
}

/// Machine-readable result of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts_total: usize,
    pub accounts_processed: usize,
    pub accounts_skipped: usize,
    pub requests_made: u32,
    pub request_ceiling: u32,
    pub posts_inserted: u64,
    pub budget_exhausted: bool,
    pub rate_limited: bool,
    /// Set when any account hit a store error.
    pub degraded: bool,
    pub store_errors: usize,
    pub accounts: Vec<AccountReport>,
}

impl RunSummary {
    pub fn skipped(&self) -> impl Iterator<Item = (&AccountReport, &SkipReason)> {
        self.accounts
            .iter()
            .filter_map(|report| report.skip_reason().map(|reason| (report, reason)))
    }

    pub fn report(&self, ig_user_id: &str) -> Option<&AccountReport> {
        self.accounts.iter().find(|r| r.ig_user_id == ig_user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MediaRefresh {
    Updated { media_url: String },
    UnknownPost,
    NoMediaUrl,
    BudgetExhausted,
}

//! Error taxonomy for the sync core.
//!
//! Exhausting the request budget is not an error; it is reported through the
//! outcome enums in [`crate::model`].
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SyncError {
    /// Token invalid, expired or refused by the issuer (HTTP 400/401).
    #[error("credential rejected: {0}")]
    Credential(String),
    /// HTTP 429. Ends the account for this run but never the run itself.
    #[error("rate limited by remote: {0}")]
    RateLimited(String),
    /// Transport failure, timeout, undecodable body or any other non-2xx.
    #[error("remote call failed: {0}")]
    RemoteCall(String),
    #[error("store error: {0}")]
    Store(String),
}

impl SyncError {
    pub fn is_store(&self) -> bool {
        matches!(self, SyncError::Store(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SyncError::RateLimited(_))
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest includes the full URL in its Display output, which carries
        // the access token as a query parameter.
        SyncError::RemoteCall(err.without_url().to_string())
    }
}

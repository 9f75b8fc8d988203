//! Write-side row shapes used by the repository.
//!
//! Read-side entities live in `crate::model`; these borrow their fields so
//! callers can insert without cloning remote payloads.

use chrono::{DateTime, Utc};

use crate::model::RemotePost;

#[derive(Debug, Clone)]
pub struct NewAccount<'a> {
    pub ig_user_id: &'a str,
    pub account_name: &'a str,
    pub access_token: &'a str,
    pub token_expires_at: DateTime<Utc>,
    pub token_issued_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub priority: i64,
}

#[derive(Debug, Clone)]
pub struct NewPost<'a> {
    pub media_id: &'a str,
    pub ig_user_id: &'a str,
    pub caption: Option<&'a str>,
    pub media_url: Option<&'a str>,
    pub published_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

impl<'a> NewPost<'a> {
    pub fn from_remote(ig_user_id: &'a str, post: &'a RemotePost, ingested_at: DateTime<Utc>) -> Self {
        Self {
            media_id: &post.media_id,
            ig_user_id,
            caption: post.caption.as_deref(),
            media_url: post.media_url.as_deref(),
            published_at: post.published_at,
            ingested_at,
        }
    }
}

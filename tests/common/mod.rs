#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use ig_ingest::db::{self, NewAccount, Pool};
use ig_ingest::error::{Result, SyncError};
use ig_ingest::graph::{GraphService, PageCursor};
use ig_ingest::model::{MediaPage, RemotePost, TokenGrant};

pub async fn setup_pool() -> Pool {
    let pool = db::memory_pool().await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

/// Fixed point in time used to build ordered timestamps.
pub fn ts(hour: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::hours(hour)
}

pub fn post(id: &str, at: DateTime<Utc>) -> RemotePost {
    RemotePost {
        media_id: id.to_string(),
        caption: Some(format!("caption {id}")),
        media_url: Some(format!("https://cdn.example/{id}.jpg")),
        published_at: at,
    }
}

pub fn page(posts: Vec<RemotePost>, next: Option<&str>) -> MediaPage {
    MediaPage {
        posts,
        next: next.map(str::to_string),
    }
}

/// Insert an account whose token is comfortably inside its lifetime.
pub async fn seed_account(
    pool: &Pool,
    ig_user_id: &str,
    priority: i64,
    last_synced_at: Option<DateTime<Utc>>,
) {
    let now = Utc::now();
    seed_account_with_token(
        pool,
        ig_user_id,
        priority,
        last_synced_at,
        Some(now - Duration::days(10)),
        now + Duration::days(50),
    )
    .await;
}

pub async fn seed_account_with_token(
    pool: &Pool,
    ig_user_id: &str,
    priority: i64,
    last_synced_at: Option<DateTime<Utc>>,
    token_issued_at: Option<DateTime<Utc>>,
    token_expires_at: DateTime<Utc>,
) {
    let token = format!("token-{ig_user_id}");
    let name = format!("Account {ig_user_id}");
    db::insert_account(
        pool,
        &NewAccount {
            ig_user_id,
            account_name: &name,
            access_token: &token,
            token_expires_at,
            token_issued_at,
            last_synced_at,
            priority,
        },
    )
    .await
    .unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Page { token: String, cursor: PageCursor },
    Exchange { token: String },
    MediaUrl { token: String, media_id: String },
}

/// `GraphService` that replays scripted responses and records every call.
///
/// Pages are keyed by account id for the first page and by the `next` URL
/// for later ones. A key with nothing scripted yields an empty page.
#[derive(Clone, Default)]
pub struct ScriptedGraph {
    pages: Arc<Mutex<HashMap<String, VecDeque<Result<MediaPage>>>>>,
    grants: Arc<Mutex<VecDeque<Result<TokenGrant>>>>,
    media_urls: Arc<Mutex<HashMap<String, Result<Option<String>>>>>,
    panic_on: Arc<Mutex<Option<String>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script_page(&self, key: &str, response: Result<MediaPage>) {
        self.pages
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .push_back(response);
    }

    pub async fn script_grant(&self, response: Result<TokenGrant>) {
        self.grants.lock().await.push_back(response);
    }

    pub async fn script_media_url(&self, media_id: &str, response: Result<Option<String>>) {
        self.media_urls
            .lock()
            .await
            .insert(media_id.to_string(), response);
    }

    pub async fn panic_on(&self, key: &str) {
        *self.panic_on.lock().await = Some(key.to_string());
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn page_calls(&self) -> Vec<PageCursor> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                Call::Page { cursor, .. } => Some(cursor),
                _ => None,
            })
            .collect()
    }

    pub async fn started_accounts(&self) -> Vec<String> {
        self.page_calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                PageCursor::Start { ig_user_id, .. } => Some(ig_user_id),
                PageCursor::Next(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl GraphService for ScriptedGraph {
    async fn fetch_media_page(&self, access_token: &str, cursor: &PageCursor) -> Result<MediaPage> {
        self.calls.lock().await.push(Call::Page {
            token: access_token.to_string(),
            cursor: cursor.clone(),
        });
        let key = match cursor {
            PageCursor::Start { ig_user_id, .. } => ig_user_id.clone(),
            PageCursor::Next(url) => url.clone(),
        };
        let should_panic = self.panic_on.lock().await.as_deref() == Some(key.as_str());
        if should_panic {
            panic!("scripted panic for {key}");
        }
        self.pages
            .lock()
            .await
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(MediaPage::default()))
    }

    async fn exchange_token(&self, access_token: &str) -> Result<TokenGrant> {
        self.calls.lock().await.push(Call::Exchange {
            token: access_token.to_string(),
        });
        self.grants
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Credential("no grant scripted".into())))
    }

    async fn fetch_media_url(&self, access_token: &str, media_id: &str) -> Result<Option<String>> {
        self.calls.lock().await.push(Call::MediaUrl {
            token: access_token.to_string(),
            media_id: media_id.to_string(),
        });
        self.media_urls
            .lock()
            .await
            .remove(media_id)
            .unwrap_or(Ok(None))
    }
}

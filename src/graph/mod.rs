use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::graph::model::{AccessTokenResponse, ErrorEnvelope, MediaListResponse, MediaUrlResponse};
use crate::model::{MediaPage, TokenGrant};

pub mod model;

const DEFAULT_API_BASE: &str = "https://graph.instagram.com/v24.0/";
const DEFAULT_OAUTH_BASE: &str = "https://graph.facebook.com/";
const MEDIA_FIELDS: &str = "id,caption,media_type,media_url,permalink,timestamp";

/// Graph error codes that signal throttling even when the HTTP status is 400.
const THROTTLE_CODES: [i64; 4] = [4, 17, 32, 613];

/// Where to read the next page of an account's media listing from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    Start { ig_user_id: String, page_size: u32 },
    /// Absolute `paging.next` URL from the previous page.
    Next(String),
}

/// Remote calls made by the sync core. One call is one budget unit; callers
/// charge the budget before invoking any of these.
#[async_trait]
pub trait GraphService: Send + Sync {
    async fn fetch_media_page(&self, access_token: &str, cursor: &PageCursor) -> Result<MediaPage>;

    async fn exchange_token(&self, access_token: &str) -> Result<TokenGrant>;

    /// Current media URL (or permalink) of one post.
    async fn fetch_media_url(&self, access_token: &str, media_id: &str) -> Result<Option<String>>;
}

#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    api_base: Url,
    oauth_base: Url,
    app_id: String,
    app_secret: String,
}

impl fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphClient")
            .field("api_base", &self.api_base)
            .field("oauth_base", &self.oauth_base)
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

impl GraphClient {
    pub fn new(app_id: String, app_secret: String) -> anyhow::Result<Self> {
        Self::with_base_urls(
            app_id,
            app_secret,
            Url::parse(DEFAULT_API_BASE)?,
            Url::parse(DEFAULT_OAUTH_BASE)?,
            Duration::from_secs(30),
        )
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Self::with_base_urls(
            cfg.graph.app_id.clone(),
            cfg.graph.app_secret.clone(),
            Url::parse(&with_trailing_slash(&cfg.graph.api_base))?,
            Url::parse(&with_trailing_slash(&cfg.graph.oauth_base))?,
            Duration::from_secs(cfg.graph.timeout_seconds),
        )
    }

    pub fn with_base_urls(
        app_id: String,
        app_secret: String,
        api_base: Url,
        oauth_base: Url,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("ig-ingest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_base,
            oauth_base,
            app_id,
            app_secret,
        })
    }

    pub fn build_media_request(
        &self,
        access_token: &str,
        cursor: &PageCursor,
    ) -> Result<reqwest::Request> {
        let url = match cursor {
            PageCursor::Start {
                ig_user_id,
                page_size,
            } => {
                let mut url = self.endpoint(&format!("{ig_user_id}/media"))?;
                url.query_pairs_mut()
                    .append_pair("fields", MEDIA_FIELDS)
                    .append_pair("limit", &page_size.to_string())
                    .append_pair("access_token", access_token);
                url
            }
            PageCursor::Next(next) => {
                let mut url = Url::parse(next)
                    .map_err(|e| SyncError::RemoteCall(format!("invalid paging.next URL: {e}")))?;
                // paging.next normally embeds the token already.
                if !url.query_pairs().any(|(k, _)| k == "access_token") {
                    url.query_pairs_mut()
                        .append_pair("access_token", access_token);
                }
                url
            }
        };
        Ok(self.http.get(url).build()?)
    }

    pub fn build_exchange_request(&self, access_token: &str) -> Result<reqwest::Request> {
        let mut url = self
            .oauth_base
            .join("oauth/access_token")
            .map_err(|e| SyncError::RemoteCall(format!("invalid oauth base URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("grant_type", "fb_exchange_token")
            .append_pair("client_id", &self.app_id)
            .append_pair("client_secret", &self.app_secret)
            .append_pair("fb_exchange_token", access_token);
        Ok(self.http.get(url).build()?)
    }

    pub fn build_media_url_request(
        &self,
        access_token: &str,
        media_id: &str,
    ) -> Result<reqwest::Request> {
        let mut url = self.endpoint(media_id)?;
        url.query_pairs_mut()
            .append_pair("fields", "media_url,permalink")
            .append_pair("access_token", access_token);
        Ok(self.http.get(url).build()?)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_base
            .join(path)
            .map_err(|e| SyncError::RemoteCall(format!("invalid API base URL: {e}")))
    }

    async fn execute<T: DeserializeOwned>(&self, request: reqwest::Request) -> Result<T> {
        // Only the path is logged; the query carries credentials.
        debug!(path = %request.url().path(), "graph request");
        let res = self.http.execute(request).await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            let err = classify_failure(status, &body);
            warn!(%status, %err, "graph request failed");
            return Err(err);
        }
        serde_json::from_str(&body)
            .map_err(|e| SyncError::RemoteCall(format!("invalid graph response JSON: {e}")))
    }
}

#[async_trait]
impl GraphService for GraphClient {
    async fn fetch_media_page(&self, access_token: &str, cursor: &PageCursor) -> Result<MediaPage> {
        let request = self.build_media_request(access_token, cursor)?;
        let resp: MediaListResponse = self.execute(request).await?;
        Ok(resp.into())
    }

    async fn exchange_token(&self, access_token: &str) -> Result<TokenGrant> {
        let request = self.build_exchange_request(access_token)?;
        let resp: AccessTokenResponse = self.execute(request).await?;
        Ok(resp.into())
    }

    async fn fetch_media_url(&self, access_token: &str, media_id: &str) -> Result<Option<String>> {
        let request = self.build_media_url_request(access_token, media_id)?;
        let resp: MediaUrlResponse = self.execute(request).await?;
        Ok(resp.into_url())
    }
}

/// Map a non-2xx response onto the error taxonomy.
pub fn classify_failure(status: StatusCode, body: &str) -> SyncError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = envelope
        .as_ref()
        .map(|e| e.error.message.clone())
        .unwrap_or_else(|| format!("{status}: {}", truncate(body, 200)));
    let code = envelope.as_ref().and_then(|e| e.error.code);

    if status == StatusCode::TOO_MANY_REQUESTS || code.is_some_and(|c| THROTTLE_CODES.contains(&c)) {
        return SyncError::RateLimited(message);
    }
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => SyncError::Credential(message),
        _ => SyncError::RemoteCall(message),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn with_trailing_slash(base: &str) -> String {
    if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    }
}

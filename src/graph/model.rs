use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Deserializer};

use crate::model::{MediaPage, RemotePost, TokenGrant};

#[derive(Deserialize, Debug)]
pub struct MediaListResponse {
    #[serde(default)]
    pub data: Vec<MediaItem>,
    pub paging: Option<Paging>,
}

#[derive(Deserialize, Debug)]
pub struct MediaItem {
    pub id: String,
    pub caption: Option<String>,
    pub media_type: Option<String>,
    pub media_url: Option<String>,
    pub permalink: Option<String>,
    #[serde(deserialize_with = "deserialize_graph_timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize, Debug)]
pub struct Paging {
    pub next: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub expires_in: Option<i64>,
}

#[derive(Deserialize, Debug)]
pub struct MediaUrlResponse {
    pub media_url: Option<String>,
    pub permalink: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ErrorEnvelope {
    pub error: GraphErrorBody,
}

#[derive(Deserialize, Debug)]
pub struct GraphErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub typ: Option<String>,
    pub code: Option<i64>,
}

impl From<MediaItem> for RemotePost {
    fn from(item: MediaItem) -> Self {
        RemotePost {
            media_id: item.id,
            caption: item.caption,
            // Carousel and video items may omit media_url.
            media_url: item.media_url.or(item.permalink),
            published_at: item.timestamp,
        }
    }
}

impl From<MediaListResponse> for MediaPage {
    fn from(resp: MediaListResponse) -> Self {
        MediaPage {
            posts: resp.data.into_iter().map(RemotePost::from).collect(),
            next: resp.paging.and_then(|p| p.next).filter(|n| !n.is_empty()),
        }
    }
}

impl From<AccessTokenResponse> for TokenGrant {
    fn from(resp: AccessTokenResponse) -> Self {
        TokenGrant {
            access_token: resp.access_token,
            expires_in: resp.expires_in,
        }
    }
}

impl MediaUrlResponse {
    pub fn into_url(self) -> Option<String> {
        self.media_url.or(self.permalink).filter(|u| !u.is_empty())
    }
}

/// Parse a Graph timestamp. The API emits `2024-05-01T12:00:00+0000`, which
/// is not RFC 3339, so both forms are accepted.
pub fn parse_graph_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::<FixedOffset>::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn deserialize_graph_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_graph_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

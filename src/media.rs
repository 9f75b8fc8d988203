//! Re-fetch the media URL of a stored post.
//!
//! CDN URLs handed out by the media listing expire; this swaps a stale URL for
//! a current one without touching anything else on the row.
use tracing::{info, instrument, warn};

use crate::budget::RequestBudget;
use crate::db::{self, Pool};
use crate::error::Result;
use crate::graph::GraphService;
use crate::model::MediaRefresh;

#[instrument(skip_all, fields(media_id = %media_id))]
pub async fn refresh_media_url(
    pool: &Pool,
    api: &dyn GraphService,
    budget: &RequestBudget,
    media_id: &str,
) -> Result<MediaRefresh> {
    let Some(access_token) = db::token_for_media(pool, media_id).await? else {
        warn!("no stored post or owning account for media id");
        return Ok(MediaRefresh::UnknownPost);
    };
    if !budget.try_consume(1) {
        info!("request budget exhausted; media URL not refreshed");
        return Ok(MediaRefresh::BudgetExhausted);
    }

    let Some(media_url) = api.fetch_media_url(&access_token, media_id).await? else {
        warn!("remote returned neither media_url nor permalink");
        return Ok(MediaRefresh::NoMediaUrl);
    };
    db::update_post_media_url(pool, media_id, &media_url).await?;
    info!("media URL refreshed");
    Ok(MediaRefresh::Updated { media_url })
}

/// Refresh each id in turn. A failure on one id is returned in its slot and
/// does not stop the ids after it.
pub async fn refresh_media_urls<'a>(
    pool: &Pool,
    api: &dyn GraphService,
    budget: &RequestBudget,
    media_ids: &'a [String],
) -> Vec<(&'a str, Result<MediaRefresh>)> {
    let mut results = Vec::with_capacity(media_ids.len());
    for media_id in media_ids {
        let outcome = refresh_media_url(pool, api, budget, media_id).await;
        if let Err(error) = &outcome {
            warn!(%media_id, %error, "media URL refresh failed");
        }
        results.push((media_id.as_str(), outcome));
    }
    results
}

//! Incremental, newest-first post ingestion for one account.
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::budget::RequestBudget;
use crate::db::{self, NewPost, Pool};
use crate::graph::{GraphService, PageCursor};
use crate::model::{Account, FetchOutcome, FetchReport, StopReason};

pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub page_size: u32,
    /// Stop after this many pages even if more are available.
    pub max_pages: Option<u32>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: None,
        }
    }
}

/// Pull `account`'s posts newer than its watermark and store the unseen ones.
///
/// Each page costs one budget unit, charged before the call. The returned
/// `new_watermark` is the publish time of the first post seen; committing it
/// is the caller's job. On a remote or store error the rows inserted so far
/// stay, and the outcome is `Failed` so the caller leaves the watermark alone.
#[instrument(skip_all, fields(account = %account.ig_user_id))]
pub async fn sync_account(
    pool: &Pool,
    api: &dyn GraphService,
    budget: &RequestBudget,
    account: &Account,
    options: FetchOptions,
) -> FetchOutcome {
    if budget.is_exhausted() {
        return FetchOutcome::BudgetExhausted;
    }

    let prior = account.last_synced_at;
    let mut cursor = Some(PageCursor::Start {
        ig_user_id: account.ig_user_id.clone(),
        page_size: options.page_size,
    });
    let mut candidate: Option<DateTime<Utc>> = None;
    let mut posts_seen = 0u64;
    let mut posts_inserted = 0u64;
    let mut pages_fetched = 0u32;

    let stop = 'pages: loop {
        let Some(current) = cursor.take() else {
            break StopReason::EndOfFeed;
        };
        if options.max_pages.is_some_and(|cap| pages_fetched >= cap) {
            break StopReason::PageCap;
        }
        if !budget.try_consume(1) {
            break StopReason::BudgetExhausted;
        }
        pages_fetched += 1;

        let page = match api.fetch_media_page(&account.access_token, &current).await {
            Ok(page) => page,
            Err(error) => {
                warn!(%error, pages = pages_fetched, inserted = posts_inserted, "media fetch failed");
                return FetchOutcome::Failed {
                    error,
                    posts_inserted,
                    pages_fetched,
                };
            }
        };
        debug!(pages = pages_fetched, posts = page.posts.len(), "fetched media page");
        if page.posts.is_empty() {
            break StopReason::EndOfFeed;
        }

        for post in &page.posts {
            posts_seen += 1;
            candidate.get_or_insert(post.published_at);

            if prior.is_some_and(|watermark| post.published_at <= watermark) {
                debug!(media_id = %post.media_id, "reached previously synced posts");
                break 'pages StopReason::ReachedWatermark;
            }

            let row = NewPost::from_remote(&account.ig_user_id, post, Utc::now());
            match db::insert_post_if_absent(pool, &row).await {
                Ok(true) => posts_inserted += 1,
                Ok(false) => debug!(media_id = %post.media_id, "post already stored"),
                Err(err) => {
                    warn!(?err, media_id = %post.media_id, "failed to store post");
                    return FetchOutcome::Failed {
                        error: err.into(),
                        posts_inserted,
                        pages_fetched,
                    };
                }
            }
        }

        cursor = page.next.map(PageCursor::Next);
    };

    info!(
        pages = pages_fetched,
        seen = posts_seen,
        inserted = posts_inserted,
        ?stop,
        "account sync finished"
    );
    FetchOutcome::Completed(FetchReport {
        posts_seen,
        posts_inserted,
        pages_fetched,
        new_watermark: candidate,
        stop,
    })
}

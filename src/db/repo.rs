use super::model::{NewAccount, NewPost};
use crate::model::{Account, Post, UnreadableAccount};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{FromRow, Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

const ACCOUNT_COLUMNS: &str = "ig_user_id, account_name, access_token, token_expires_at, token_issued_at, last_synced_at, priority";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Single-connection in-memory pool. Every SQLite memory connection is its own
/// database, so the pool must never open a second one.
pub async fn memory_pool() -> Result<Pool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

/// Normalize a file-backed SQLite URL: expand a leading `~/`, create the
/// parent directory and ask SQLite to create the file (`mode=rwc`) unless
/// the URL already names a mode. In-memory and non-SQLite URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = expand_home(path, std::env::var("HOME").ok().as_deref());
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            // A failure here surfaces as a connect error right after.
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(query) if query.contains("mode=") => format!("sqlite://{path}?{query}"),
        Some(query) => format!("sqlite://{path}?{query}&mode=rwc"),
        None => format!("sqlite://{path}?mode=rwc"),
    }
}

/// Replace a leading `~/` with `home`. Paths without it, or with no known
/// home directory, are returned unchanged.
fn expand_home(path: &str, home: Option<&str>) -> String {
    match (path.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => format!("{}/{rest}", home.trim_end_matches('/')),
        _ => path.to_string(),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Insert an account row. Provisioning accounts belongs to the seeding side;
/// the sync core only reads and rotates them.
#[instrument(skip_all, fields(account = %account.ig_user_id))]
pub async fn insert_account(pool: &Pool, account: &NewAccount<'_>) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO instagram_accounts (ig_user_id, account_name, access_token, token_expires_at, token_issued_at, last_synced_at, priority) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(account.ig_user_id)
    .bind(account.account_name)
    .bind(account.access_token)
    .bind(account.token_expires_at)
    .bind(account.token_issued_at)
    .bind(account.last_synced_at)
    .bind(account.priority)
    .execute(pool)
    .await?;
    Ok(())
}

/// All accounts in service order: most urgent priority first, then the
/// stalest watermark, with never-synced accounts ahead of everything else.
///
/// Rows are decoded one at a time, so a malformed row comes back as an
/// [`UnreadableAccount`] in its slot instead of failing the whole listing.
#[instrument(skip_all)]
pub async fn list_accounts_for_sync(
    pool: &Pool,
) -> sqlx::Result<Vec<std::result::Result<Account, UnreadableAccount>>> {
    let sql = format!(
        "SELECT {ACCOUNT_COLUMNS} FROM instagram_accounts \
         ORDER BY priority ASC, last_synced_at IS NOT NULL, last_synced_at ASC, ig_user_id ASC"
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    Ok(rows.iter().map(decode_account).collect())
}

fn decode_account(row: &SqliteRow) -> std::result::Result<Account, UnreadableAccount> {
    Account::from_row(row).map_err(|err| UnreadableAccount {
        ig_user_id: row.try_get("ig_user_id").unwrap_or_default(),
        account_name: row.try_get("account_name").unwrap_or_default(),
        error: err.into(),
    })
}

#[instrument(skip_all)]
pub async fn get_account(pool: &Pool, ig_user_id: &str) -> sqlx::Result<Option<Account>> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM instagram_accounts WHERE ig_user_id = ?");
    sqlx::query_as::<_, Account>(&sql)
        .bind(ig_user_id)
        .fetch_optional(pool)
        .await
}

/// Replace token, expiry and issuance time in one statement so the three
/// never disagree.
#[instrument(skip_all, fields(account = %ig_user_id))]
pub async fn update_account_token(
    pool: &Pool,
    ig_user_id: &str,
    access_token: &str,
    expires_at: DateTime<Utc>,
    issued_at: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE instagram_accounts SET access_token = ?, token_expires_at = ?, token_issued_at = ?, updated_at = ? WHERE ig_user_id = ?",
    )
    .bind(access_token)
    .bind(expires_at)
    .bind(issued_at)
    .bind(Utc::now())
    .bind(ig_user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Move the watermark forward. Returns `false` when the stored watermark is
/// already at or past `watermark`.
#[instrument(skip_all, fields(account = %ig_user_id))]
pub async fn advance_watermark(
    pool: &Pool,
    ig_user_id: &str,
    watermark: DateTime<Utc>,
) -> sqlx::Result<bool> {
    let mut tx = pool.begin().await?;
    let current: Option<Option<DateTime<Utc>>> =
        sqlx::query_scalar("SELECT last_synced_at FROM instagram_accounts WHERE ig_user_id = ?")
            .bind(ig_user_id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some(current) = current else {
        return Ok(false);
    };
    if current.is_some_and(|stored| stored >= watermark) {
        return Ok(false);
    }
    sqlx::query(
        "UPDATE instagram_accounts SET last_synced_at = ?, updated_at = ? WHERE ig_user_id = ?",
    )
    .bind(watermark)
    .bind(Utc::now())
    .bind(ig_user_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(true)
}

/// Insert a post unless its media id is already stored. Returns whether a
/// row was written.
#[instrument(skip_all, fields(media_id = %post.media_id))]
pub async fn insert_post_if_absent(pool: &Pool, post: &NewPost<'_>) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "INSERT INTO instagram_posts (media_id, ig_user_id, caption, media_url, published_at, ingested_at) VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT(media_id) DO NOTHING",
    )
    .bind(post.media_id)
    .bind(post.ig_user_id)
    .bind(post.caption)
    .bind(post.media_url)
    .bind(post.published_at)
    .bind(post.ingested_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn get_post(pool: &Pool, media_id: &str) -> sqlx::Result<Option<Post>> {
    sqlx::query_as::<_, Post>(
        "SELECT media_id, ig_user_id, caption, media_url, published_at, ingested_at FROM instagram_posts WHERE media_id = ?",
    )
    .bind(media_id)
    .fetch_optional(pool)
    .await
}

pub async fn count_posts(pool: &Pool, ig_user_id: &str) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM instagram_posts WHERE ig_user_id = ?")
        .bind(ig_user_id)
        .fetch_one(pool)
        .await
}

/// Access token of the account that owns `media_id`, if both exist.
#[instrument(skip_all)]
pub async fn token_for_media(pool: &Pool, media_id: &str) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar(
        "SELECT a.access_token FROM instagram_posts p JOIN instagram_accounts a ON a.ig_user_id = p.ig_user_id WHERE p.media_id = ?",
    )
    .bind(media_id)
    .fetch_optional(pool)
    .await
}

#[instrument(skip_all, fields(media_id = %media_id))]
pub async fn update_post_media_url(pool: &Pool, media_id: &str, media_url: &str) -> sqlx::Result<()> {
    sqlx::query("UPDATE instagram_posts SET media_url = ? WHERE media_id = ?")
        .bind(media_url)
        .bind(media_id)
        .execute(pool)
        .await?;
    Ok(())
}

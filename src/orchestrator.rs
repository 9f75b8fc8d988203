//! One batch run across every stored account.
//!
//! Accounts are processed strictly one at a time. Every per-account step
//! returns a typed outcome that is folded into the [`RunSummary`]; a failing
//! or panicking account never stops the accounts after it.
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::budget::RequestBudget;
use crate::config::SyncSettings;
use crate::db::{self, Pool};
use crate::error::Result;
use crate::fetcher::{self, FetchOptions};
use crate::graph::GraphService;
use crate::model::{
    Account, AccountReport, AccountStatus, FetchOutcome, RefreshOutcome, RunSummary, SkipReason,
    UnreadableAccount,
};
use crate::token;

/// Run one batch. Only a failure to load the account list is returned as an
/// error; everything else is reported per account in the summary.
#[instrument(skip_all)]
pub async fn run_batch(
    pool: &Pool,
    api: &dyn GraphService,
    settings: &SyncSettings,
) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let budget = RequestBudget::new(settings.request_budget);

    let accounts = db::list_accounts_for_sync(pool).await.map_err(|err| {
        error!(?err, %run_id, "failed to load accounts");
        err
    })?;
    info!(%run_id, accounts = accounts.len(), ceiling = budget.ceiling(), "starting batch run");

    let total = accounts.len();
    let mut reports = Vec::with_capacity(total);
    for (index, row) in accounts.into_iter().enumerate() {
        let report = match row {
            Ok(account) => process_guarded(pool, api, &budget, settings, account).await,
            Err(unreadable) => invalid_account(unreadable),
        };
        reports.push(report);

        if pause_after(index, total) && !settings.pacing.is_zero() {
            tokio::time::sleep(settings.pacing).await;
        }
    }

    let summary = summarize(run_id, started_at, &budget, reports);
    info!(
        %run_id,
        processed = summary.accounts_processed,
        skipped = summary.accounts_skipped,
        requests = summary.requests_made,
        inserted = summary.posts_inserted,
        budget_exhausted = summary.budget_exhausted,
        degraded = summary.degraded,
        "batch run completed"
    );
    Ok(summary)
}

/// Pacing applies between accounts, never after the last one.
fn pause_after(index: usize, total: usize) -> bool {
    index + 1 < total
}

fn invalid_account(unreadable: UnreadableAccount) -> AccountReport {
    error!(
        account = %unreadable.ig_user_id,
        error = %unreadable.error,
        "stored account row is unreadable; skipping"
    );
    AccountReport {
        ig_user_id: unreadable.ig_user_id,
        account_name: unreadable.account_name,
        token: None,
        status: AccountStatus::Skipped {
            reason: SkipReason::InvalidAccount {
                error: unreadable.error,
            },
        },
    }
}

async fn process_guarded(
    pool: &Pool,
    api: &dyn GraphService,
    budget: &RequestBudget,
    settings: &SyncSettings,
    account: Account,
) -> AccountReport {
    let ig_user_id = account.ig_user_id.clone();
    let account_name = account.account_name.clone();
    // The budget is an atomic counter, so a panic mid-account cannot leave it
    // half-updated.
    match AssertUnwindSafe(process_account(pool, api, budget, settings, account))
        .catch_unwind()
        .await
    {
        Ok(report) => report,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(account = %ig_user_id, %message, "account processing panicked");
            AccountReport {
                ig_user_id,
                account_name,
                token: None,
                status: AccountStatus::Skipped {
                    reason: SkipReason::Panicked { message },
                },
            }
        }
    }
}

#[instrument(skip_all, fields(account = %account.ig_user_id))]
async fn process_account(
    pool: &Pool,
    api: &dyn GraphService,
    budget: &RequestBudget,
    settings: &SyncSettings,
    mut account: Account,
) -> AccountReport {
    let skipped = |account: &Account, token: Option<RefreshOutcome>, reason: SkipReason| {
        AccountReport {
            ig_user_id: account.ig_user_id.clone(),
            account_name: account.account_name.clone(),
            token,
            status: AccountStatus::Skipped { reason },
        }
    };

    if budget.is_exhausted() {
        info!("request budget exhausted; skipping account");
        return skipped(&account, None, SkipReason::BudgetExhausted);
    }

    let refresh = token::ensure_fresh_token(
        pool,
        api,
        budget,
        &settings.refresh_policy,
        &mut account,
        Utc::now(),
    )
    .await;
    let refresh_skip = match &refresh {
        RefreshOutcome::Failed { error } => {
            warn!(%error, "token refresh failed; skipping account for this run");
            Some(SkipReason::TokenRefreshFailed {
                error: error.clone(),
            })
        }
        RefreshOutcome::BudgetExhausted => {
            info!("request budget exhausted during token check; skipping account");
            Some(SkipReason::BudgetExhausted)
        }
        RefreshOutcome::Skipped | RefreshOutcome::Refreshed { .. } => None,
    };
    if let Some(reason) = refresh_skip {
        return skipped(&account, Some(refresh), reason);
    }

    if budget.is_exhausted() {
        info!("request budget exhausted after token check; skipping fetch");
        return skipped(
            &account,
            Some(refresh),
            SkipReason::BudgetExhaustedAfterTokenCheck,
        );
    }

    let options = FetchOptions {
        page_size: settings.page_size,
        max_pages: settings.max_pages,
    };
    let report = match fetcher::sync_account(pool, api, budget, &account, options).await {
        FetchOutcome::Completed(report) => report,
        FetchOutcome::BudgetExhausted => {
            return skipped(
                &account,
                Some(refresh),
                SkipReason::BudgetExhaustedAfterTokenCheck,
            );
        }
        FetchOutcome::Failed {
            error,
            posts_inserted,
            ..
        } => {
            warn!(%error, posts_inserted, "fetch failed; watermark left unchanged");
            let reason = SkipReason::FetchFailed {
                error,
                posts_inserted,
            };
            return skipped(&account, Some(refresh), reason);
        }
    };

    let mut watermark_advanced = false;
    if let Some(candidate) = report.new_watermark {
        if account.last_synced_at.map_or(true, |prior| candidate > prior) {
            match db::advance_watermark(pool, &account.ig_user_id, candidate).await {
                Ok(advanced) => watermark_advanced = advanced,
                Err(err) => {
                    warn!(?err, "failed to commit watermark");
                    let reason = SkipReason::WatermarkCommitFailed {
                        error: err.into(),
                        posts_inserted: report.posts_inserted,
                    };
                    return skipped(&account, Some(refresh), reason);
                }
            }
        }
    }

    AccountReport {
        ig_user_id: account.ig_user_id,
        account_name: account.account_name,
        token: Some(refresh),
        status: AccountStatus::Synced {
            posts_inserted: report.posts_inserted,
            pages_fetched: report.pages_fetched,
            stop: report.stop,
            watermark: report.new_watermark,
            watermark_advanced,
        },
    }
}

fn summarize(
    run_id: Uuid,
    started_at: chrono::DateTime<Utc>,
    budget: &RequestBudget,
    accounts: Vec<AccountReport>,
) -> RunSummary {
    let accounts_processed = accounts.iter().filter(|r| r.is_synced()).count();
    let skip_reasons: Vec<&SkipReason> = accounts.iter().filter_map(|r| r.skip_reason()).collect();
    let store_errors = skip_reasons
        .iter()
        .filter(|reason| reason.error().is_some_and(|e| e.is_store()))
        .count();
    let rate_limited = skip_reasons
        .iter()
        .any(|reason| reason.error().is_some_and(|e| e.is_rate_limited()));
    let budget_exhausted =
        budget.is_exhausted() || skip_reasons.iter().any(|reason| reason.is_budget());

    RunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        accounts_total: accounts.len(),
        accounts_processed,
        accounts_skipped: skip_reasons.len(),
        requests_made: budget.consumed(),
        request_ceiling: budget.ceiling(),
        posts_inserted: accounts.iter().map(|r| r.posts_inserted()).sum(),
        budget_exhausted,
        rate_limited,
        degraded: store_errors > 0,
        store_errors,
        accounts,
    }
}

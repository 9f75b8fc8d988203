//! Entry point that starts batch runs and keeps them from overlapping.
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::SyncSettings;
use crate::db::Pool;
use crate::error::Result;
use crate::graph::GraphService;
use crate::model::RunSummary;
use crate::orchestrator;

/// Acknowledgement returned by [`BatchTrigger::trigger`].
#[derive(Debug)]
pub enum TriggerAck {
    /// A run was started in the background; await the handle for its summary.
    Started(JoinHandle<Result<RunSummary>>),
    /// Another run holds the gate. Nothing was started.
    AlreadyRunning,
}

#[derive(Clone)]
pub struct BatchTrigger {
    pool: Pool,
    api: Arc<dyn GraphService>,
    settings: Arc<SyncSettings>,
    gate: Arc<Mutex<()>>,
}

impl BatchTrigger {
    pub fn new(pool: Pool, api: Arc<dyn GraphService>, settings: SyncSettings) -> Self {
        Self {
            pool,
            api,
            settings: Arc::new(settings),
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Start a run in the background and return immediately.
    pub fn trigger(&self) -> TriggerAck {
        let Ok(guard) = self.gate.clone().try_lock_owned() else {
            warn!("batch run already in progress; trigger ignored");
            return TriggerAck::AlreadyRunning;
        };
        info!("batch run triggered");
        let pool = self.pool.clone();
        let api = self.api.clone();
        let settings = self.settings.clone();
        TriggerAck::Started(tokio::spawn(async move {
            let _guard = guard;
            orchestrator::run_batch(&pool, api.as_ref(), &settings).await
        }))
    }

    /// Run to completion, waiting for any in-flight run to finish first.
    pub async fn run_now(&self) -> Result<RunSummary> {
        let _guard = self.gate.lock().await;
        orchestrator::run_batch(&self.pool, self.api.as_ref(), &self.settings).await
    }

    pub fn is_running(&self) -> bool {
        self.gate.try_lock().is_err()
    }
}

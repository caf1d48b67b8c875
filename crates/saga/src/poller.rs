//! Periodic sweep that re-dispatches orchestrations which stopped moving.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use record_store::{RecordStore, StaleQuery};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::{DispatchOutcome, SagaEngine};
use crate::error::Result;

/// Poller settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Minimum idle time before a record counts as stale.
    pub stale_after: Duration,
    /// Maximum records per sweep.
    pub batch_size: usize,
    /// Maximum dispatches running at once within a sweep.
    pub max_concurrency: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(30),
            batch_size: 50,
            max_concurrency: 8,
        }
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Finds non-terminal records whose lease has lapsed and drives them again.
///
/// Covers crashed workers, interrupted cycles and stuck compensations.
pub struct StalePoller<S: RecordStore> {
    engine: Arc<SagaEngine<S>>,
    config: PollerConfig,
    running: Mutex<Option<Running>>,
}

impl<S: RecordStore + 'static> StalePoller<S> {
    pub fn new(engine: Arc<SagaEngine<S>>, config: PollerConfig) -> Self {
        Self {
            engine,
            config,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Starts the background loop. Does nothing if it is already running.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let engine = Arc::clone(&self.engine);
        let config = self.config;

        let handle = tokio::spawn(async move {
            tracing::info!(interval = ?config.interval, stale_after = ?config.stale_after, "stale poller started");
            let mut timer = tokio::time::interval(config.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {
                        if let Err(e) = sweep(&engine, &config).await {
                            tracing::error!(error = %e, "stale sweep failed");
                        }
                    }
                }
            }
            tracing::info!("stale poller stopped");
        });

        *running = Some(Running { cancel, handle });
    }

    /// Stops the loop and waits for the current sweep to finish.
    pub async fn stop(&self) {
        let Some(Running { cancel, handle }) = self.running.lock().await.take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "stale poller task ended abnormally");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Runs one sweep and returns how many records were dispatched.
    pub async fn poll_once(&self) -> Result<usize> {
        sweep(&self.engine, &self.config).await
    }
}

#[tracing::instrument(skip_all)]
async fn sweep<S: RecordStore>(engine: &SagaEngine<S>, config: &PollerConfig) -> Result<usize> {
    let query = StaleQuery::older_than(config.stale_after).limit(config.batch_size);
    let stale = engine.store().find_stale(query).await?;
    if stale.is_empty() {
        return Ok(0);
    }

    let count = stale.len();
    metrics::counter!("saga_stale_redispatch_total").increment(count as u64);
    tracing::info!(count, "re-dispatching stale orchestrations");

    futures_util::stream::iter(stale)
        .for_each_concurrent(config.max_concurrency.max(1), |record| async move {
            match engine.dispatch(record.id).await {
                Ok(DispatchOutcome::CompensationStuck { state, error }) => {
                    tracing::warn!(orchestration_id = %record.id, %state, %error, "compensation still stuck");
                }
                Ok(outcome) => {
                    tracing::debug!(orchestration_id = %record.id, ?outcome, "stale dispatch finished");
                }
                Err(e) => {
                    tracing::error!(orchestration_id = %record.id, error = %e, "stale dispatch failed");
                }
            }
        })
        .await;

    Ok(count)
}

//! Saga engine: drives one orchestration record through the state machine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::{Direction, OrchestrationId, OrchestrationState, StepKind, StepStatus};
use record_store::{Claim, OrchestrationRecord, RecordStore, StepRecord, Transition};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, SagaError};
use crate::executor::{StepExecutor, StepOutcome};
use crate::notifier::{Completion, CompletionNotifier};
use crate::services::row_input;
use crate::transitions::{self, Plan};

/// Worker identity and lease settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Recorded as `claimed_by` on leased records.
    pub worker_id: String,
    /// Lease taken on claim. Renewed by every commit and by a heartbeat
    /// while a step call is in flight.
    pub lease_duration: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            lease_duration: Duration::from_secs(60),
        }
    }
}

/// Result of one dispatch cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The record reached `COMPLETED` in this cycle.
    Completed,
    /// The record reached `ROLLED_BACK` in this cycle.
    RolledBack,
    /// The record was already terminal; nothing was done.
    AlreadyTerminal(OrchestrationState),
    /// Another worker holds the lease.
    Busy,
    /// A compensation exhausted its retries; the record stays in `state`.
    CompensationStuck {
        state: OrchestrationState,
        error: String,
    },
    /// Shutdown interrupted the cycle; the record resumes on a later poll.
    Interrupted { state: OrchestrationState },
}

impl DispatchOutcome {
    /// True if the record ended the cycle in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Completed
                | DispatchOutcome::RolledBack
                | DispatchOutcome::AlreadyTerminal(_)
        )
    }
}

/// Drives orchestration records to a terminal state.
///
/// Every state change is committed to the store before the next step runs,
/// so a crashed worker's record can be resumed by any other worker once its
/// lease expires.
pub struct SagaEngine<S: RecordStore> {
    store: S,
    executor: StepExecutor,
    notifier: Arc<dyn CompletionNotifier>,
    config: EngineConfig,
    shutdown: CancellationToken,
}

impl<S: RecordStore> SagaEngine<S> {
    pub fn new(
        store: S,
        executor: StepExecutor,
        notifier: Arc<dyn CompletionNotifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            executor,
            notifier,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Token cancelled on shutdown. In-flight backoff waits end immediately.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops all in-flight dispatch cycles at their next wait.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Loads a record.
    pub async fn get(&self, id: OrchestrationId) -> Result<OrchestrationRecord> {
        self.store.get(id).await?.ok_or(SagaError::NotFound(id))
    }

    /// Returns the step log of a record.
    pub async fn history(&self, id: OrchestrationId) -> Result<Vec<StepRecord>> {
        self.get(id).await?;
        Ok(self.store.step_records(id).await?)
    }

    /// Advances the record as far as it can go in one cycle.
    ///
    /// Safe to call any number of times and from any number of workers:
    /// terminal records are left untouched and a record leased elsewhere
    /// yields [`DispatchOutcome::Busy`].
    #[tracing::instrument(skip(self), fields(orchestration_id = %id, worker = %self.config.worker_id))]
    pub async fn dispatch(&self, id: OrchestrationId) -> Result<DispatchOutcome> {
        metrics::counter!("saga_dispatch_total").increment(1);

        let record = self.get(id).await?;
        if record.state.is_terminal() {
            tracing::debug!(state = %record.state, "already terminal");
            return Ok(DispatchOutcome::AlreadyTerminal(record.state));
        }

        let Some(claim) = self
            .store
            .claim(id, &self.config.worker_id, self.config.lease_duration)
            .await?
        else {
            metrics::counter!("saga_claim_conflicts_total").increment(1);
            tracing::debug!("leased by another worker, backing off");
            return Ok(DispatchOutcome::Busy);
        };

        let result = self.drive(&claim).await;

        if let Err(e) = self.store.release(&claim).await {
            tracing::warn!(error = %e, "failed to release claim");
        }
        if let Err(e) = &result {
            tracing::error!(error = %e, "dispatch cycle aborted");
        }
        result
    }

    async fn drive(&self, claim: &Claim) -> Result<DispatchOutcome> {
        let mut record = self.get(claim.orchestration_id).await?;
        if record.state.is_terminal() {
            return Ok(DispatchOutcome::AlreadyTerminal(record.state));
        }

        // Step whose `started` row this cycle has already written.
        let mut started: Option<(StepKind, Direction)> = None;

        loop {
            match transitions::plan(record.state) {
                Plan::Enter {
                    step,
                    direction,
                    to,
                } => {
                    let row = StepRecord::started(record.id, step, direction)
                        .with_input(row_input(&record, step, direction));
                    record = self
                        .commit(claim, Transition::new(record.state, to).with_step_record(row))
                        .await?;
                    started = Some((step, direction));
                }
                Plan::Finish { to } => {
                    record = self
                        .commit(claim, Transition::new(record.state, to))
                        .await?;
                }
                Plan::Execute {
                    step,
                    direction,
                    on_success,
                    on_failure,
                } => {
                    if started != Some((step, direction)) {
                        tracing::info!(%step, %direction, state = %record.state, "resuming step");
                        let row = StepRecord::started(record.id, step, direction)
                            .with_input(row_input(&record, step, direction));
                        record = self
                            .commit(claim, Transition::stay(record.state).with_step_record(row))
                            .await?;
                    }

                    let started_at = Utc::now();
                    let timer = Instant::now();
                    let outcome = tokio::select! {
                        outcome = self.executor.run(step, direction, &record, &self.shutdown) => outcome,
                        error = self.heartbeat(claim) => {
                            metrics::counter!("saga_lease_lost_total").increment(1);
                            tracing::error!(%step, %direction, %error, "lease lost while step was running");
                            return Err(error);
                        }
                    };
                    metrics::histogram!(
                        "saga_step_duration_seconds",
                        "step" => step.as_str(),
                        "direction" => direction.as_str()
                    )
                    .record(timer.elapsed().as_secs_f64());

                    if outcome.is_cancelled() {
                        tracing::info!(%step, state = %record.state, "interrupted by shutdown");
                        return Ok(DispatchOutcome::Interrupted {
                            state: record.state,
                        });
                    }
                    started = None;

                    let input = row_input(&record, step, direction);
                    let finished = |status: StepStatus, attempts: u32| {
                        StepRecord::new(record.id, step, direction, status)
                            .with_input(input.clone())
                            .with_attempts(attempts)
                            .started_at(started_at)
                            .finished()
                    };

                    let transition = match (direction, outcome) {
                        (Direction::Forward, StepOutcome::Succeeded { output, attempts }) => {
                            tracing::info!(%step, attempts, "step completed");
                            Transition::new(record.state, on_success)
                                .with_context(step.context_key(), output.clone())
                                .with_step_record(
                                    finished(StepStatus::Completed, attempts).with_output(output),
                                )
                        }
                        (Direction::Forward, StepOutcome::Failed { error, attempts }) => {
                            tracing::warn!(%step, attempts, %error, "step failed");
                            let message = error.to_string();
                            Transition::new(record.state, on_failure)
                                .with_failure(step, &message)
                                .with_step_record(
                                    finished(StepStatus::Failed, attempts).with_error(message),
                                )
                        }
                        (Direction::Compensation, StepOutcome::Succeeded { output, attempts }) => {
                            tracing::info!(%step, attempts, "step compensated");
                            Transition::new(record.state, on_success).with_step_record(
                                finished(StepStatus::Compensated, attempts).with_output(output),
                            )
                        }
                        (Direction::Compensation, StepOutcome::Failed { error, attempts }) => {
                            let message = format!("compensation of {step} failed: {error}");
                            metrics::counter!("saga_compensation_stuck_total", "step" => step.as_str())
                                .increment(1);
                            tracing::error!(
                                %step,
                                attempts,
                                %error,
                                handle = %input,
                                "compensation exhausted retries, manual attention required"
                            );
                            let row = finished(StepStatus::Failed, attempts)
                                .with_error(error.to_string())
                                .with_output(serde_json::json!({
                                    "attempts": attempts,
                                    "handle": input.clone(),
                                }));
                            let record = self
                                .commit(
                                    claim,
                                    Transition::new(record.state, on_failure)
                                        .with_compensation_error(&message)
                                        .with_step_record(row),
                                )
                                .await?;
                            return Ok(DispatchOutcome::CompensationStuck {
                                state: record.state,
                                error: message,
                            });
                        }
                    };
                    record = self.commit(claim, transition).await?;
                }
                Plan::Terminal => return Ok(self.complete(&record).await),
            }
        }
    }

    /// Renews `claim` every third of its lease. Only returns once a renewal
    /// fails, at which point another worker may own the record.
    async fn heartbeat(&self, claim: &Claim) -> SagaError {
        let period = (claim.lease / 3).max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.store.renew(claim).await {
                return e.into();
            }
            tracing::trace!(orchestration_id = %claim.orchestration_id, "lease renewed");
        }
    }

    async fn commit(&self, claim: &Claim, transition: Transition) -> Result<OrchestrationRecord> {
        debug_assert!(transitions::is_valid_transition(
            transition.from,
            transition.to
        ));
        let (from, to) = (transition.from, transition.to);
        let record = self.store.commit(claim, transition).await?;
        if from != to {
            tracing::debug!(%from, %to, "state committed");
        }
        Ok(record)
    }

    async fn complete(&self, record: &OrchestrationRecord) -> DispatchOutcome {
        if let Some(completion) = Completion::from_record(record) {
            self.notifier.notify(completion).await;
        }

        let elapsed = (Utc::now() - record.created_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(elapsed);

        match record.state {
            OrchestrationState::Completed => {
                metrics::counter!("saga_completed_total").increment(1);
                tracing::info!(elapsed, "onboarding completed");
                DispatchOutcome::Completed
            }
            state => {
                metrics::counter!("saga_rolled_back_total").increment(1);
                tracing::warn!(
                    elapsed,
                    %state,
                    failed_step = ?record.failed_step,
                    error = record.error.as_deref().unwrap_or_default(),
                    "onboarding rolled back"
                );
                DispatchOutcome::RolledBack
            }
        }
    }
}

//! Completion callback invoked when an orchestration reaches a terminal state.

use std::sync::Arc;

use async_trait::async_trait;
use common::{OrchestrationId, OrchestrationState, StepKind};
use record_store::OrchestrationRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

/// How an orchestration ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompletionOutcome {
    Completed {
        context: Map<String, Value>,
    },
    RolledBack {
        failed_step: Option<StepKind>,
        error: Option<String>,
    },
}

/// Notification sent once per orchestration on reaching a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub orchestration_id: OrchestrationId,
    #[serde(flatten)]
    pub outcome: CompletionOutcome,
}

impl Completion {
    /// Builds the notification for a terminal record. Returns `None` otherwise.
    pub fn from_record(record: &OrchestrationRecord) -> Option<Self> {
        let outcome = match record.state {
            OrchestrationState::Completed => CompletionOutcome::Completed {
                context: record.context.clone(),
            },
            OrchestrationState::RolledBack => CompletionOutcome::RolledBack {
                failed_step: record.failed_step,
                error: record.error.clone(),
            },
            _ => return None,
        };
        Some(Self {
            orchestration_id: record.id,
            outcome,
        })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, CompletionOutcome::Completed { .. })
    }
}

/// Receives completion notifications.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, completion: Completion);
}

/// Writes completions to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl CompletionNotifier for LoggingNotifier {
    async fn notify(&self, completion: Completion) {
        match &completion.outcome {
            CompletionOutcome::Completed { .. } => {
                tracing::info!(orchestration_id = %completion.orchestration_id, "onboarding completed");
            }
            CompletionOutcome::RolledBack { failed_step, error } => {
                tracing::warn!(
                    orchestration_id = %completion.orchestration_id,
                    failed_step = ?failed_step,
                    error = error.as_deref().unwrap_or_default(),
                    "onboarding rolled back"
                );
            }
        }
    }
}

/// Keeps every completion in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    completions: Arc<Mutex<Vec<Completion>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn completions(&self) -> Vec<Completion> {
        self.completions.lock().await.clone()
    }

    /// Number of notifications received for `id`.
    pub async fn count_for(&self, id: OrchestrationId) -> usize {
        self.completions
            .lock()
            .await
            .iter()
            .filter(|c| c.orchestration_id == id)
            .count()
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify(&self, completion: Completion) {
        self.completions.lock().await.push(completion);
    }
}

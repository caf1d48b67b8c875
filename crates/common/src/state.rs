//! Orchestration state enum.

use serde::{Deserialize, Serialize};

/// The persisted state of an onboarding orchestration.
///
/// ```text
/// PENDING ─► AUTH_IN_PROGRESS ─► AUTH_COMPLETE ─► PROV_IN_PROGRESS ─► PROV_COMPLETE ─► DR_IN_PROGRESS ─► COMPLETED
///                  │                                    │                                  │
///                  ▼                                    ▼                                  ▼
///             AUTH_FAILED                          PROV_FAILED                          DR_FAILED
///                  │                                    │                                  │
///                  │                                    │                                  ▼
///                  │                                    │                          PROV_COMPENSATING
///                  │                                    ▼                                  │
///                  │                           AUTH_COMPENSATING ◄─────────────────────────┘
///                  ▼                                    │
///             ROLLED_BACK ◄─────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationState {
    #[default]
    Pending,
    AuthInProgress,
    AuthComplete,
    AuthFailed,
    ProvInProgress,
    ProvComplete,
    ProvFailed,
    DrInProgress,
    Completed,
    DrFailed,
    AuthCompensating,
    ProvCompensating,
    RolledBack,
}

impl OrchestrationState {
    /// Every state, in declaration order.
    pub const ALL: [OrchestrationState; 13] = [
        OrchestrationState::Pending,
        OrchestrationState::AuthInProgress,
        OrchestrationState::AuthComplete,
        OrchestrationState::AuthFailed,
        OrchestrationState::ProvInProgress,
        OrchestrationState::ProvComplete,
        OrchestrationState::ProvFailed,
        OrchestrationState::DrInProgress,
        OrchestrationState::Completed,
        OrchestrationState::DrFailed,
        OrchestrationState::AuthCompensating,
        OrchestrationState::ProvCompensating,
        OrchestrationState::RolledBack,
    ];

    /// Returns true if no further transitions are accepted from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestrationState::Completed | OrchestrationState::RolledBack
        )
    }

    /// Returns true for the `_IN_PROGRESS` states.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            OrchestrationState::AuthInProgress
                | OrchestrationState::ProvInProgress
                | OrchestrationState::DrInProgress
        )
    }

    /// Returns true for the `_COMPENSATING` states.
    pub fn is_compensating(&self) -> bool {
        matches!(
            self,
            OrchestrationState::AuthCompensating | OrchestrationState::ProvCompensating
        )
    }

    /// Returns true for the `_FAILED` states.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            OrchestrationState::AuthFailed
                | OrchestrationState::ProvFailed
                | OrchestrationState::DrFailed
        )
    }

    /// Iterates over all non-terminal states.
    pub fn non_terminal() -> impl Iterator<Item = OrchestrationState> {
        Self::ALL.into_iter().filter(|s| !s.is_terminal())
    }

    /// Returns the persisted state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestrationState::Pending => "PENDING",
            OrchestrationState::AuthInProgress => "AUTH_IN_PROGRESS",
            OrchestrationState::AuthComplete => "AUTH_COMPLETE",
            OrchestrationState::AuthFailed => "AUTH_FAILED",
            OrchestrationState::ProvInProgress => "PROV_IN_PROGRESS",
            OrchestrationState::ProvComplete => "PROV_COMPLETE",
            OrchestrationState::ProvFailed => "PROV_FAILED",
            OrchestrationState::DrInProgress => "DR_IN_PROGRESS",
            OrchestrationState::Completed => "COMPLETED",
            OrchestrationState::DrFailed => "DR_FAILED",
            OrchestrationState::AuthCompensating => "AUTH_COMPENSATING",
            OrchestrationState::ProvCompensating => "PROV_COMPENSATING",
            OrchestrationState::RolledBack => "ROLLED_BACK",
        }
    }
}

impl std::fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrchestrationState {
    type Err = crate::ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| crate::ParseEnumError::new("OrchestrationState", s))
    }
}

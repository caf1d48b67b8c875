use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::OrchestrationState;

/// Query for orchestrations that have stopped making progress.
///
/// Matches records in one of `states` whose `updated_at` is strictly before
/// `updated_before` and whose lease is absent or expired.
#[derive(Debug, Clone)]
pub struct StaleQuery {
    /// States to scan. Terminal states are never returned.
    pub states: Vec<OrchestrationState>,

    /// Only records last updated before this instant.
    pub updated_before: DateTime<Utc>,

    /// Maximum number of records to return, oldest first.
    pub limit: usize,
}

impl StaleQuery {
    /// Creates a query over every non-terminal state.
    pub fn new(updated_before: DateTime<Utc>) -> Self {
        Self {
            states: OrchestrationState::non_terminal().collect(),
            updated_before,
            limit: 100,
        }
    }

    /// Creates a query for records idle for at least `stale_after`.
    pub fn older_than(stale_after: Duration) -> Self {
        let delta = TimeDelta::from_std(stale_after).unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(delta)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::new(cutoff)
    }

    /// Restricts the scan to the given states.
    pub fn states(mut self, states: impl IntoIterator<Item = OrchestrationState>) -> Self {
        self.states = states.into_iter().filter(|s| !s.is_terminal()).collect();
        self
    }

    /// Sets the maximum number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Returns true if `state` is one of the scanned states.
    pub fn matches_state(&self, state: OrchestrationState) -> bool {
        self.states.contains(&state)
    }

    pub(crate) fn state_names(&self) -> Vec<String> {
        self.states.iter().map(|s| s.as_str().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scans_all_non_terminal_states() {
        let q = StaleQuery::new(Utc::now());
        assert_eq!(q.states.len(), 11);
        assert!(!q.matches_state(OrchestrationState::Completed));
        assert!(!q.matches_state(OrchestrationState::RolledBack));
        assert!(q.matches_state(OrchestrationState::ProvCompensating));
    }

    #[test]
    fn test_states_filter_drops_terminal() {
        let q = StaleQuery::new(Utc::now())
            .states([OrchestrationState::DrInProgress, OrchestrationState::Completed])
            .limit(5);
        assert_eq!(q.states, vec![OrchestrationState::DrInProgress]);
        assert_eq!(q.limit, 5);
        assert_eq!(q.state_names(), vec!["DR_IN_PROGRESS".to_string()]);
    }

    #[test]
    fn test_older_than() {
        let before = Utc::now();
        let q = StaleQuery::older_than(Duration::from_secs(60));
        assert!(q.updated_before <= before - TimeDelta::seconds(59));

        let q = StaleQuery::older_than(Duration::MAX);
        assert_eq!(q.updated_before, DateTime::<Utc>::MIN_UTC);
    }
}

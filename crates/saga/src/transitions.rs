//! The onboarding state machine as a lookup table.

use common::{Direction, OrchestrationState, StepKind};

use OrchestrationState::*;

/// What the engine does next for a record in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Record a `started` row for `step` and move to `to`.
    Enter {
        step: StepKind,
        direction: Direction,
        to: OrchestrationState,
    },
    /// Run `step` and move to `on_success` or `on_failure`.
    Execute {
        step: StepKind,
        direction: Direction,
        on_success: OrchestrationState,
        on_failure: OrchestrationState,
    },
    /// Move to `to` without running anything.
    Finish { to: OrchestrationState },
    /// Nothing left to do.
    Terminal,
}

const fn enter(step: StepKind, direction: Direction, to: OrchestrationState) -> Plan {
    Plan::Enter {
        step,
        direction,
        to,
    }
}

const fn execute(
    step: StepKind,
    direction: Direction,
    on_success: OrchestrationState,
    on_failure: OrchestrationState,
) -> Plan {
    Plan::Execute {
        step,
        direction,
        on_success,
        on_failure,
    }
}

static PLANS: [(OrchestrationState, Plan); 13] = [
    (Pending, enter(StepKind::Auth, Direction::Forward, AuthInProgress)),
    (
        AuthInProgress,
        execute(StepKind::Auth, Direction::Forward, AuthComplete, AuthFailed),
    ),
    (
        AuthComplete,
        enter(StepKind::Provisioning, Direction::Forward, ProvInProgress),
    ),
    (AuthFailed, Plan::Finish { to: RolledBack }),
    (
        ProvInProgress,
        execute(
            StepKind::Provisioning,
            Direction::Forward,
            ProvComplete,
            ProvFailed,
        ),
    ),
    (
        ProvComplete,
        enter(StepKind::DisasterRecovery, Direction::Forward, DrInProgress),
    ),
    (
        ProvFailed,
        enter(StepKind::Auth, Direction::Compensation, AuthCompensating),
    ),
    (
        DrInProgress,
        execute(
            StepKind::DisasterRecovery,
            Direction::Forward,
            Completed,
            DrFailed,
        ),
    ),
    (
        DrFailed,
        enter(StepKind::Provisioning, Direction::Compensation, ProvCompensating),
    ),
    (
        ProvCompensating,
        execute(
            StepKind::Provisioning,
            Direction::Compensation,
            AuthCompensating,
            ProvCompensating,
        ),
    ),
    (
        AuthCompensating,
        execute(
            StepKind::Auth,
            Direction::Compensation,
            RolledBack,
            AuthCompensating,
        ),
    ),
    (Completed, Plan::Terminal),
    (RolledBack, Plan::Terminal),
];

/// Returns the plan for `state`.
pub fn plan(state: OrchestrationState) -> Plan {
    PLANS
        .iter()
        .find(|(s, _)| *s == state)
        .map(|(_, p)| *p)
        .unwrap_or(Plan::Terminal)
}

/// True if the engine may move a record from `from` to `to` in one commit.
///
/// A `from == to` pair is valid only for states that execute a step, where
/// it appends a row without changing state.
pub fn is_valid_transition(from: OrchestrationState, to: OrchestrationState) -> bool {
    match plan(from) {
        Plan::Enter { to: next, .. } | Plan::Finish { to: next } => to == next,
        Plan::Execute {
            on_success,
            on_failure,
            ..
        } => to == from || to == on_success || to == on_failure,
        Plan::Terminal => false,
    }
}

/// Forward steps in execution order.
pub fn forward_steps() -> [StepKind; 3] {
    StepKind::ORDER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_state_has_a_plan() {
        for state in OrchestrationState::ALL {
            assert!(PLANS.iter().any(|(s, _)| *s == state), "missing {state}");
            assert_eq!(plan(state) == Plan::Terminal, state.is_terminal());
        }
    }

    #[test]
    fn test_happy_path_walks_forward_steps_in_order() {
        let mut state = Pending;
        let mut executed = Vec::new();
        loop {
            state = match plan(state) {
                Plan::Enter { to, .. } | Plan::Finish { to } => to,
                Plan::Execute {
                    step, on_success, ..
                } => {
                    executed.push(step);
                    on_success
                }
                Plan::Terminal => break,
            };
        }
        assert_eq!(state, Completed);
        assert_eq!(executed, forward_steps().to_vec());
    }

    #[test]
    fn test_dr_failure_compensates_in_reverse() {
        assert_eq!(
            plan(DrFailed),
            enter(StepKind::Provisioning, Direction::Compensation, ProvCompensating)
        );
        let Plan::Execute { on_success, .. } = plan(ProvCompensating) else {
            panic!("expected execute");
        };
        assert_eq!(on_success, AuthCompensating);
        let Plan::Execute { on_success, .. } = plan(AuthCompensating) else {
            panic!("expected execute");
        };
        assert_eq!(on_success, RolledBack);
    }

    #[test]
    fn test_auth_failure_needs_no_compensation() {
        assert_eq!(plan(AuthFailed), Plan::Finish { to: RolledBack });
    }

    #[test]
    fn test_valid_transitions() {
        assert!(is_valid_transition(Pending, AuthInProgress));
        assert!(is_valid_transition(DrInProgress, DrFailed));
        assert!(is_valid_transition(AuthCompensating, AuthCompensating));
        assert!(!is_valid_transition(Pending, Completed));
        assert!(!is_valid_transition(AuthFailed, AuthCompensating));
        assert!(!is_valid_transition(Completed, RolledBack));
        assert!(!is_valid_transition(Pending, Pending));
    }
}

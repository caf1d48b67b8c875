//! Step identifiers shared by the record store and the saga engine.

use serde::{Deserialize, Serialize};

use crate::ParseEnumError;

/// A forward step of the onboarding saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StepKind {
    #[serde(rename = "auth")]
    Auth,
    #[serde(rename = "provisioning")]
    Provisioning,
    #[serde(rename = "dr")]
    DisasterRecovery,
}

impl StepKind {
    /// Forward steps in execution order.
    pub const ORDER: [StepKind; 3] = [
        StepKind::Auth,
        StepKind::Provisioning,
        StepKind::DisasterRecovery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Auth => "auth",
            StepKind::Provisioning => "provisioning",
            StepKind::DisasterRecovery => "dr",
        }
    }

    /// Key under which this step's output is stored in the orchestration context.
    pub fn context_key(&self) -> &'static str {
        match self {
            StepKind::Auth => "tenant",
            StepKind::Provisioning => "resource",
            StepKind::DisasterRecovery => "replication",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDER
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("StepKind", s))
    }
}

/// Status of a single step record row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
    Compensated,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Started => "started",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Compensated => "compensated",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(StepStatus::Started),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            "compensated" => Ok(StepStatus::Compensated),
            other => Err(ParseEnumError::new("StepStatus", other)),
        }
    }
}

/// Whether a step record belongs to the forward path or to compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Compensation,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Compensation => "compensation",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(Direction::Forward),
            "compensation" => Ok(Direction::Compensation),
            other => Err(ParseEnumError::new("Direction", other)),
        }
    }
}

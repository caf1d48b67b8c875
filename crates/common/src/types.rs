use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an orchestration instance.
///
/// Wraps a UUID so orchestration ids cannot be confused with step record
/// ids or claim tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrchestrationId(Uuid);

impl OrchestrationId {
    /// Creates a new random orchestration ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an orchestration ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OrchestrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrchestrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for OrchestrationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<OrchestrationId> for Uuid {
    fn from(id: OrchestrationId) -> Self {
        id.0
    }
}

/// The kind of workflow an orchestration record drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    #[default]
    CustomerOnboarding,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::CustomerOnboarding => "customer_onboarding",
        }
    }
}

impl std::fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowType {
    type Err = crate::ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer_onboarding" => Ok(WorkflowType::CustomerOnboarding),
            other => Err(crate::ParseEnumError::new("WorkflowType", other)),
        }
    }
}

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod record;
pub mod store;

pub use common::{Direction, OrchestrationId, OrchestrationState, StepKind, StepStatus};
pub use error::{Result, StoreError};
pub use memory::InMemoryRecordStore;
pub use postgres::PostgresRecordStore;
pub use query::StaleQuery;
pub use record::{
    Claim, CreateOutcome, OrchestrationRecord, StepRecord, Transition, lease_deadline,
};
pub use store::{RecordStore, RecordStoreExt, apply_transition, validate_transition};

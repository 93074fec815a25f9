//! Queued programmatic content operations.

pub mod manager;

pub use manager::{
    ChangeOrigin, ContentOperationsManager, OperationKind, OperationResult, QUEUE_DRAIN_DELAY_MS,
};

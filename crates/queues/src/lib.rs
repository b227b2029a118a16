//! Capacity scheduler queue model: capacity values, the queue tree, and the
//! staged-change overlay that turns operator edits into an update request.

pub mod capacity;
pub mod error;
pub mod labels;
pub mod request;
pub mod scheduler_info;
pub mod staged;
pub mod tree;

pub use capacity::{CapacityMode, CapacityValue, detect_mode, validate_capacity};
pub use error::{ApplyError, FieldErrors, StageError, StageResult};
pub use labels::{ClusterNode, NodeLabel, NodeLabelCatalog};
pub use request::{ApplyResponse, QueueUpdate, UpdateRequest};
pub use scheduler_info::{QueueMetrics, RuntimeOverlay};
pub use staged::{
    ChangeId, ChangeSet, ChangeType, ConflictInfo, ConflictKind, QueueParams, Severity,
    StagedChanges, UpdateOutcome,
};
pub use tree::{ConfigProperty, QueueNode, QueueState, QueueTree};

pub mod coordinator;
pub mod error;
pub mod progress;
pub mod state_machine;
pub mod types;

pub use coordinator::UploadCoordinator;
pub use error::{CoordinatorError, CoordinatorResult};
pub use progress::ProgressTracker;
pub use state_machine::UploadStateMachine;
pub use types::{
    ChunkProgress, ChunkStatus, ProgressMode, StateEvent, UploadEvent, UploadOptions,
    UploadOutcome, UploadProgress, UploadState,
};

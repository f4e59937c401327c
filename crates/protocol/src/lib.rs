//! Shared types for the Cirrus transfer engine.
//!
//! Holds the metadata API envelope, file descriptors exchanged with the
//! API, per-job state/progress snapshots and the engine's tuning constants.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

pub use envelope::ApiResponse;
pub use messages::{FileDescriptor, FileMetadata, UploadCompletion};
pub use types::{TransferDirection, TransferProgress, TransferState};

//! # Strongbox Core
//!
//! Shared building blocks for the Strongbox backup and disaster-recovery
//! service: configuration, connection parsing, artifact naming, retention,
//! the operation lock, cancellation, subprocess execution and the error
//! taxonomy used by every other crate.

pub mod artifact;
pub mod cancel;
pub mod config;
pub mod connection;
pub mod error;
pub mod lock;
pub mod process;
pub mod retention;
pub mod schedule;
pub mod secret;

pub use artifact::{ArtifactFormat, ArtifactLocation, ArtifactName, BackupArtifact};
pub use cancel::{CancelSignal, CancelTrigger, Interrupted, bounded, cancel_pair};
pub use config::{Deadlines, DumpMode, RetentionConfig, StrongboxConfig, StrongboxConfigBuilder};
pub use connection::{Credentials, DatastoreConnectionInfo, Engine};
pub use error::{
    BackupError, ConfigError, DumpError, RestoreError, RetentionError, ToolError, UploadError,
};
pub use lock::{LockBusy, Operation, OperationGuard, OperationLock};
pub use process::{StreamingChild, ToolCommand, ToolOutput};
pub use retention::{RetentionPolicy, RetentionReport, RetentionScope};
pub use schedule::Schedule;
pub use secret::SecretString;

//! Execution backends for the external checking tools and workflow engine
//!
//! Two interchangeable implementations: a managed container and directly
//! invoked local executables. The validation driver only sees the
//! `ExecutionBackend` trait.

/// Blocking external command execution with logged descriptions
pub mod command;
/// Managed container backend and its lifecycle state machine
pub mod container;
/// Local-executable backend
pub mod local;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::backend::command::CommandError;

/// Parameters of one workflow engine invocation.
pub struct WorkflowParams {
    pub mapping_file: PathBuf,
    pub metadata_json: Option<PathBuf>,
    pub metadata_xlsx: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub shallow: bool,
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend tool itself is missing. User-actionable, never retried.
    #[error("{tool} is not installed or not on the path: {source}")]
    NotInstalled {
        tool: String,
        #[source]
        source: CommandError,
    },
    #[error("could not {action}: {source}")]
    Lifecycle {
        action: String,
        #[source]
        source: CommandError,
    },
    #[error("container {name} did not reach a running state")]
    NotRunning { name: String },
    #[error(transparent)]
    Command(#[from] CommandError),
}

pub trait ExecutionBackend {
    /// Bring the backend to a state where commands can run. Fails fatally
    /// on environment problems, see the lifecycle state machine in
    /// [`container::ContainerBackend`].
    fn ensure_ready(&self) -> Result<(), BackendError>;

    /// Make a host file visible to the backend at a path mirroring its host
    /// path.
    fn stage_input(&self, path: &Path) -> Result<(), BackendError>;

    /// Invoke the workflow engine once. A non-zero exit is returned as an
    /// error; callers are expected to recover partial output.
    fn run_workflow(&self, params: &WorkflowParams) -> Result<(), BackendError>;

    /// Copy the workflow's output directory back to the host, into
    /// `params.output_dir`.
    fn retrieve_output(&self, params: &WorkflowParams) -> Result<(), BackendError>;
}

//! Pre-submission validation and upload of variant datasets.
//!
//! The tool validates a set of variant files against their reference
//! sequences and metadata, records the verdict in a durable per-directory
//! state store, and drives the upload to the submission service, resuming
//! cleanly after interruptions.

/// Execution backends for the checking tools
pub mod backend;
/// Durable per-submission state store
pub mod config;
/// Variant-to-reference mapping resolution
pub mod inputs;
/// Task planning and end-to-end runs
pub mod orchestrator;
/// Submission service client
pub mod remote;
/// Validation report aggregation
pub mod results;
/// Bounded derivatives for shallow validation
pub mod shallow;
/// Resumable submission driver
pub mod submit;
/// User-facing task and executor choices
pub mod task;
/// Validation driver
pub mod validate;
/// Working directory, backups and locking
pub mod workdir;

pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

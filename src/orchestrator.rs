//! Decide which tasks actually run, then run them.
//!
//! One submission directory holds everything for one submission: the
//! inputs, the validation output and the persisted state. The orchestrator
//! takes an exclusive lock on it, loads the state, resolves the requested
//! task into the tasks that must run, and drives them in order.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::backend::ExecutionBackend;
use crate::config::{
    SubmissionConfig, KEY_METADATA_JSON, KEY_READY_FOR_SUBMISSION, KEY_SUBMISSION_COMPLETE,
    KEY_SUBMISSION_ID,
};
use crate::remote::{SubmissionApi, SubmissionStatus};
use crate::submit::SubmissionDriver;
use crate::task::Task;
use crate::validate::{ValidationDriver, ValidationOptions};
use crate::workdir::{DirLock, WorkingDirectory};

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RunOptions {
    pub submission_dir: PathBuf,
    pub task: Task,
    pub metadata_json: Option<PathBuf>,
    pub metadata_xlsx: Option<PathBuf>,
    pub vcf_files: Vec<PathBuf>,
    pub reference_fasta: Option<PathBuf>,
    pub shallow: bool,
}

/// Resolve the requested task into the tasks that must run, consulting the
/// server where the persisted state alone cannot decide.
pub fn plan_tasks(
    requested: Task,
    config: &SubmissionConfig,
    api: &dyn SubmissionApi,
) -> Result<Vec<Task>> {
    if requested == Task::Validate {
        return Ok(vec![Task::Validate]);
    }
    if !config.get_or(KEY_READY_FOR_SUBMISSION, false) {
        info!("No passing validation on record, validating first");
        return Ok(vec![Task::Validate, Task::Submit]);
    }
    if let Some(id) = config.get::<String>(KEY_SUBMISSION_ID) {
        if !config.get_or(KEY_SUBMISSION_COMPLETE, false) {
            let status = api
                .status(&id)
                .with_context(|| format!("checking the state of submission {id}"))?;
            if status == SubmissionStatus::Failed {
                warn!("Submission {id} failed on the server, validating again");
                return Ok(vec![Task::Validate, Task::Submit]);
            }
        }
    }
    Ok(vec![Task::Submit])
}

pub fn run(
    options: &RunOptions,
    backend: &dyn ExecutionBackend,
    api: &dyn SubmissionApi,
) -> Result<()> {
    let workdir = WorkingDirectory::ensure_writable(&options.submission_dir)?;
    let _lock = DirLock::acquire(&workdir.path, LOCK_TIMEOUT)?;
    let mut config = SubmissionConfig::in_directory(&workdir.path, crate::TOOL_VERSION)?;

    let tasks = plan_tasks(options.task, &config, api)?;
    for task in tasks {
        match task {
            Task::Validate => {
                let metadata_json = resolve_metadata(options, &config)?;
                let driver = ValidationDriver::new(
                    backend,
                    &workdir.path,
                    ValidationOptions {
                        shallow: options.shallow,
                        from_spreadsheet: options.metadata_xlsx.is_some(),
                        metadata_xlsx: options.metadata_xlsx.clone(),
                        vcf_files: options.vcf_files.clone(),
                        reference_fasta: options.reference_fasta.clone(),
                    },
                );
                let report = driver.run(&mut config, &metadata_json)?;
                if !report.ready {
                    if options.task == Task::Submit {
                        bail!(
                            "validation did not pass, see {}",
                            workdir.path.join(crate::validate::OUTPUT_DIR_NAME).display()
                        );
                    }
                    info!("Validation found blocking issues, not ready for submission");
                }
            }
            Task::Submit => {
                let outcome = SubmissionDriver::new(api).run(&mut config)?;
                info!("Submission outcome: {outcome:?}");
            }
        }
    }
    Ok(())
}

fn resolve_metadata(options: &RunOptions, config: &SubmissionConfig) -> Result<PathBuf> {
    if let Some(path) = &options.metadata_json {
        return Ok(path.clone());
    }
    if let Some(path) = config.get::<String>(KEY_METADATA_JSON) {
        return Ok(PathBuf::from(path));
    }
    // a conventional location inside the submission directory
    let default = options.submission_dir.join("metadata.json");
    if default.is_file() {
        return Ok(default);
    }
    bail!("no metadata file given and none recorded from a previous run");
}

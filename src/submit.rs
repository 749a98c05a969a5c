//! Drive one submission end to end, resumably.
//!
//! Every step is persisted before the next one starts, so a crash at any
//! point re-enters where it left off: the submission id is on disk before
//! the first byte is uploaded, each uploaded file is recorded before the
//! next one starts, and a completed submission is never re-driven.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde_json::Value;
use thiserror::Error;

use crate::config::{
    ConfigError, SubmissionConfig, KEY_METADATA_JSON, KEY_READY_FOR_SUBMISSION,
    KEY_SUBMISSION_COMPLETE, KEY_SUBMISSION_ID, KEY_SUBMISSION_UPLOAD_URL, KEY_UPLOADED_FILES,
    KEY_VCF_FILES,
};
use crate::remote::retry::RetryPolicy;
use crate::remote::{RemoteError, SubmissionApi, SubmissionStatus};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("the last validation did not pass; validate again before submitting")]
    NotReady,
    #[error("persisted submission state is incomplete: {0}")]
    State(String),
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A previous run already finished this submission; nothing was done.
    AlreadyComplete { submission_id: String },
    Completed { submission_id: String },
}

pub struct SubmissionDriver<'a> {
    api: &'a dyn SubmissionApi,
    upload_retry: RetryPolicy,
}

impl<'a> SubmissionDriver<'a> {
    pub fn new(api: &'a dyn SubmissionApi) -> SubmissionDriver<'a> {
        SubmissionDriver {
            api,
            upload_retry: RetryPolicy::uploads(),
        }
    }

    pub fn with_upload_retry(mut self, upload_retry: RetryPolicy) -> SubmissionDriver<'a> {
        self.upload_retry = upload_retry;
        self
    }

    pub fn run(&self, config: &mut SubmissionConfig) -> Result<SubmitOutcome, SubmitError> {
        if !config.get_or(KEY_READY_FOR_SUBMISSION, false) {
            return Err(SubmitError::NotReady);
        }
        if config.get_or(KEY_SUBMISSION_COMPLETE, false) {
            let submission_id = config
                .get::<String>(KEY_SUBMISSION_ID)
                .unwrap_or_default();
            info!("Submission {submission_id} is already complete");
            return Ok(SubmitOutcome::AlreadyComplete { submission_id });
        }

        let metadata_json: String = config.get(KEY_METADATA_JSON).ok_or_else(|| {
            SubmitError::State("no metadata file recorded by validation".to_string())
        })?;
        // only the variant files travel as data; the metadata document is
        // delivered in the uploaded notification body
        let files: Vec<String> = config.get(KEY_VCF_FILES).ok_or_else(|| {
            SubmitError::State("no variant files recorded by validation".to_string())
        })?;

        config.backup()?;
        let (submission_id, upload_url) = self.open_submission(config)?;

        let mut uploaded: Vec<String> = config.get_or(KEY_UPLOADED_FILES, Vec::new());
        let mut newly_uploaded = 0;
        for file in &files {
            if uploaded.contains(file) {
                info!("Skipping {file}, already uploaded");
                continue;
            }
            self.upload_retry.run("file upload", || {
                self.api.upload_file(&upload_url, Path::new(file))
            })?;
            uploaded.push(file.clone());
            newly_uploaded += 1;
            config.set(KEY_UPLOADED_FILES, &uploaded);
            config.write()?;
        }

        if newly_uploaded == 0 {
            // a previous run may have crashed between the final upload and
            // the uploaded notification; ask the server how far it got
            if self.api.status(&submission_id)? == SubmissionStatus::Uploaded {
                info!("Submission {submission_id} was already marked uploaded");
                config.set(KEY_SUBMISSION_COMPLETE, true);
                config.write()?;
                return Ok(SubmitOutcome::Completed { submission_id });
            }
        }

        let metadata = read_json(Path::new(&metadata_json))?;
        self.api.mark_uploaded(&submission_id, &metadata)?;
        config.set(KEY_SUBMISSION_COMPLETE, true);
        config.write()?;
        info!("Submission {submission_id} completed");
        Ok(SubmitOutcome::Completed { submission_id })
    }

    /// Reuse the persisted submission, or open a new one and persist it
    /// before anything is uploaded.
    fn open_submission(
        &self,
        config: &mut SubmissionConfig,
    ) -> Result<(String, String), SubmitError> {
        if let (Some(id), Some(url)) = (
            config.get::<String>(KEY_SUBMISSION_ID),
            config.get::<String>(KEY_SUBMISSION_UPLOAD_URL),
        ) {
            info!("Resuming submission {id}");
            return Ok((id, url));
        }
        let response = self.api.initiate()?;
        config.set(KEY_SUBMISSION_ID, &response.submission_id);
        config.set(KEY_SUBMISSION_UPLOAD_URL, &response.upload_url);
        config.write()?;
        info!("Opened submission {}", response.submission_id);
        Ok((response.submission_id, response.upload_url))
    }
}

fn read_json(path: &Path) -> Result<Value, SubmitError> {
    let text = fs::read_to_string(path).map_err(|source| SubmitError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| SubmitError::Json {
        path: path.to_path_buf(),
        source,
    })
}

//! Client for the remote submission service.
//!
//! The service hands out a submission id and an upload target, receives
//! the files, and tracks the submission's state from there on. Everything
//! network-facing sits behind the [`SubmissionApi`] trait so the drivers
//! can be exercised against an in-memory double.

/// Webin bearer-token authentication
pub mod auth;
/// Bounded retry with backoff
pub mod retry;

use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};

use log::info;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::remote::auth::WebinAuth;
use crate::remote::retry::RetryPolicy;

pub const DEFAULT_SUBMISSION_WS_URL: &str =
    "https://www.ebi.ac.uk/eva/webservices/submission-ws/v1/";

/// Overrides the service URL, for testing against another deployment.
pub const SUBMISSION_WS_URL_ENV: &str = "SUBMISSION_WS_URL";

#[derive(Debug, Error)]
pub enum RemoteError {
    /// The server does not know the submission id we persisted. Never
    /// papered over; the local state needs human attention.
    #[error("the server does not know submission {id}; \
             check the persisted submission state before re-running")]
    SubmissionNotFound { id: String },
    #[error("submission service error (status {status}): {body}")]
    Service { status: u16, body: String },
    #[error("submission request rejected (status {status}): {body}")]
    Client { status: u16, body: String },
    #[error("could not reach the submission service: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{0}")]
    Auth(String),
    #[error("invalid submission service URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{operation} still failing after retries: {source}")]
    RetriesExhausted {
        operation: String,
        #[source]
        source: Box<RemoteError>,
    },
}

impl RemoteError {
    /// Transient failures are worth retrying; everything else needs the
    /// caller to act.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Service { .. } | RemoteError::Transport(_)
        )
    }
}

/// Server-side state of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    Open,
    Uploaded,
    Failed,
    Other(String),
}

impl SubmissionStatus {
    pub fn parse(text: &str) -> SubmissionStatus {
        match text.trim().to_ascii_uppercase().as_str() {
            "OPEN" => SubmissionStatus::Open,
            "UPLOADED" => SubmissionStatus::Uploaded,
            "FAILED" => SubmissionStatus::Failed,
            other => SubmissionStatus::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStatus::Open => write!(formatter, "OPEN"),
            SubmissionStatus::Uploaded => write!(formatter, "UPLOADED"),
            SubmissionStatus::Failed => write!(formatter, "FAILED"),
            SubmissionStatus::Other(other) => write!(formatter, "{other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitiateResponse {
    #[serde(rename = "submissionId")]
    pub submission_id: String,
    #[serde(rename = "uploadUrl")]
    pub upload_url: String,
}

/// The operations the submission driver needs from the service.
pub trait SubmissionApi {
    /// Open a new submission, returning its id and upload target.
    fn initiate(&self) -> Result<InitiateResponse, RemoteError>;

    /// Upload one file to the submission's upload target.
    fn upload_file(&self, upload_url: &str, path: &Path) -> Result<(), RemoteError>;

    /// Tell the server every file is there, attaching the metadata.
    fn mark_uploaded(&self, id: &str, metadata: &Value) -> Result<(), RemoteError>;

    fn status(&self, id: &str) -> Result<SubmissionStatus, RemoteError>;
}

pub struct SubmissionWsClient {
    base: Url,
    http: reqwest::blocking::Client,
    auth: WebinAuth,
    status_retry: RetryPolicy,
}

impl SubmissionWsClient {
    /// Client for the default deployment, honouring the URL override from
    /// the environment.
    pub fn new(auth: WebinAuth) -> Result<SubmissionWsClient, RemoteError> {
        let url = env::var(SUBMISSION_WS_URL_ENV)
            .unwrap_or_else(|_| DEFAULT_SUBMISSION_WS_URL.to_string());
        SubmissionWsClient::with_base_url(&url, auth)
    }

    pub fn with_base_url(url: &str, auth: WebinAuth) -> Result<SubmissionWsClient, RemoteError> {
        // a trailing slash matters to Url::join
        let normalised = if url.ends_with('/') {
            url.to_string()
        } else {
            format!("{url}/")
        };
        let base = Url::parse(&normalised).map_err(|source| RemoteError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(SubmissionWsClient {
            base,
            http: reqwest::blocking::Client::new(),
            auth,
            status_retry: RetryPolicy::status_checks(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base.join(path).map_err(|source| RemoteError::InvalidUrl {
            url: format!("{}{path}", self.base),
            source,
        })
    }

    fn token(&self) -> Result<String, RemoteError> {
        self.auth.token(&self.http)
    }

    fn check(
        response: reqwest::blocking::Response,
        missing_id: Option<&str>,
    ) -> Result<reqwest::blocking::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            if let Some(id) = missing_id {
                return Err(RemoteError::SubmissionNotFound { id: id.to_string() });
            }
        }
        let body = response.text().unwrap_or_default();
        if status.is_server_error() {
            Err(RemoteError::Service {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(RemoteError::Client {
                status: status.as_u16(),
                body,
            })
        }
    }

    fn status_once(&self, id: &str) -> Result<SubmissionStatus, RemoteError> {
        let response = self
            .http
            .get(self.endpoint(&format!("submission/{id}/status"))?)
            .bearer_auth(self.token()?)
            .send()?;
        let response = SubmissionWsClient::check(response, Some(id))?;
        Ok(SubmissionStatus::parse(&response.text()?))
    }
}

impl SubmissionApi for SubmissionWsClient {
    fn initiate(&self) -> Result<InitiateResponse, RemoteError> {
        info!("Opening a new submission as {}", self.auth.username());
        let response = self
            .http
            .post(self.endpoint("submission/initiate")?)
            .bearer_auth(self.token()?)
            .send()?;
        let response = SubmissionWsClient::check(response, None)?;
        Ok(response.json()?)
    }

    fn upload_file(&self, upload_url: &str, path: &Path) -> Result<(), RemoteError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let target = format!("{}/{name}", upload_url.trim_end_matches('/'));
        info!("Uploading {} to {target}", path.display());
        let file = File::open(path).map_err(|source| RemoteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let response = self
            .http
            .put(target.as_str())
            .bearer_auth(self.token()?)
            .body(file)
            .send()?;
        SubmissionWsClient::check(response, None)?;
        Ok(())
    }

    fn mark_uploaded(&self, id: &str, metadata: &Value) -> Result<(), RemoteError> {
        info!("Marking submission {id} as uploaded");
        let response = self
            .http
            .put(self.endpoint(&format!("submission/{id}/uploaded"))?)
            .bearer_auth(self.token()?)
            .json(metadata)
            .send()?;
        SubmissionWsClient::check(response, Some(id))?;
        Ok(())
    }

    fn status(&self, id: &str) -> Result<SubmissionStatus, RemoteError> {
        self.status_retry
            .run("submission status check", || self.status_once(id))
    }
}

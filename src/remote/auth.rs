//! Webin token authentication.
//!
//! The submission service authenticates with a bearer token issued by the
//! Webin authentication service against an ENA Webin account. The token is
//! fetched lazily and cached for the lifetime of the client.

use std::cell::RefCell;
use std::env;

use log::debug;
use serde_json::json;

use crate::remote::RemoteError;

pub const DEFAULT_AUTH_URL: &str = "https://www.ebi.ac.uk/ena/submit/webin/auth/token";

pub const USERNAME_ENV: &str = "ENA_WEBIN_ACCOUNT";
pub const PASSWORD_ENV: &str = "ENA_WEBIN_PASSWORD";

pub struct WebinAuth {
    auth_url: String,
    username: String,
    password: String,
    token: RefCell<Option<String>>,
}

impl WebinAuth {
    pub fn new(username: String, password: String) -> WebinAuth {
        WebinAuth {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            username,
            password,
            token: RefCell::new(None),
        }
    }

    /// Credentials from the command line, falling back to the environment.
    pub fn from_credentials(
        username: Option<String>,
        password: Option<String>,
    ) -> Result<WebinAuth, RemoteError> {
        let username = username
            .or_else(|| env::var(USERNAME_ENV).ok())
            .ok_or_else(|| {
                RemoteError::Auth(format!(
                    "no Webin username given and {USERNAME_ENV} is not set"
                ))
            })?;
        let password = password
            .or_else(|| env::var(PASSWORD_ENV).ok())
            .ok_or_else(|| {
                RemoteError::Auth(format!(
                    "no Webin password given and {PASSWORD_ENV} is not set"
                ))
            })?;
        Ok(WebinAuth::new(username, password))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The cached bearer token, fetching one on first use.
    pub fn token(&self, http: &reqwest::blocking::Client) -> Result<String, RemoteError> {
        if let Some(token) = self.token.borrow().as_ref() {
            return Ok(token.clone());
        }
        debug!("Requesting Webin token for {}", self.username);
        let response = http
            .post(self.auth_url.as_str())
            .json(&json!({
                "authRealms": ["ENA"],
                "username": self.username,
                "password": self.password,
            }))
            .send()?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(RemoteError::Auth(format!(
                "Webin authentication failed with status {status}: {body}"
            )));
        }
        let token = response.text()?.trim().to_string();
        self.token.borrow_mut().replace(token.clone());
        Ok(token)
    }
}

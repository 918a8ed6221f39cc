//! XMLA over HTTP client.

use std::time::Duration;

use reqwest::StatusCode;

use super::envelope::{execute_envelope, SOAP_ACTION};
use crate::error::{XmlaError, XmlaResult};
use crate::settings::OlapSettings;

/// Per-request timeout
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Attempts for transient failures (connect errors, 502/503/504)
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay before the first retry in milliseconds, doubled after each attempt
const RETRY_DELAY_MS: u64 = 1000;

/// How much of an error body to keep
const ERROR_BODY_CHARS: usize = 500;

/// XMLA endpoint client
#[derive(Clone)]
pub struct XmlaClient {
    http: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
    max_retries: u32,
}

impl std::fmt::Debug for XmlaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlaClient")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl XmlaClient {
    pub fn new(settings: &OlapSettings) -> XmlaResult<Self> {
        let creds = settings.require()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .danger_accept_invalid_certs(!settings.ssl_verify)
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint_url(creds.server),
            username: creds.username.to_string(),
            password: creds.password.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Set the number of attempts for transient failures
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Execute `statement` against `catalog` and return the raw response body.
    pub async fn execute(&self, catalog: &str, statement: &str) -> XmlaResult<Vec<u8>> {
        let envelope = execute_envelope(statement, catalog);
        let mut delay = Duration::from_millis(RETRY_DELAY_MS);
        let mut attempt = 1;

        loop {
            match self.send(&envelope).await {
                Err(err) if attempt < self.max_retries && is_transient(&err) => {
                    tracing::warn!(
                        attempt,
                        max = self.max_retries,
                        error = %err,
                        "XMLA request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn send(&self, envelope: &str) -> XmlaResult<Vec<u8>> {
        let started = std::time::Instant::now();
        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", SOAP_ACTION)
            .body(envelope.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        tracing::debug!(
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "XMLA response"
        );

        // SOAP faults come back as 500 with a fault body; the parser reports those
        let fault = status == StatusCode::INTERNAL_SERVER_ERROR && looks_like_fault(&body);
        if status.is_success() || fault {
            return Ok(body.to_vec());
        }

        Err(XmlaError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body)
                .chars()
                .take(ERROR_BODY_CHARS)
                .collect(),
        })
    }
}

/// `https://host` becomes `https://host/xmla/default`; a URL that already
/// names the endpoint is kept.
pub fn endpoint_url(server: &str) -> String {
    let server = server.trim().trim_end_matches('/');
    if server.to_ascii_lowercase().ends_with("/xmla/default") {
        server.to_string()
    } else {
        format!("{server}/xmla/default")
    }
}

fn is_transient(err: &XmlaError) -> bool {
    match err {
        XmlaError::Request(e) => e.is_connect() || e.is_timeout(),
        XmlaError::Status { status, .. } => matches!(*status, 502..=504),
        XmlaError::MissingSetting(_) => false,
    }
}

fn looks_like_fault(body: &[u8]) -> bool {
    let head = &body[..body.len().min(4096)];
    String::from_utf8_lossy(head).contains("Fault")
}

// src/transport/client.rs
//! Blocking HTTP client for the collector endpoints
//!
//! One reusable connection handle guarded by a mutex. Calls block with short
//! timeouts (5s connect, 10s total) and report failure through the returned
//! [`HttpResponse`] instead of raising; a failed call leaves retry policy to
//! the caller.

use crate::transport::payload::{CaptureBatch, DecideRequest};
use crate::utils::errors::{Result, SdkError};
use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one POST to the collector
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// True iff the HTTP status was 2xx
    pub success: bool,

    /// HTTP status code, 0 when the request never completed
    pub status: u16,

    /// Raw response body
    pub body: String,
}

impl HttpResponse {
    fn failed() -> Self {
        Self::default()
    }
}

/// Seam between the delivery pipelines and the network.
///
/// Production uses [`HttpTransport`]; tests substitute recording stubs.
pub trait Transport: Send + Sync {
    /// POST a batch of event documents to `/capture/`
    fn post_capture(&self, events: &[Value]) -> HttpResponse;

    /// POST a flag decision request to `/decide/`
    fn post_decide(&self, distinct_id: &str, properties: Option<&Value>) -> HttpResponse;

    /// POST a session replay batch to `/capture/`
    fn post_replay(&self, records: &[Value]) -> HttpResponse;
}

/// Production transport over a single reusable blocking client
pub struct HttpTransport {
    base_url: String,
    api_key: String,
    client: Mutex<reqwest::blocking::Client>,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SdkError::InitFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: Mutex::new(client),
        })
    }

    fn perform_post(&self, endpoint: &str, body: &Value) -> HttpResponse {
        let url = format!("{}{}", self.base_url, endpoint);

        // The handle is not reentrant; hold the lock for the whole call so at
        // most one request is in flight process-wide.
        let client = self.client.lock();

        let result = client.post(&url).json(body).send();
        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().unwrap_or_default();
                let success = (200..300).contains(&status);
                if !success {
                    error!("POST {} returned HTTP {}", endpoint, status);
                }
                HttpResponse {
                    success,
                    status,
                    body,
                }
            }
            Err(e) => {
                error!("POST {} failed: {}", endpoint, e);
                HttpResponse::failed()
            }
        }
    }
}

impl Transport for HttpTransport {
    fn post_capture(&self, events: &[Value]) -> HttpResponse {
        if events.is_empty() {
            return HttpResponse::failed();
        }

        let envelope = CaptureBatch {
            api_key: &self.api_key,
            batch: events,
        };
        let body = match serde_json::to_value(&envelope) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to serialize capture batch: {}", e);
                return HttpResponse::failed();
            }
        };

        debug!("Sending capture batch of {} events", events.len());
        self.perform_post("/capture/", &body)
    }

    fn post_decide(&self, distinct_id: &str, properties: Option<&Value>) -> HttpResponse {
        let request = DecideRequest {
            api_key: &self.api_key,
            distinct_id,
            properties,
        };
        let body = match serde_json::to_value(&request) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to serialize decide request: {}", e);
                return HttpResponse::failed();
            }
        };

        debug!("Fetching feature flags for distinct_id {}", distinct_id);
        self.perform_post("/decide/", &body)
    }

    fn post_replay(&self, records: &[Value]) -> HttpResponse {
        if records.is_empty() {
            return HttpResponse::failed();
        }

        let envelope = CaptureBatch {
            api_key: &self.api_key,
            batch: records,
        };
        let body = match serde_json::to_value(&envelope) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to serialize replay batch: {}", e);
                return HttpResponse::failed();
            }
        };

        debug!("Sending replay batch of {} records", records.len());
        self.perform_post("/capture/", &body)
    }
}

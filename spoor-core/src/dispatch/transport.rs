//! HTTP transport for the tracking endpoint
//!
//! Executes encoded requests against the collection server. Connection
//! handling, TLS and timeouts live here; retry policy does not. The
//! retry unit is the next dispatch cycle, so every send is a single
//! attempt.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use std::time::Duration;

use crate::config::TrackerConfig;
use crate::error::{Error, Result};

/// Endpoint path appended to the configured base URL.
const TRACKING_ENDPOINT: &str = "piwik.php";

/// An encoded request ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerRequest {
    /// One key-value encoded hit, sent as a GET query
    Single { query: String },
    /// Several hits in one JSON body, POSTed to the same endpoint
    Bulk { body: serde_json::Value },
}

/// Executes an encoded request against the collection endpoint.
///
/// Implementations report `Ok(())` only when the server accepted the
/// request; any error leaves the batch queued for the next cycle.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &TrackerRequest) -> Result<()>;
}

/// Response document returned by bulk endpoints
#[derive(Debug, Deserialize)]
struct BulkResponse {
    status: String,
    #[serde(default)]
    tracked: u64,
    #[serde(default)]
    invalid: u64,
}

/// Default transport over reqwest
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Build a transport from the tracker configuration.
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        let endpoint = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            TRACKING_ENDPOINT
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &TrackerRequest) -> Result<()> {
        match request {
            TrackerRequest::Single { query } => {
                let url = format!("{}{}", self.endpoint, query);
                let response = self
                    .http_client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(Error::Transport(format!("server returned {}", status)))
                }
            }
            TrackerRequest::Bulk { body } => {
                let response = self
                    .http_client
                    .post(&self.endpoint)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

                let status = response.status();
                if !status.is_success() {
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "unknown".to_string());
                    return Err(Error::Transport(format!(
                        "server returned {}: {}",
                        status, error_text
                    )));
                }

                let body_text = response
                    .text()
                    .await
                    .map_err(|e| Error::Transport(format!("failed to read response: {}", e)))?;

                match serde_json::from_str::<BulkResponse>(&body_text) {
                    Ok(parsed) if parsed.status == "success" => {
                        if parsed.invalid > 0 {
                            tracing::warn!(
                                tracked = parsed.tracked,
                                invalid = parsed.invalid,
                                "Server rejected part of a bulk request"
                            );
                        }
                        Ok(())
                    }
                    Ok(parsed) => Err(Error::Transport(format!(
                        "bulk request not accepted: status {}",
                        parsed.status
                    ))),
                    // Unexpected response shape: treated like a failed
                    // request, the batch stays queued
                    Err(e) => Err(Error::Transport(format!(
                        "malformed bulk response: {}",
                        e
                    ))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_built_from_base_url() {
        let config = TrackerConfig::new("https://stats.example.com/", "7");
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.endpoint, "https://stats.example.com/piwik.php");
    }

    #[test]
    fn test_bulk_response_parsing() {
        let parsed: BulkResponse =
            serde_json::from_str(r#"{"status":"success","tracked":20,"invalid":0}"#).unwrap();
        assert_eq!(parsed.status, "success");
        assert_eq!(parsed.tracked, 20);

        let malformed = serde_json::from_str::<BulkResponse>("<html>oops</html>");
        assert!(malformed.is_err());
    }
}

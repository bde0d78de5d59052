//! HTTP client used by the CLI subcommands to talk to a running daemon.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::activity::{StatusSnapshot, UnitStatus};
use crate::api::envelope::{ApiErrorResponse, ApiResponse};
use crate::api::handlers::{ActionRequest, ScaleRequest};
use crate::engine::{TriggerMode, TriggerResult};
use crate::types::{ActionOutcome, ActivityEvent};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The daemon answered with an error envelope.
    #[error("{code} ({status}): {message}")]
    Api {
        status: reqwest::StatusCode,
        code: String,
        message: String,
    },

    #[error("Server returned status {0}")]
    ServerError(reqwest::StatusCode),
}

/// Client for the daemon's `/api/v1` surface.
#[derive(Clone)]
pub struct SentinelClient {
    http: reqwest::Client,
    base_url: String,
}

impl SentinelClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn unwrap_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
        let status = resp.status();
        if status.is_success() {
            let body: ApiResponse<T> = resp.json().await?;
            return Ok(body.data);
        }
        match resp.json::<ApiErrorResponse>().await {
            Ok(body) => Err(ClientError::Api {
                status,
                code: body.error.code,
                message: body.error.message,
            }),
            Err(_) => Err(ClientError::ServerError(status)),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self.http.get(self.url(path)).send().await?;
        Self::unwrap_envelope(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        Self::unwrap_envelope(resp).await
    }

    pub async fn status(&self) -> Result<StatusSnapshot, ClientError> {
        self.get("/status").await
    }

    pub async fn unit(&self, name: &str) -> Result<UnitStatus, ClientError> {
        self.get(&format!("/units/{name}")).await
    }

    /// Newest `limit` events, oldest first.
    pub async fn activity(&self, limit: usize) -> Result<Vec<ActivityEvent>, ClientError> {
        self.get(&format!("/activity?limit={limit}")).await
    }

    pub async fn trigger(&self, unit: &str, mode: TriggerMode, escalate: bool) -> Result<TriggerResult, ClientError> {
        self.post(&format!("/units/{unit}/action"), &ActionRequest { mode, escalate })
            .await
    }

    pub async fn scale(&self, service: &str, replicas: u64) -> Result<ActionOutcome, ClientError> {
        self.post(&format!("/services/{service}/scale"), &ScaleRequest { replicas })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = SentinelClient::new("http://127.0.0.1:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8080");
        assert_eq!(client.url("/status"), "http://127.0.0.1:8080/api/v1/status");
    }
}

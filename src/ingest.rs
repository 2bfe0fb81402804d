//! Stateless HTTP surface to the ingest backend.
//!
//! No retry policy lives here — the event and blob pipelines each apply
//! their own backoff around these calls.

use crate::error::IngestError;
use crate::event::Event;
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const HEADER_API_KEY: &str = "x-api-key";

/// Thin, cloneable HTTP client wired to one ingest backend base URL.
#[derive(Clone)]
pub struct IngestClient {
    inner: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct PresignRequest<'a> {
    #[serde(rename = "dataId")]
    data_id: &'a str,
    #[serde(rename = "traceId")]
    trace_id: &'a str,
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Metadata>,
}

/// Response from `POST /api/v1/presign`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignResponse {
    pub presigned_url: String,
    pub data_path: Option<String>,
}

#[derive(Serialize)]
struct IngestRequest<'a> {
    events: &'a [Event],
}

#[derive(Debug, Deserialize)]
struct IngestResponse {
    #[allow(dead_code)]
    success: bool,
}

impl IngestClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let inner = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("failed to build ingest HTTP client");

        Self {
            inner,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// `POST {baseUrl}/api/v1/presign`
    #[tracing::instrument(name = "ingest.presign", skip(self, metadata))]
    pub async fn presign(
        &self,
        data_id: &str,
        trace_id: &str,
        key: &str,
        metadata: Option<&Metadata>,
    ) -> Result<PresignResponse, IngestError> {
        let resp = self
            .inner
            .post(self.url("/api/v1/presign"))
            .header(HEADER_API_KEY, &self.api_key)
            .json(&PresignRequest {
                data_id,
                trace_id,
                key,
                metadata,
            })
            .send()
            .await?;

        check_status(resp.status()).map_err(|status| IngestError::Status {
            status,
            body: String::new(),
        })?;

        resp.json::<PresignResponse>()
            .await
            .map_err(IngestError::from)
    }

    /// `POST {baseUrl}/api/v1/ingest`
    #[tracing::instrument(name = "ingest.ingest", skip(self, events), fields(count = events.len()))]
    pub async fn ingest(&self, events: &[Event]) -> Result<(), IngestError> {
        let resp = self
            .inner
            .post(self.url("/api/v1/ingest"))
            .header(HEADER_API_KEY, &self.api_key)
            .json(&IngestRequest { events })
            .send()
            .await?;

        check_status(resp.status()).map_err(|status| IngestError::Status {
            status,
            body: String::new(),
        })?;

        let _: IngestResponse = resp.json().await.map_err(IngestError::from)?;
        Ok(())
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), u16> {
    if status.is_success() {
        Ok(())
    } else {
        Err(status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn presign_sends_api_key_header_and_parses_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/presign"))
            .and(header("x-api-key", "K"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "presignedUrl": "https://store.example.com/upload",
                "dataPath": "blobs/d1",
            })))
            .mount(&server)
            .await;

        let client = IngestClient::new(server.uri(), "K");
        let resp = client.presign("d1", "p-trace", "in", None).await.unwrap();
        assert_eq!(resp.presigned_url, "https://store.example.com/upload");
    }

    #[tokio::test]
    async fn ingest_reports_non_2xx_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/ingest"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = IngestClient::new(server.uri(), "K");
        let err = client.ingest(&[]).await.unwrap_err();
        assert!(matches!(err, IngestError::Status { status: 503, .. }));
    }
}

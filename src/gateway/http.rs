//! [`Gateway`] over HTTP with `reqwest`.

use super::{sse, DownloadedArtifact, EventStream, Gateway, SessionInfo, SubmitBody, SubmitResponse};
use crate::config::{endpoints, GatewayConfig};
use crate::error::GatewayError;
use crate::model::{ConversionMode, ResultArtifact};
use async_trait::async_trait;
use futures::TryFutureExt;
use reqwest::header::{HeaderName, ACCEPT, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// The production gateway.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

#[derive(Deserialize)]
struct AuthorizationUrl {
    url: String,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| GatewayError::Connectivity {
                reason: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    async fn send(&self, request: RequestBuilder, timeout: Duration) -> Result<Response, GatewayError> {
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let timeout = self.config.request_timeout();
        let response = self.send(self.client.get(self.config.endpoint(path)), timeout).await?;
        decode(response, timeout).await
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn get_session(&self) -> Result<SessionInfo, GatewayError> {
        self.get_json(endpoints::IDENTITY).await
    }

    async fn authorization_url(&self) -> Result<String, GatewayError> {
        let payload: AuthorizationUrl = self.get_json(endpoints::AUTH_BEGIN).await?;
        Ok(payload.url)
    }

    async fn logout(&self) -> Result<(), GatewayError> {
        let request = self.client.get(self.config.endpoint(endpoints::AUTH_END));
        self.send(request, self.config.request_timeout()).await?;
        Ok(())
    }

    async fn submit(
        &self,
        mode: ConversionMode,
        source_reference: &str,
        credential: Option<&str>,
    ) -> Result<SubmitResponse, GatewayError> {
        let path = match mode {
            ConversionMode::Pdf => endpoints::SUBMIT_PDF,
            ConversionMode::Ocr => endpoints::SUBMIT_OCR,
        };
        info!("Submitting {} conversion for {}", mode, source_reference);

        let timeout = self.config.submit_timeout();
        let request = self
            .client
            .post(self.config.endpoint(path))
            .json(&SubmitBody::new(mode, source_reference, credential));
        let response = self.send(request, timeout).await?;
        let outcome: SubmitResponse = decode(response, timeout).await?;
        debug!(
            "Submission settled: success={} download_url={:?}",
            outcome.success, outcome.download_url
        );
        Ok(outcome)
    }

    async fn cancel(&self) -> Result<(), GatewayError> {
        let request = self.client.post(self.config.endpoint(endpoints::CANCEL));
        self.send(request, self.config.request_timeout()).await?;
        Ok(())
    }

    fn progress_events(&self) -> EventStream {
        let request = self
            .client
            .get(self.config.endpoint(endpoints::PROGRESS))
            .header(ACCEPT, "text/event-stream");

        let connect = async move {
            let response = request.send().await.map_err(|e| GatewayError::Connectivity {
                reason: e.to_string(),
            })?;
            if !response.status().is_success() {
                return Err(rejection(response).await);
            }
            debug!("Progress channel connected");
            Ok(sse::data_events(response.bytes_stream()))
        };
        Box::pin(connect.try_flatten_stream())
    }

    async fn download(&self, artifact: &ResultArtifact) -> Result<DownloadedArtifact, GatewayError> {
        let timeout = self.config.submit_timeout();
        let response = self.send(self.client.get(&artifact.locator), timeout).await?;

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let content_type = header(CONTENT_TYPE);
        let file_name = header(CONTENT_DISPOSITION)
            .as_deref()
            .and_then(content_disposition_filename);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        info!("Downloaded {} bytes from {}", bytes.len(), artifact.locator);

        Ok(DownloadedArtifact {
            bytes: bytes.to_vec(),
            file_name,
            content_type,
        })
    }
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout {
            secs: timeout.as_secs(),
        }
    } else {
        GatewayError::Connectivity {
            reason: e.to_string(),
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response, timeout: Duration) -> Result<T, GatewayError> {
    let body = response.bytes().await.map_err(|e| transport_error(e, timeout))?;
    serde_json::from_slice(&body).map_err(|e| GatewayError::InvalidResponse {
        detail: e.to_string(),
    })
}

/// Turn a non-2xx response into [`GatewayError::RemoteRejected`].
async fn rejection(response: Response) -> GatewayError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    GatewayError::RemoteRejected {
        status,
        message: error_message_from_body(&body)
            .unwrap_or_else(|| format!("HTTP error! status: {status}")),
    }
}

/// Pull a human-readable message out of an error body.
///
/// The backend answers with `{"error": "..."}` from its own handlers and
/// `{"detail": "..."}` from framework-raised HTTP errors.
pub(crate) fn error_message_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error", "detail"].iter().find_map(|key| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_owned)
    })
}

/// `attachment; filename="your_ebook.pdf"` → `your_ebook.pdf`.
pub(crate) fn content_disposition_filename(value: &str) -> Option<String> {
    value.split(';').map(str::trim).find_map(|param| {
        let (key, raw) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let name = raw.trim().trim_matches('"');
        // Keep only the last path component; never trust a server-supplied path.
        let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
        (!name.is_empty()).then(|| name.to_string())
    })
}

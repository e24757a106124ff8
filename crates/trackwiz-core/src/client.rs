//! HTTP implementation of [`TrackingService`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::config::ServiceConfig;
use crate::error::{RequestError, Result, UploadError};
use crate::points::PointSelection;
use crate::service::{
    Ack, Endpoint, FrameListing, ModelSize, SelectPointsRequest, SessionId, StartTrackingRequest,
    StatusReport, TrackingService, UploadReceipt,
};

/// Failure body returned by the service: `{"error": "..."}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for the tracking service REST API.
#[derive(Debug, Clone)]
pub struct HttpTrackingService {
    client: Client,
    base_url: String,
}

impl HttpTrackingService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| transport(None, &err))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Self::new(config.base_url.clone(), config.request_timeout())
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: Endpoint, session: Option<&SessionId>) -> String {
        format!("{}{}", self.base_url, endpoint.path(session))
    }

    /// Make a URL returned by the service absolute.
    #[must_use]
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{url}", self.base_url)
        } else {
            format!("{}/{url}", self.base_url)
        }
    }

    /// Send a request and turn non-2xx replies into [`RequestError::Status`].
    async fn send(&self, endpoint: Endpoint, request: RequestBuilder) -> Result<Response> {
        trace!(endpoint = endpoint.name(), "Sending request");
        let response = request
            .send()
            .await
            .map_err(|err| transport(Some(endpoint), &err))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = failure_message(response).await;
        debug!(endpoint = endpoint.name(), status = status.as_u16(), %message, "Request failed");
        Err(RequestError::Status {
            endpoint: endpoint.name().to_string(),
            status: status.as_u16(),
            message,
        }
        .into())
    }

    async fn json<T: DeserializeOwned>(&self, endpoint: Endpoint, request: RequestBuilder) -> Result<T> {
        let response = self.send(endpoint, request).await?;
        response
            .json()
            .await
            .map_err(|err| transport(Some(endpoint), &err))
    }
}

fn transport(endpoint: Option<Endpoint>, err: &reqwest::Error) -> crate::Error {
    RequestError::Transport {
        endpoint: endpoint.map_or("client", Endpoint::name).to_string(),
        message: err.to_string(),
    }
    .into()
}

async fn failure_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&body) {
        return parsed.error;
    }
    let body = body.trim();
    if body.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body.chars().take(200).collect()
    }
}

#[async_trait]
impl TrackingService for HttpTrackingService {
    async fn upload(&self, video: &Path) -> Result<UploadReceipt> {
        let bytes = tokio::fs::read(video).await?;
        let filename = video
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        let form = reqwest::multipart::Form::new().part(
            "video",
            reqwest::multipart::Part::bytes(bytes).file_name(filename),
        );

        let request = self
            .client
            .post(self.url(Endpoint::Upload, None))
            .multipart(form);
        match self.json(Endpoint::Upload, request).await {
            Err(crate::Error::Request(RequestError::Status { status, message, .. })) => {
                Err(UploadError::Rejected(format!("HTTP {status}: {message}")).into())
            }
            other => other,
        }
    }

    async fn extract_frames(&self, session: &SessionId) -> Result<Ack> {
        let request = self
            .client
            .post(self.url(Endpoint::ExtractFrames, Some(session)));
        self.json(Endpoint::ExtractFrames, request).await
    }

    async fn status(&self, session: &SessionId) -> Result<StatusReport> {
        let request = self.client.get(self.url(Endpoint::Status, Some(session)));
        self.json(Endpoint::Status, request).await
    }

    async fn frames(&self, session: &SessionId) -> Result<FrameListing> {
        let request = self.client.get(self.url(Endpoint::Frames, Some(session)));
        let mut listing: FrameListing = self.json(Endpoint::Frames, request).await?;
        for frame in &mut listing.preview_frames {
            frame.url = self.resolve_url(&frame.url);
        }
        Ok(listing)
    }

    async fn select_points(&self, session: &SessionId, selection: &PointSelection) -> Result<Ack> {
        let request = self
            .client
            .post(self.url(Endpoint::SelectPoints, Some(session)))
            .json(&SelectPointsRequest { points: selection });
        self.json(Endpoint::SelectPoints, request).await
    }

    async fn start_tracking(&self, session: &SessionId, model: ModelSize) -> Result<Ack> {
        let request = self
            .client
            .post(self.url(Endpoint::StartTracking, Some(session)))
            .json(&StartTrackingRequest { model_size: model });
        self.json(Endpoint::StartTracking, request).await
    }

    async fn download_results(&self, session: &SessionId) -> Result<Vec<u8>> {
        let request = self
            .client
            .get(self.url(Endpoint::DownloadResults, Some(session)));
        let response = self.send(Endpoint::DownloadResults, request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| transport(Some(Endpoint::DownloadResults), &err))?;
        Ok(bytes.to_vec())
    }

    async fn cleanup(&self, session: &SessionId) -> Result<()> {
        let request = self.client.post(self.url(Endpoint::Cleanup, Some(session)));
        self.send(Endpoint::Cleanup, request).await.map(|_| ())
    }
}

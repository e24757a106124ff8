//! Contract with the remote tracking service.
//!
//! [`TrackingService`] is the seam between the wizard and the backend. The
//! HTTP implementation lives in [`crate::client`]; an in-memory scripted one
//! lives in [`crate::fake`].
//!
//! # Endpoints
//!
//! | Method | Path | Body | Reply |
//! |--------|------|------|-------|
//! | POST | `/upload` | multipart `video` | [`UploadReceipt`] |
//! | POST | `/extract_frames/{id}` | - | [`Ack`] |
//! | GET  | `/status/{id}` | - | [`StatusReport`] |
//! | GET  | `/get_frames/{id}` | - | [`FrameListing`] |
//! | POST | `/select_points/{id}` | `{points: {coords, labels}}` | [`Ack`] |
//! | POST | `/start_tracking/{id}` | `{model_size}` | [`Ack`] |
//! | GET  | `/download_results/{id}` | - | archive bytes |
//! | POST | `/cleanup/{id}` | - | ignored |

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, UploadError};
use crate::points::PointSelection;

/// Video containers the service accepts.
pub const ALLOWED_VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "wmv", "mkv"];

/// Opaque session identifier issued by the service on upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Service endpoint, used to label requests in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Upload,
    ExtractFrames,
    Status,
    Frames,
    SelectPoints,
    StartTracking,
    DownloadResults,
    Cleanup,
}

impl Endpoint {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::ExtractFrames => "extract_frames",
            Self::Status => "status",
            Self::Frames => "get_frames",
            Self::SelectPoints => "select_points",
            Self::StartTracking => "start_tracking",
            Self::DownloadResults => "download_results",
            Self::Cleanup => "cleanup",
        }
    }

    /// Request path relative to the service base URL. The session id is
    /// percent-encoded as a single path segment.
    #[must_use]
    pub fn path(self, session: Option<&SessionId>) -> String {
        match (self, session) {
            (Self::Upload, _) | (_, None) => format!("/{}", self.name()),
            (_, Some(id)) => format!("/{}/{}", self.name(), encode_segment(id.as_str())),
        }
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_segment(raw: &str) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reply to a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub session_id: SessionId,
    pub filename: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Generic acknowledgement carrying a human-readable message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: String,
}

/// Classified job status.
///
/// The service reports several intermediate states (`uploaded`,
/// `extracting`, `points_selected`, `tracking`, ...). All of them are
/// [`JobStatus::Pending`] from the wizard's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    FramesReady,
    Completed,
    Error,
}

impl JobStatus {
    #[must_use]
    pub fn from_wire(status: &str) -> Self {
        match status {
            "frames_ready" => Self::FramesReady,
            "completed" => Self::Completed,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }

    /// Whether observing this status ends a poll loop.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Reply from `/status/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Raw status string as sent by the service.
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_results: Option<TrackingResults>,
}

impl StatusReport {
    /// Intermediate report with the given raw status.
    #[must_use]
    pub fn pending(status: impl Into<String>, progress: f64, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            progress,
            message: message.into(),
            frame_count: None,
            error: None,
            tracking_results: None,
        }
    }

    #[must_use]
    pub fn frames_ready(frame_count: u64) -> Self {
        Self {
            frame_count: Some(frame_count),
            ..Self::pending("frames_ready", 100.0, format!("extracted {frame_count} frames"))
        }
    }

    #[must_use]
    pub fn completed(results: TrackingResults) -> Self {
        Self {
            tracking_results: Some(results),
            ..Self::pending("completed", 100.0, "tracking complete")
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            message: format!("error: {error}"),
            error: Some(error),
            ..Self::pending("error", 0.0, "")
        }
    }

    #[must_use]
    pub fn kind(&self) -> JobStatus {
        JobStatus::from_wire(&self.status)
    }

    /// Progress clamped to a whole percentage.
    #[must_use]
    pub fn progress_percent(&self) -> u8 {
        if self.progress.is_finite() {
            self.progress.clamp(0.0, 100.0).round() as u8
        } else {
            0
        }
    }

    /// Failure text for an `error` report, falling back to the message.
    #[must_use]
    pub fn failure_message(&self) -> String {
        self.error
            .clone()
            .filter(|e| !e.is_empty())
            .or_else(|| (!self.message.is_empty()).then(|| self.message.clone()))
            .unwrap_or_else(|| "the service reported an error".to_string())
    }
}

/// Summary attached to a `completed` status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingResults {
    pub total_frames: u64,
    pub processed_frames: u64,
    pub model_size: String,
    pub processing_time: String,
    /// Object id → number of frames the object was found in. The service
    /// can report negative counts for very short clips; those read as 0.
    #[serde(deserialize_with = "non_negative_counts")]
    pub objects_detected: BTreeMap<String, u64>,
    pub demo_mode: bool,
}

fn non_negative_counts<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, i64>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(id, count)| (id, u64::try_from(count).unwrap_or(0)))
        .collect())
}

/// One previewable frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewFrame {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub filename: String,
    pub url: String,
}

/// Reply from `/get_frames/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameListing {
    pub total_frames: u64,
    #[serde(default)]
    pub preview_frames: Vec<PreviewFrame>,
}

impl FrameListing {
    /// The frame shown for point selection.
    #[must_use]
    pub fn first_preview(&self) -> Option<&PreviewFrame> {
        self.preview_frames.first()
    }
}

/// SAM2 checkpoint size requested for tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSize {
    #[default]
    Tiny,
    Small,
    BasePlus,
    Large,
}

impl ModelSize {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Small => "small",
            Self::BasePlus => "base_plus",
            Self::Large => "large",
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelSize {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(Self::Tiny),
            "small" => Ok(Self::Small),
            "base_plus" | "base-plus" | "b+" => Ok(Self::BasePlus),
            "large" => Ok(Self::Large),
            _ => Err(format!(
                "unknown model size: {s}. Expected one of: tiny, small, base_plus, large"
            )),
        }
    }
}

/// Request body for `/select_points/{id}`.
#[derive(Debug, Serialize)]
pub struct SelectPointsRequest<'a> {
    pub points: &'a PointSelection,
}

/// Request body for `/start_tracking/{id}`.
#[derive(Debug, Serialize)]
pub struct StartTrackingRequest {
    pub model_size: ModelSize,
}

/// Operations offered by the remote tracking service.
#[async_trait]
pub trait TrackingService: Send + Sync {
    /// Upload a video and open a session.
    async fn upload(&self, video: &Path) -> Result<UploadReceipt>;

    /// Start frame extraction for the session.
    async fn extract_frames(&self, session: &SessionId) -> Result<Ack>;

    /// Fetch the current job status.
    async fn status(&self, session: &SessionId) -> Result<StatusReport>;

    /// List extracted frames.
    async fn frames(&self, session: &SessionId) -> Result<FrameListing>;

    /// Submit the annotation points.
    async fn select_points(&self, session: &SessionId, selection: &PointSelection) -> Result<Ack>;

    /// Start tracking with the given model.
    async fn start_tracking(&self, session: &SessionId, model: ModelSize) -> Result<Ack>;

    /// Download the results archive.
    async fn download_results(&self, session: &SessionId) -> Result<Vec<u8>>;

    /// Release server-side resources for the session.
    async fn cleanup(&self, session: &SessionId) -> Result<()>;
}

/// Check a video file before uploading it. Returns its size in bytes.
pub fn validate_video(path: &Path, max_bytes: u64) -> std::result::Result<u64, UploadError> {
    let display = path.display().to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !ALLOWED_VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        return Err(UploadError::UnsupportedFormat(display));
    }

    let metadata = std::fs::metadata(path).map_err(|_| UploadError::FileNotFound(display.clone()))?;
    if !metadata.is_file() {
        return Err(UploadError::FileNotFound(display));
    }
    let size = metadata.len();
    if size > max_bytes {
        return Err(UploadError::TooLarge {
            size,
            limit: max_bytes,
        });
    }
    Ok(size)
}

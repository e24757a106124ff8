//! In-memory [`TrackingService`] that replays scripted replies and records
//! every call.
//!
//! Used by the controller tests and by `tw run --dry-run`.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{RequestError, Result, UploadError};
use crate::points::PointSelection;
use crate::service::{
    Ack, Endpoint, FrameListing, ModelSize, PreviewFrame, SessionId, StatusReport,
    TrackingResults, TrackingService, UploadReceipt,
};

/// A recorded request.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Upload(PathBuf),
    ExtractFrames(SessionId),
    Status(SessionId),
    Frames(SessionId),
    SelectPoints(SessionId, PointSelection),
    StartTracking(SessionId, ModelSize),
    DownloadResults(SessionId),
    Cleanup(SessionId),
}

impl Call {
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Self::Upload(_) => Endpoint::Upload,
            Self::ExtractFrames(_) => Endpoint::ExtractFrames,
            Self::Status(_) => Endpoint::Status,
            Self::Frames(_) => Endpoint::Frames,
            Self::SelectPoints(..) => Endpoint::SelectPoints,
            Self::StartTracking(..) => Endpoint::StartTracking,
            Self::DownloadResults(_) => Endpoint::DownloadResults,
            Self::Cleanup(_) => Endpoint::Cleanup,
        }
    }
}

#[derive(Debug, Clone)]
enum Failure {
    Status(u16, String),
    Transport(String),
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    statuses: VecDeque<StatusReport>,
    failures: HashMap<Endpoint, VecDeque<Failure>>,
    last_job: Option<Endpoint>,
}

/// Scripted tracking service.
///
/// Status replies come from a queue filled with [`Self::push_status`]. When
/// the queue is empty the reply is a pending `processing` report, unless
/// auto-advance is on, in which case the job last started finishes
/// immediately.
#[derive(Debug)]
pub struct ScriptedService {
    session_id: SessionId,
    frame_count: u64,
    archive: Vec<u8>,
    auto_advance: bool,
    latency: Option<Duration>,
    state: Mutex<State>,
}

impl ScriptedService {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::new(session_id),
            frame_count: 120,
            archive: b"PK\x03\x04trackwiz".to_vec(),
            auto_advance: false,
            latency: None,
            state: Mutex::new(State::default()),
        }
    }

    /// A service whose jobs finish on the first status request.
    #[must_use]
    pub fn demo() -> Self {
        Self::new("demo-session").with_auto_advance(true)
    }

    #[must_use]
    pub fn with_auto_advance(mut self, on: bool) -> Self {
        self.auto_advance = on;
        self
    }

    #[must_use]
    pub fn with_frame_count(mut self, frame_count: u64) -> Self {
        self.frame_count = frame_count;
        self
    }

    /// Delay every status and cleanup reply by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_status(&self, report: StatusReport) {
        self.lock().statuses.push_back(report);
    }

    /// Make the next request to `endpoint` fail with an HTTP status.
    pub fn fail_next(&self, endpoint: Endpoint, status: u16, message: impl Into<String>) {
        self.lock()
            .failures
            .entry(endpoint)
            .or_default()
            .push_back(Failure::Status(status, message.into()));
    }

    /// Make the next request to `endpoint` fail before reaching the service.
    pub fn drop_next(&self, endpoint: Endpoint, message: impl Into<String>) {
        self.lock()
            .failures
            .entry(endpoint)
            .or_default()
            .push_back(Failure::Transport(message.into()));
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of requests made to `endpoint`.
    #[must_use]
    pub fn count(&self, endpoint: Endpoint) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.endpoint() == endpoint)
            .count()
    }

    /// Points submitted by the most recent `select_points` call.
    #[must_use]
    pub fn last_selection(&self) -> Option<PointSelection> {
        self.lock().calls.iter().rev().find_map(|call| match call {
            Call::SelectPoints(_, selection) => Some(selection.clone()),
            _ => None,
        })
    }

    #[must_use]
    pub fn listing(&self) -> FrameListing {
        let previews = self.frame_count.min(20);
        FrameListing {
            total_frames: self.frame_count,
            preview_frames: (0..previews)
                .map(|index| {
                    let filename = format!("{index:05}.jpg");
                    PreviewFrame {
                        index: index as usize,
                        url: format!("/frames/{}/{filename}", self.session_id),
                        filename,
                    }
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn demo_results(&self, model: ModelSize) -> TrackingResults {
        TrackingResults {
            total_frames: self.frame_count,
            processed_frames: self.frame_count,
            model_size: model.to_string(),
            processing_time: "0:00:00".to_string(),
            objects_detected: [("0".to_string(), self.frame_count)].into(),
            demo_mode: true,
        }
    }

    /// Record the call and apply any scripted failure for it.
    fn enter(&self, call: Call) -> Result<()> {
        let endpoint = call.endpoint();
        let mut state = self.lock();
        state.calls.push(call);
        let failure = state
            .failures
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front);
        drop(state);

        match failure {
            None => Ok(()),
            Some(Failure::Status(status, message)) if endpoint == Endpoint::Upload => {
                Err(UploadError::Rejected(format!("HTTP {status}: {message}")).into())
            }
            Some(Failure::Status(status, message)) => Err(RequestError::Status {
                endpoint: endpoint.name().to_string(),
                status,
                message,
            }
            .into()),
            Some(Failure::Transport(message)) => Err(RequestError::Transport {
                endpoint: endpoint.name().to_string(),
                message,
            }
            .into()),
        }
    }

    fn started(&self, job: Endpoint) {
        self.lock().last_job = Some(job);
    }
}

#[async_trait]
impl TrackingService for ScriptedService {
    async fn upload(&self, video: &Path) -> Result<UploadReceipt> {
        self.enter(Call::Upload(video.to_path_buf()))?;
        let filename = video
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(UploadReceipt {
            session_id: self.session_id.clone(),
            filename,
            message: Some("Video uploaded successfully".to_string()),
        })
    }

    async fn extract_frames(&self, session: &SessionId) -> Result<Ack> {
        self.enter(Call::ExtractFrames(session.clone()))?;
        self.started(Endpoint::ExtractFrames);
        Ok(Ack {
            message: "Frame extraction started".to_string(),
        })
    }

    async fn status(&self, session: &SessionId) -> Result<StatusReport> {
        self.enter(Call::Status(session.clone()))?;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if let Some(report) = state.statuses.pop_front() {
            return Ok(report);
        }
        if !self.auto_advance {
            return Ok(StatusReport::pending("processing", 0.0, "working"));
        }
        let report = match state.last_job.take() {
            Some(Endpoint::ExtractFrames) => StatusReport::frames_ready(self.frame_count),
            Some(Endpoint::StartTracking) => {
                let model = state
                    .calls
                    .iter()
                    .rev()
                    .find_map(|call| match call {
                        Call::StartTracking(_, model) => Some(*model),
                        _ => None,
                    })
                    .unwrap_or_default();
                StatusReport::completed(self.demo_results(model))
            }
            _ => StatusReport::pending("uploaded", 0.0, "waiting"),
        };
        Ok(report)
    }

    async fn frames(&self, session: &SessionId) -> Result<FrameListing> {
        self.enter(Call::Frames(session.clone()))?;
        Ok(self.listing())
    }

    async fn select_points(&self, session: &SessionId, selection: &PointSelection) -> Result<Ack> {
        self.enter(Call::SelectPoints(session.clone(), selection.clone()))?;
        Ok(Ack {
            message: format!("Selected {} points", selection.coords.len()),
        })
    }

    async fn start_tracking(&self, session: &SessionId, model: ModelSize) -> Result<Ack> {
        self.enter(Call::StartTracking(session.clone(), model))?;
        self.started(Endpoint::StartTracking);
        Ok(Ack {
            message: "Tracking started".to_string(),
        })
    }

    async fn download_results(&self, session: &SessionId) -> Result<Vec<u8>> {
        self.enter(Call::DownloadResults(session.clone()))?;
        Ok(self.archive.clone())
    }

    async fn cleanup(&self, session: &SessionId) -> Result<()> {
        self.enter(Call::Cleanup(session.clone()))?;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

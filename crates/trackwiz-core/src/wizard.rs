//! Step state machine for one tracking session.
//!
//! [`Wizard`] owns the state of a session (current step, session id, points,
//! latest progress, frame listing, results, failure) and enforces the
//! transition rules. It performs no I/O; [`crate::controller`] drives it from
//! service replies and poll events.
//!
//! ```text
//! Idle(1) ──upload──▶ FramesPending(2) ──frames_ready──▶ PointSelection(3)
//!                                                           │ confirm
//!                                                           ▼
//!                      Completed(5) ◀──completed── Tracking(4)
//!
//! any ──request failure / job error / poll timeout──▶ failed (absorbing)
//! any ──reset──▶ Idle
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, ValidationError};
use crate::points::{PointId, PointKind, PointSet};
use crate::service::{FrameListing, SessionId, StatusReport, TrackingResults};

/// Wizard step. Numbered 1 through 5 in workflow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Idle,
    FramesPending,
    PointSelection,
    Tracking,
    Completed,
}

impl Step {
    pub const ALL: [Self; 5] = [
        Self::Idle,
        Self::FramesPending,
        Self::PointSelection,
        Self::Tracking,
        Self::Completed,
    ];

    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Idle => 1,
            Self::FramesPending => 2,
            Self::PointSelection => 3,
            Self::Tracking => 4,
            Self::Completed => 5,
        }
    }

    /// Short label used by step indicators.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "upload",
            Self::FramesPending => "frames",
            Self::PointSelection => "points",
            Self::Tracking => "tracking",
            Self::Completed => "results",
        }
    }

    /// Steps during which a server-side job may be running.
    #[must_use]
    pub const fn has_job(self) -> bool {
        matches!(self, Self::FramesPending | Self::Tracking)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.label())
    }
}

/// What ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Upload,
    Request,
    Poll,
    PollTimeout,
}

impl FailureKind {
    /// Map a library error to a failure kind; `None` for local errors.
    #[must_use]
    pub fn of(error: &Error) -> Option<Self> {
        if !error.is_fatal_to_session() {
            return None;
        }
        Some(match error {
            Error::Upload(_) => Self::Upload,
            Error::Poll(_) => Self::Poll,
            Error::PollTimeout(_) => Self::PollTimeout,
            _ => Self::Request,
        })
    }
}

/// The error condition of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WizardFailure {
    /// Step the wizard was at when it failed.
    pub step: Step,
    pub kind: FailureKind,
    pub message: String,
}

/// Latest progress observed from the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub percent: u8,
    pub message: String,
}

impl From<&StatusReport> for JobProgress {
    fn from(report: &StatusReport) -> Self {
        Self {
            percent: report.progress_percent(),
            message: report.message.clone(),
        }
    }
}

/// State of one wizard instance.
#[derive(Debug, Clone)]
pub struct Wizard {
    step: Step,
    session: Option<SessionId>,
    points: PointSet,
    job_started: bool,
    progress: Option<JobProgress>,
    frames: Option<FrameListing>,
    results: Option<TrackingResults>,
    failure: Option<WizardFailure>,
}

impl Default for Wizard {
    fn default() -> Self {
        Self::new()
    }
}

impl Wizard {
    #[must_use]
    pub fn new() -> Self {
        Self {
            step: Step::Idle,
            session: None,
            points: PointSet::new(),
            job_started: false,
            progress: None,
            frames: None,
            results: None,
            failure: None,
        }
    }

    #[must_use]
    pub fn step(&self) -> Step {
        self.step
    }

    #[must_use]
    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn points(&self) -> &PointSet {
        &self.points
    }

    /// Whether the job for the current step has been started.
    #[must_use]
    pub fn job_started(&self) -> bool {
        self.job_started
    }

    #[must_use]
    pub fn progress(&self) -> Option<&JobProgress> {
        self.progress.as_ref()
    }

    #[must_use]
    pub fn frames(&self) -> Option<&FrameListing> {
        self.frames.as_ref()
    }

    #[must_use]
    pub fn results(&self) -> Option<&TrackingResults> {
        self.results.as_ref()
    }

    #[must_use]
    pub fn failure(&self) -> Option<&WizardFailure> {
        self.failure.as_ref()
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Reject `operation` unless the wizard is healthy and at `expected`.
    pub fn ensure_step(&self, operation: &'static str, expected: Step) -> Result<(), ValidationError> {
        if self.is_failed() {
            return Err(ValidationError::SessionFailed);
        }
        if self.step != expected {
            return Err(ValidationError::InvalidStep {
                operation,
                step: self.step,
            });
        }
        Ok(())
    }

    /// Like [`Self::ensure_step`], additionally requiring that no job was
    /// started for this step yet.
    pub fn ensure_job_startable(
        &self,
        operation: &'static str,
        expected: Step,
    ) -> Result<&SessionId, ValidationError> {
        self.ensure_step(operation, expected)?;
        if self.job_started {
            return Err(ValidationError::InvalidStep {
                operation,
                step: self.step,
            });
        }
        self.require_session()
    }

    pub fn require_session(&self) -> Result<&SessionId, ValidationError> {
        self.session.as_ref().ok_or(ValidationError::NoSession)
    }

    fn ensure_editable(&self) -> Result<(), ValidationError> {
        if self.is_failed() {
            return Err(ValidationError::SessionFailed);
        }
        self.require_session().map(|_| ())
    }

    // -- transitions ---------------------------------------------------------

    /// `Idle → FramesPending` after a successful upload.
    pub fn session_created(&mut self, session: SessionId) -> Result<(), ValidationError> {
        self.ensure_step("upload", Step::Idle)?;
        self.session = Some(session);
        self.points.clear();
        self.advance(Step::FramesPending);
        Ok(())
    }

    /// The service accepted a job for the current step.
    pub fn mark_job_started(&mut self) {
        self.job_started = true;
        self.progress = None;
    }

    pub fn record_progress(&mut self, report: &StatusReport) {
        self.progress = Some(JobProgress::from(report));
    }

    /// `FramesPending → PointSelection` once frames are listed.
    pub fn frames_ready(&mut self, listing: FrameListing) -> Result<(), ValidationError> {
        self.ensure_step("frames_ready", Step::FramesPending)?;
        self.frames = Some(listing);
        self.advance(Step::PointSelection);
        Ok(())
    }

    /// `PointSelection → Tracking` after the service accepted the points.
    pub fn points_confirmed(&mut self) -> Result<(), ValidationError> {
        self.ensure_step("confirm_points", Step::PointSelection)?;
        self.advance(Step::Tracking);
        Ok(())
    }

    /// `Tracking → Completed`.
    pub fn tracking_completed(
        &mut self,
        results: Option<TrackingResults>,
    ) -> Result<(), ValidationError> {
        self.ensure_step("tracking_completed", Step::Tracking)?;
        self.results = results;
        self.advance(Step::Completed);
        Ok(())
    }

    /// Enter the error condition. The first failure wins.
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> &WizardFailure {
        let step = self.step;
        self.failure.get_or_insert_with(|| WizardFailure {
            step,
            kind,
            message: message.into(),
        })
    }

    /// Return to `Idle`, discarding everything. Yields the session that
    /// was open, if any, so the caller can release it.
    pub fn reset(&mut self) -> Option<SessionId> {
        let session = self.session.take();
        *self = Self::new();
        session
    }

    fn advance(&mut self, to: Step) {
        debug_assert!(to > self.step, "steps only move forward");
        self.step = to;
        self.job_started = false;
        self.progress = None;
    }

    // -- points --------------------------------------------------------------

    pub fn add_point(&mut self, x: u32, y: u32, kind: PointKind) -> Result<PointId, ValidationError> {
        self.ensure_editable()?;
        Ok(self.points.add(x, y, kind))
    }

    /// Remove a point. Unknown ids are ignored; returns whether one was removed.
    pub fn remove_point(&mut self, id: PointId) -> Result<bool, ValidationError> {
        self.ensure_editable()?;
        Ok(self.points.remove(id).is_some())
    }

    pub fn clear_points(&mut self) -> Result<(), ValidationError> {
        self.ensure_editable()?;
        self.points.clear();
        Ok(())
    }
}

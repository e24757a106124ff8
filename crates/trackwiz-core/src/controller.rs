//! Session wizard controller.
//!
//! [`WizardController`] drives a [`Wizard`] against a [`TrackingService`]:
//! it issues the service requests for each step, runs the status poller
//! while a job is in progress, and queues [`WizardEvent`]s for the
//! presentation layer.
//!
//! Every error is returned to the caller and also queued as an error
//! [`Notice`]. Service failures, job errors and poll timeouts additionally
//! put the wizard into its failed condition; local validation errors leave
//! it untouched.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, PollError, Result, ValidationError};
use crate::points::{PointId, PointKind};
use crate::poll::{Generation, PollEvent, PollOutcome, PollPolicy, Poller};
use crate::service::{JobStatus, ModelSize, SessionId, StatusReport, TrackingService, validate_video};
use crate::view::WizardView;
use crate::wizard::{FailureKind, JobProgress, Step, Wizard, WizardFailure};

/// Longest [`WizardController::reset`] waits for the service to release a
/// session.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Severity of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Transient message for the user. Dismissed after `ttl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub ttl: Duration,
}

/// Something the presentation layer should reflect.
#[derive(Debug, Clone, PartialEq)]
pub enum WizardEvent {
    StepChanged { from: Step, to: Step },
    Progress(JobProgress),
    Notice(Notice),
    Failed(WizardFailure),
}

/// How a poll event was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollApplied {
    /// Stale generation or failed session; state untouched.
    Discarded,
    /// Progress recorded; still waiting.
    Progress,
    /// The job finished and the wizard moved to this step.
    Advanced(Step),
}

/// Tunables for a controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerOptions {
    pub max_upload_bytes: u64,
    pub notice_ttl: Duration,
    pub poll: PollPolicy,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ControllerOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_upload_bytes: config.service.max_upload_bytes,
            notice_ttl: config.notices.display(),
            poll: PollPolicy::from(&config.polling),
        }
    }
}

/// One wizard session bound to a tracking service.
pub struct WizardController<S>
where
    S: TrackingService + 'static,
{
    service: Arc<S>,
    wizard: Wizard,
    poller: Poller<S>,
    options: ControllerOptions,
    events: VecDeque<WizardEvent>,
}

impl<S> WizardController<S>
where
    S: TrackingService + 'static,
{
    #[must_use]
    pub fn new(service: Arc<S>, options: ControllerOptions) -> Self {
        let poller = Poller::new(Arc::clone(&service), options.poll.clone());
        Self {
            service,
            wizard: Wizard::new(),
            poller,
            options,
            events: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn wizard(&self) -> &Wizard {
        &self.wizard
    }

    #[must_use]
    pub fn step(&self) -> Step {
        self.wizard.step()
    }

    #[must_use]
    pub fn session(&self) -> Option<&SessionId> {
        self.wizard.session()
    }

    #[must_use]
    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    #[must_use]
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    #[must_use]
    pub fn view(&self) -> WizardView {
        WizardView::from_wizard(&self.wizard)
    }

    /// Generation of the most recently started poll loop.
    #[must_use]
    pub fn poll_generation(&self) -> Generation {
        self.poller.current()
    }

    #[must_use]
    pub fn active_poll_loops(&self) -> usize {
        self.poller.active_loops()
    }

    /// Drain queued events in the order they occurred.
    pub fn take_events(&mut self) -> Vec<WizardEvent> {
        self.events.drain(..).collect()
    }

    // ========================================================================
    // Step operations
    // ========================================================================

    /// Validate and upload a video, opening a session.
    pub async fn upload(&mut self, video: &Path) -> Result<SessionId> {
        let checked = self.wizard.ensure_step("upload", Step::Idle);
        self.check(checked)?;
        let size = validate_video(video, self.options.max_upload_bytes)
            .map_err(|err| self.fail(err.into()))?;

        info!(path = %video.display(), size, "Uploading video");
        let receipt = self
            .service
            .upload(video)
            .await
            .map_err(|err| self.fail(err))?;

        let session = receipt.session_id.clone();
        let created = self.wizard.session_created(session.clone());
        self.check(created)?;
        info!(session_id = %session, filename = %receipt.filename, "Session created");
        self.step_changed(Step::Idle);
        self.notice(
            NoticeLevel::Success,
            format!("Uploaded {}", receipt.filename),
        );
        Ok(session)
    }

    /// Ask the service to extract frames and start polling for them.
    pub async fn extract_frames(&mut self) -> Result<Generation> {
        let startable = self
            .wizard
            .ensure_job_startable("extract_frames", Step::FramesPending)
            .cloned();
        let session = self.check(startable)?;

        let ack = self
            .service
            .extract_frames(&session)
            .await
            .map_err(|err| self.fail(err))?;
        Ok(self.job_started(session, ack.message, "Extracting frames"))
    }

    /// Submit the collected points and move on to tracking.
    pub async fn confirm_points(&mut self) -> Result<()> {
        let checked = self
            .wizard
            .ensure_step("confirm_points", Step::PointSelection)
            .and_then(|()| self.wizard.require_session().cloned());
        let session = self.check(checked)?;
        if self.wizard.points().is_empty() {
            return Err(self.reject(ValidationError::NoPoints));
        }

        let selection = self.wizard.points().selection();
        info!(
            session_id = %session,
            points = selection.coords.len(),
            "Submitting points"
        );
        self.service
            .select_points(&session, &selection)
            .await
            .map_err(|err| self.fail(err))?;

        let confirmed = self.wizard.points_confirmed();
        self.check(confirmed)?;
        self.step_changed(Step::PointSelection);
        self.notice(
            NoticeLevel::Success,
            format!("Confirmed {} points", selection.coords.len()),
        );
        Ok(())
    }

    /// Start tracking with `model` and begin polling for completion.
    pub async fn start_tracking(&mut self, model: ModelSize) -> Result<Generation> {
        let startable = self
            .wizard
            .ensure_job_startable("start_tracking", Step::Tracking)
            .cloned();
        let session = self.check(startable)?;

        info!(session_id = %session, model = %model, "Starting tracking");
        let ack = self
            .service
            .start_tracking(&session, model)
            .await
            .map_err(|err| self.fail(err))?;
        Ok(self.job_started(session, ack.message, "Tracking started"))
    }

    /// Download the results archive to `dest`. Returns the bytes written.
    pub async fn download_results(&mut self, dest: &Path) -> Result<u64> {
        let checked = self
            .wizard
            .ensure_step("download_results", Step::Completed)
            .and_then(|()| self.wizard.require_session().cloned());
        let session = self.check(checked)?;

        let archive = self
            .service
            .download_results(&session)
            .await
            .map_err(|err| self.fail(err))?;
        tokio::fs::write(dest, &archive)
            .await
            .map_err(|err| self.fail(err.into()))?;

        info!(
            session_id = %session,
            dest = %dest.display(),
            bytes = archive.len(),
            "Results downloaded"
        );
        self.notice(
            NoticeLevel::Success,
            format!("Saved results to {}", dest.display()),
        );
        Ok(archive.len() as u64)
    }

    /// Return to `Idle`, discarding session and points. An open session is
    /// cleaned up on the service; a failed or slow cleanup is only logged.
    /// The wait is bounded by [`CLEANUP_TIMEOUT`].
    pub async fn reset(&mut self) {
        self.poller.cancel();
        let from = self.wizard.step();
        if let Some(session) = self.wizard.reset() {
            match tokio::time::timeout(CLEANUP_TIMEOUT, self.service.cleanup(&session)).await {
                Ok(Ok(())) => debug!(session_id = %session, "Session cleaned up"),
                Ok(Err(err)) => warn!(session_id = %session, error = %err, "Cleanup failed"),
                Err(_) => warn!(
                    session_id = %session,
                    timeout_ms = CLEANUP_TIMEOUT.as_millis() as u64,
                    "Cleanup timed out"
                ),
            }
        }
        if from != Step::Idle {
            self.events.push_back(WizardEvent::StepChanged {
                from,
                to: Step::Idle,
            });
        }
        self.notice(NoticeLevel::Info, "Session reset");
    }

    // ========================================================================
    // Points
    // ========================================================================

    pub fn add_point(&mut self, x: u32, y: u32, kind: PointKind) -> Result<PointId> {
        let added = self.wizard.add_point(x, y, kind);
        let id = self.check(added)?;
        debug!(point = %id, x, y, kind = %kind, "Point added");
        Ok(id)
    }

    /// Remove a point; unknown ids are ignored.
    pub fn remove_point(&mut self, id: PointId) -> Result<bool> {
        let removed = self.wizard.remove_point(id);
        self.check(removed)
    }

    pub fn clear_points(&mut self) -> Result<()> {
        let cleared = self.wizard.clear_points();
        self.check(cleared)
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Wait for the next poll event and apply it. `None` when no poll loop
    /// is running and nothing is buffered.
    pub async fn next_event(&mut self) -> Option<Result<PollApplied>> {
        let event = self.poller.next_event().await?;
        Some(self.apply(event).await)
    }

    /// Apply poll events until the running job finishes. Returns the step
    /// the wizard advanced to.
    pub async fn wait_for_job(&mut self) -> Result<Step> {
        loop {
            match self.next_event().await {
                Some(Ok(PollApplied::Advanced(step))) => return Ok(step),
                Some(Ok(PollApplied::Progress | PollApplied::Discarded)) => {}
                Some(Err(err)) => return Err(err),
                None => {
                    let err = if self.wizard.is_failed() {
                        ValidationError::SessionFailed
                    } else {
                        ValidationError::InvalidStep {
                            operation: "wait_for_job",
                            step: self.wizard.step(),
                        }
                    };
                    return Err(self.reject(err));
                }
            }
        }
    }

    async fn apply(&mut self, event: PollEvent) -> Result<PollApplied> {
        if !self.poller.is_current(event.generation) || self.wizard.is_failed() {
            debug!(
                generation = event.generation.0,
                current = self.poller.current().0,
                "Discarding stale poll event"
            );
            return Ok(PollApplied::Discarded);
        }

        let report = match event.outcome {
            PollOutcome::Progress(report) => {
                self.wizard.record_progress(&report);
                let progress = JobProgress::from(&report);
                self.events.push_back(WizardEvent::Progress(progress));
                return Ok(PollApplied::Progress);
            }
            PollOutcome::TimedOut(timeout) => return Err(self.fail(timeout.into())),
            PollOutcome::Finished(report) => report,
        };

        self.poller.cancel();
        self.wizard.record_progress(&report);
        match (report.kind(), self.wizard.step()) {
            (JobStatus::Error, _) => Err(self.fail(
                PollError {
                    message: report.failure_message(),
                }
                .into(),
            )),
            (JobStatus::FramesReady, Step::FramesPending) => self.on_frames_ready(&report).await,
            (JobStatus::Completed, Step::Tracking) => self.on_tracking_completed(report),
            (_, step) => Err(self.fail(
                PollError {
                    message: format!("unexpected status {:?} at step {step}", report.status),
                }
                .into(),
            )),
        }
    }

    async fn on_frames_ready(&mut self, report: &StatusReport) -> Result<PollApplied> {
        let session = self.session_for_transition()?;
        let listing = self
            .service
            .frames(&session)
            .await
            .map_err(|err| self.fail(err))?;
        let total = listing.total_frames.max(report.frame_count.unwrap_or(0));

        let advanced = self.wizard.frames_ready(listing);
        self.check(advanced)?;
        info!(session_id = %session, frames = total, "Frames ready");
        self.step_changed(Step::FramesPending);
        self.notice(NoticeLevel::Success, format!("Extracted {total} frames"));
        Ok(PollApplied::Advanced(Step::PointSelection))
    }

    fn on_tracking_completed(&mut self, report: StatusReport) -> Result<PollApplied> {
        let session = self.session_for_transition()?;
        let completed = self.wizard.tracking_completed(report.tracking_results);
        self.check(completed)?;
        info!(session_id = %session, "Tracking completed");
        self.step_changed(Step::Tracking);
        self.notice(NoticeLevel::Success, "Tracking completed");
        Ok(PollApplied::Advanced(Step::Completed))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn session_for_transition(&mut self) -> Result<SessionId> {
        let session = self.wizard.require_session().cloned();
        self.check(session)
    }

    fn job_started(&mut self, session: SessionId, message: String, fallback: &str) -> Generation {
        self.wizard.mark_job_started();
        let generation = self.poller.start(session.clone());
        info!(
            session_id = %session,
            step = self.wizard.step().number(),
            generation = generation.0,
            "Job started"
        );
        let message = if message.is_empty() {
            fallback.to_string()
        } else {
            message
        };
        self.notice(NoticeLevel::Info, message);
        generation
    }

    fn check<T>(&mut self, result: std::result::Result<T, ValidationError>) -> Result<T> {
        result.map_err(|err| self.reject(err))
    }

    /// Report a local validation error without touching state.
    fn reject(&mut self, err: ValidationError) -> Error {
        debug!(step = self.wizard.step().number(), error = %err, "Operation rejected");
        self.notice(NoticeLevel::Error, err.to_string());
        err.into()
    }

    /// Report an error; session-fatal errors stop polling and fail the wizard.
    fn fail(&mut self, err: Error) -> Error {
        if let Some(kind) = FailureKind::of(&err) {
            self.poller.cancel();
            let first = !self.wizard.is_failed();
            let failure = self.wizard.fail(kind, err.to_string()).clone();
            if first {
                error!(
                    session_id = ?self.wizard.session().map(SessionId::as_str),
                    step = failure.step.number(),
                    error = %err,
                    "Session failed"
                );
                self.events.push_back(WizardEvent::Failed(failure));
            }
        } else {
            warn!(step = self.wizard.step().number(), error = %err, "Operation failed");
        }
        self.notice(NoticeLevel::Error, err.to_string());
        err
    }

    fn step_changed(&mut self, from: Step) {
        let to = self.wizard.step();
        debug!(from = from.number(), to = to.number(), "Step changed");
        self.events.push_back(WizardEvent::StepChanged { from, to });
    }

    fn notice(&mut self, level: NoticeLevel, message: impl Into<String>) {
        self.events.push_back(WizardEvent::Notice(Notice {
            level,
            message: message.into(),
            ttl: self.options.notice_ttl,
        }));
    }
}

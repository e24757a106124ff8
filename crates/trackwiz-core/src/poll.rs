//! Status polling for running jobs.
//!
//! A [`Poller`] owns at most one background loop. Each loop requests
//! `/status/{id}` on a timer and forwards what it sees as [`PollEvent`]s on a
//! channel. Starting a loop aborts the previous one and bumps the
//! [`Generation`]; events carry the generation of the loop that produced
//! them, so a response that was already in flight when its loop was
//! cancelled can be recognized and dropped by the receiver.
//!
//! A loop ends on its own when it observes a terminal status
//! (`frames_ready`, `completed`, `error`) or when its [`PollPolicy`] is
//! exhausted. Failed status requests are logged and count as attempts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::config::PollingConfig;
use crate::error::PollTimeout;
use crate::service::{SessionId, StatusReport, TrackingService};

/// Timing and bounds for a poll loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay before the first status request.
    pub interval: Duration,
    /// Upper bound for the delay between requests.
    pub max_interval: Duration,
    /// Growth factor applied after each request (1.0 = fixed interval).
    pub backoff_factor: f64,
    /// Give up after this many status requests.
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed since the loop started.
    pub max_duration: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for PollPolicy {
    fn from(config: &PollingConfig) -> Self {
        Self::new(
            Duration::from_millis(config.interval_ms),
            Duration::from_millis(config.max_interval_ms()),
            config.backoff_factor,
            (config.max_attempts > 0).then_some(config.max_attempts),
            (config.max_duration_secs > 0).then(|| Duration::from_secs(config.max_duration_secs)),
        )
    }
}

impl PollPolicy {
    #[must_use]
    pub fn new(
        interval: Duration,
        max_interval: Duration,
        backoff_factor: f64,
        max_attempts: Option<u32>,
        max_duration: Option<Duration>,
    ) -> Self {
        Self {
            interval,
            max_interval: max_interval.max(interval),
            backoff_factor: if backoff_factor.is_finite() {
                backoff_factor.max(1.0)
            } else {
                1.0
            },
            max_attempts,
            max_duration,
        }
    }

    /// Fixed interval, no bounds.
    #[must_use]
    pub fn fixed(interval: Duration) -> Self {
        Self::new(interval, interval, 1.0, None, None)
    }

    /// Delay before the request numbered `attempt` (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial_ms = self.interval.as_millis() as f64;
        let max_ms = self.max_interval.as_millis() as f64;
        // 2^31 is far past any sane cap
        let exp = attempt.min(31) as i32;
        let delay_ms = (initial_ms * self.backoff_factor.powi(exp)).min(max_ms);
        Duration::from_millis(delay_ms as u64)
    }

    /// Whether a loop that made `attempts` requests over `elapsed` must stop.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32, elapsed: Duration) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
            || self.max_duration.is_some_and(|max| elapsed >= max)
    }
}

/// Identifies one poll loop. Strictly increasing per [`Poller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

/// What a poll loop observed.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// Non-terminal status; the loop keeps going.
    Progress(StatusReport),
    /// Terminal status; the loop has stopped.
    Finished(StatusReport),
    /// Policy exhausted; the loop has stopped.
    TimedOut(PollTimeout),
}

impl PollOutcome {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

/// A tagged observation sent by a poll loop.
#[derive(Debug, Clone)]
pub struct PollEvent {
    pub generation: Generation,
    pub outcome: PollOutcome,
}

struct ActiveLoop {
    generation: Generation,
    session: SessionId,
    handle: JoinHandle<()>,
}

/// Owner of the single status poll loop.
pub struct Poller<S> {
    service: Arc<S>,
    policy: PollPolicy,
    generation: u64,
    active: Option<ActiveLoop>,
    tx: UnboundedSender<PollEvent>,
    rx: UnboundedReceiver<PollEvent>,
}

impl<S> Poller<S>
where
    S: TrackingService + 'static,
{
    #[must_use]
    pub fn new(service: Arc<S>, policy: PollPolicy) -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            service,
            policy,
            generation: 0,
            active: None,
            tx,
            rx,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Start polling `session`, cancelling any loop already running.
    pub fn start(&mut self, session: SessionId) -> Generation {
        self.cancel();
        self.generation += 1;
        let generation = Generation(self.generation);

        debug!(session_id = %session, generation = generation.0, "Starting status poll loop");
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.service),
            session.clone(),
            self.policy.clone(),
            generation,
            self.tx.clone(),
        ));
        self.active = Some(ActiveLoop {
            generation,
            session,
            handle,
        });
        generation
    }

    /// Stop the active loop, if any. A request already in flight may still
    /// deliver an event; it will carry the old generation.
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.abort();
            debug!(
                session_id = %active.session,
                generation = active.generation.0,
                "Cancelled status poll loop"
            );
        }
    }

    /// Generation of the most recently started loop.
    #[must_use]
    pub fn current(&self) -> Generation {
        Generation(self.generation)
    }

    /// Whether `generation` belongs to a loop that has not been cancelled.
    #[must_use]
    pub fn is_current(&self, generation: Generation) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.generation == generation)
    }

    /// Number of loops owned by this poller that are still running (0 or 1).
    #[must_use]
    pub fn active_loops(&self) -> usize {
        usize::from(
            self.active
                .as_ref()
                .is_some_and(|active| !active.handle.is_finished()),
        )
    }

    /// Receive the next event. Returns `None` once no loop is running and
    /// every buffered event has been delivered.
    pub async fn next_event(&mut self) -> Option<PollEvent> {
        if let Ok(event) = self.rx.try_recv() {
            return Some(event);
        }
        if self.active_loops() == 0 {
            // the loop may have sent its last event after the first check
            return self.rx.try_recv().ok();
        }
        // a live loop always ends by sending a terminal event
        self.rx.recv().await
    }
}

impl<S> Drop for Poller<S> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.abort();
        }
    }
}

async fn run_loop<S>(
    service: Arc<S>,
    session: SessionId,
    policy: PollPolicy,
    generation: Generation,
    tx: UnboundedSender<PollEvent>,
) where
    S: TrackingService + ?Sized,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        sleep(policy.delay_for_attempt(attempts)).await;
        attempts = attempts.saturating_add(1);

        match service.status(&session).await {
            Ok(report) => {
                debug!(
                    session_id = %session,
                    generation = generation.0,
                    status = %report.status,
                    progress = report.progress_percent(),
                    "Status poll"
                );
                let outcome = if report.kind().is_terminal() {
                    PollOutcome::Finished(report)
                } else {
                    PollOutcome::Progress(report)
                };
                let stop = outcome.is_terminal();
                if tx.send(PollEvent { generation, outcome }).is_err() || stop {
                    return;
                }
            }
            Err(err) => {
                warn!(
                    session_id = %session,
                    generation = generation.0,
                    attempt = attempts,
                    error = %err,
                    "Status request failed; polling continues"
                );
            }
        }

        let elapsed = started.elapsed();
        if policy.is_exhausted(attempts, elapsed) {
            warn!(
                session_id = %session,
                generation = generation.0,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "Status polling exhausted its bound"
            );
            let _ = tx.send(PollEvent {
                generation,
                outcome: PollOutcome::TimedOut(PollTimeout {
                    attempts,
                    elapsed_ms: elapsed.as_millis() as u64,
                }),
            });
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::ScriptedService;
    use crate::service::Endpoint;

    fn policy(ms: u64) -> PollPolicy {
        PollPolicy::fixed(Duration::from_millis(ms))
    }

    #[test]
    fn fixed_policy_keeps_interval() {
        let policy = policy(2000);
        for attempt in [0, 1, 5, 40] {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_millis(2000));
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = PollPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(700),
            2.0,
            None,
            None,
        );
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(700));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_millis(700));
    }

    #[test]
    fn policy_normalizes_inputs() {
        let policy = PollPolicy::new(
            Duration::from_millis(500),
            Duration::from_millis(10),
            0.2,
            None,
            None,
        );
        assert_eq!(policy.max_interval, Duration::from_millis(500));
        assert!((policy.backoff_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn exhaustion_by_attempts_or_time() {
        let policy = PollPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(10),
            1.0,
            Some(3),
            Some(Duration::from_secs(1)),
        );
        assert!(!policy.is_exhausted(2, Duration::ZERO));
        assert!(policy.is_exhausted(3, Duration::ZERO));
        assert!(policy.is_exhausted(1, Duration::from_secs(1)));
    }

    #[test]
    fn zero_config_bounds_mean_unbounded() {
        let config = PollingConfig {
            max_attempts: 0,
            max_duration_secs: 0,
            ..PollingConfig::default()
        };
        let policy = PollPolicy::from(&config);
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.max_duration, None);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_on_terminal_status() {
        let service = Arc::new(ScriptedService::new("abc"));
        service.push_status(StatusReport::pending("extracting", 10.0, "working"));
        service.push_status(StatusReport::frames_ready(12));

        let mut poller = Poller::new(Arc::clone(&service), policy(2000));
        let generation = poller.start(SessionId::new("abc"));

        let first = poller.next_event().await.unwrap();
        assert_eq!(first.generation, generation);
        assert!(matches!(first.outcome, PollOutcome::Progress(_)));
        assert!(!first.outcome.is_terminal());

        let second = poller.next_event().await.unwrap();
        assert!(matches!(second.outcome, PollOutcome::Finished(ref r) if r.status == "frames_ready"));
        assert!(second.outcome.is_terminal());

        tokio::task::yield_now().await;
        assert!(poller.next_event().await.is_none());
        assert_eq!(service.count(Endpoint::Status), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn starting_again_leaves_one_loop() {
        let service = Arc::new(ScriptedService::new("abc"));
        let mut poller = Poller::new(Arc::clone(&service), policy(2000));

        let mut last = Generation(0);
        for _ in 0..5 {
            let generation = poller.start(SessionId::new("abc"));
            assert!(generation > last);
            last = generation;
            assert_eq!(poller.active_loops(), 1);
        }
        assert!(poller.is_current(last));
        assert!(!poller.is_current(Generation(1)));

        poller.cancel();
        tokio::task::yield_now().await;
        assert_eq!(poller.active_loops(), 0);
        assert!(!poller.is_current(last));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_loop_times_out() {
        let service = Arc::new(ScriptedService::new("abc"));
        let bounded = PollPolicy::new(
            Duration::from_millis(2000),
            Duration::from_millis(2000),
            1.0,
            Some(3),
            None,
        );
        let mut poller = Poller::new(Arc::clone(&service), bounded);
        poller.start(SessionId::new("abc"));

        let mut progress = 0;
        loop {
            let event = poller.next_event().await.unwrap();
            match event.outcome {
                PollOutcome::Progress(_) => progress += 1,
                PollOutcome::TimedOut(timeout) => {
                    assert_eq!(timeout.attempts, 3);
                    break;
                }
                PollOutcome::Finished(_) => panic!("no terminal status was scripted"),
            }
        }
        assert_eq!(progress, 3);
        assert_eq!(service.count(Endpoint::Status), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_requests_do_not_stop_the_loop() {
        let service = Arc::new(ScriptedService::new("abc"));
        service.fail_next(Endpoint::Status, 502, "bad gateway");
        service.push_status(StatusReport::frames_ready(3));

        let mut poller = Poller::new(Arc::clone(&service), policy(100));
        poller.start(SessionId::new("abc"));

        let event = poller.next_event().await.unwrap();
        assert!(matches!(event.outcome, PollOutcome::Finished(_)));
        assert_eq!(service.count(Endpoint::Status), 2);
    }
}

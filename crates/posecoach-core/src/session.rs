//! Session runner — wires one producer and one coordinator per session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::channel::session_links;
use crate::config::Config;
use crate::coordinator::{CoordinatorSettings, SessionCoordinator, SessionReport};
use crate::feedback::FeedbackDispatcher;
use crate::media::MediaBackend;
use crate::producer::{ProducerSettings, VideoProducerLoop};
use crate::stage::StageDefinition;
use crate::state::{SharedSessionState, StateEntry};

/// Cancels the running session from any thread.
#[derive(Clone)]
pub struct SessionControl {
    shutdown: Arc<AtomicBool>,
    state: Arc<SharedSessionState>,
}

impl SessionControl {
    /// Idempotent. The coordinator notices within one poll interval and the
    /// producer within one frame. Has no effect on a session prepared later.
    ///
    /// `Running` is cleared before the producer's flag so the coordinator
    /// never sees the producer gone while the session still looks live.
    pub fn request_shutdown(&self) {
        self.state.set(StateEntry::Running(false));
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            log::info!("[session] shutdown requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }
}

pub struct SessionRunner {
    config: Config,
    backend: Arc<dyn MediaBackend>,
    feedback: FeedbackDispatcher,
    state: Arc<SharedSessionState>,
    shutdown: Arc<AtomicBool>,
}

impl SessionRunner {
    pub fn new(config: Config, backend: Arc<dyn MediaBackend>, feedback: FeedbackDispatcher) -> Self {
        Self {
            config,
            backend,
            feedback,
            state: Arc::new(SharedSessionState::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn control(&self) -> SessionControl {
        SessionControl { shutdown: self.shutdown.clone(), state: self.state.clone() }
    }

    pub fn state(&self) -> Arc<SharedSessionState> {
        self.state.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Clear the previous session's shutdown request and state. A shutdown
    /// requested after this call cancels the next session.
    pub fn prepare(&self) {
        self.state.reset();
        self.shutdown.store(false, Ordering::SeqCst);
    }

    /// Run one session to completion on the calling thread.
    pub fn run_session(&self, stages: &[StageDefinition]) -> Result<SessionReport> {
        self.prepare();
        self.run_prepared(stages)
    }

    /// Like [`run_session`](Self::run_session), for a runner already
    /// [`prepare`](Self::prepare)d by the caller.
    pub fn run_prepared(&self, stages: &[StageDefinition]) -> Result<SessionReport> {
        let stages = Arc::new(stages.to_vec());
        let (coordinator_links, producer_links) = session_links();
        let producer = VideoProducerLoop::new(
            ProducerSettings::from_config(&self.config),
            stages.clone(),
            self.backend.clone(),
            self.state.clone(),
            producer_links,
            self.shutdown.clone(),
        );
        let handle = match producer.spawn() {
            Ok(handle) => handle,
            Err(e) => {
                self.state.set(StateEntry::Running(false));
                return Err(e).context("failed to start producer thread");
            }
        };

        log::info!("[session] started with {} stages", stages.len());
        let coordinator = SessionCoordinator::new(
            CoordinatorSettings::from_config(&self.config),
            stages,
            self.state.clone(),
            coordinator_links,
            self.feedback.clone(),
        );
        let report = coordinator.run();

        self.shutdown.store(true, Ordering::SeqCst);
        self.state.set(StateEntry::Running(false));
        join_with_timeout(handle, self.config.session.shutdown_join_timeout());
        Ok(report)
    }

    /// Blocking entry point: true only if every stage was passed.
    pub fn start_session(&self, stages: &[StageDefinition]) -> bool {
        self.prepare();
        self.start_prepared(stages)
    }

    /// [`start_session`](Self::start_session) without the reset, for sessions
    /// spawned on another thread after [`prepare`](Self::prepare).
    pub fn start_prepared(&self, stages: &[StageDefinition]) -> bool {
        match self.run_prepared(stages) {
            Ok(report) => report.success(),
            Err(e) => {
                log::error!("[session] {e:#}");
                false
            }
        }
    }
}

/// Wait up to `timeout` for `handle` to finish. On timeout the thread is
/// left detached. Returns whether it finished.
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let name = handle.thread().name().unwrap_or("worker").to_string();
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("[session] {name} thread did not stop within {timeout:?}; detaching");
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        log::error!("[session] {name} thread panicked");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::SessionStatus;
    use crate::feedback::recording::RecordingFeedback;
    use crate::media::scripted::ScriptedBackend;
    use crate::stage::{StageCues, StagePosition, StageRule};

    fn fast_config() -> Config {
        let mut cfg = Config::default();
        cfg.session.poll_interval_ms = 20;
        cfg.session.intro_delay_ms = 0;
        cfg.session.shutdown_join_timeout_ms = 1_000;
        cfg.detection.check_interval_ms = 5;
        cfg.media.replay_delay_ms = 0;
        cfg.media.camera_fallbacks = 0;
        cfg
    }

    fn runner(cfg: Config, backend: ScriptedBackend) -> (SessionRunner, Arc<RecordingFeedback>) {
        let sink = Arc::new(RecordingFeedback::default());
        let feedback = FeedbackDispatcher::spawn(sink.clone(), 32).unwrap();
        (SessionRunner::new(cfg, Arc::new(backend), feedback), sink)
    }

    fn three_stages() -> Vec<StageDefinition> {
        vec![
            StageDefinition::new("one", StageRule::ElapsedPresence { hold_ms: 30 }),
            StageDefinition::new("two", StageRule::ElapsedPresence { hold_ms: 30 }),
            StageDefinition {
                replay_on_fail: true,
                ..StageDefinition::new("three", StageRule::AttemptCounted { check_interval_ms: 20 }).with_cues(
                    StageCues { fail: Some("0011".into()), voice_fail: true, ..StageCues::default() },
                )
            },
        ]
    }

    #[test]
    fn continuous_detection_completes_all_stages() {
        let backend = ScriptedBackend::new().with_frame_interval(Duration::from_millis(2));
        let (runner, sink) = runner(fast_config(), backend);
        let report = runner.run_session(&three_stages()).unwrap();
        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.advances_sent, 2);
        assert_eq!(report.completed_stages, 3);
        assert_eq!(report.forced_stages, 0);
        assert_eq!(runner.state().current_stage(), StagePosition::Done);
        assert!(!runner.control().is_running());

        // The attempt-counted stage failed once before passing.
        let deadline = Instant::now() + Duration::from_secs(1);
        while sink.clips().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sink.clips(), ["0011"]);
    }

    #[test]
    fn camera_failure_ends_session_and_stops_producer() {
        let backend = ScriptedBackend::new()
            .with_frame_interval(Duration::from_millis(2))
            .with_camera_failure_at(10);
        let reads = backend.camera_reads();
        let (runner, _sink) = runner(fast_config(), backend);

        let started = Instant::now();
        assert!(!runner.start_session(&three_stages()));
        // Ten frames plus at most one poll of the coordinator.
        assert!(started.elapsed() < Duration::from_millis(500), "took {:?}", started.elapsed());

        let after = reads.load(Ordering::SeqCst);
        assert_eq!(after, 10);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(reads.load(Ordering::SeqCst), after);
    }

    #[test]
    fn request_shutdown_cancels_a_running_session() {
        let backend = ScriptedBackend::new().with_frame_interval(Duration::from_millis(2));
        let (runner, _sink) = runner(fast_config(), backend);
        let runner = Arc::new(runner);
        let control = runner.control();
        let stages = vec![StageDefinition::new("forever", StageRule::ElapsedPresence { hold_ms: 60_000 })];

        let session = {
            let runner = runner.clone();
            std::thread::spawn(move || runner.run_session(&stages).unwrap())
        };
        std::thread::sleep(Duration::from_millis(50));
        control.request_shutdown();
        control.request_shutdown();
        let report = session.join().unwrap();
        assert_eq!(report.status, SessionStatus::Cancelled);
        assert_eq!(report.completed_stages, 0);
    }

    #[test]
    fn shutdown_between_prepare_and_run_is_kept() {
        let backend = ScriptedBackend::new().with_frame_interval(Duration::from_millis(2));
        let (runner, _sink) = runner(fast_config(), backend);
        let stages = vec![StageDefinition::new("forever", StageRule::ElapsedPresence { hold_ms: 60_000 })];

        runner.prepare();
        runner.control().request_shutdown();
        let started = Instant::now();
        let report = runner.run_prepared(&stages).unwrap();
        assert_eq!(report.status, SessionStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_millis(500), "took {:?}", started.elapsed());

        // A fresh session is not affected by the earlier request.
        let quick = vec![StageDefinition::new("quick", StageRule::ElapsedPresence { hold_ms: 10 })];
        assert!(runner.start_session(&quick));
    }

    #[test]
    fn no_usable_camera_fails_fast() {
        let backend = ScriptedBackend::new().with_camera_indices(&[]);
        let (runner, _sink) = runner(fast_config(), backend);
        assert!(!runner.start_session(&three_stages()));
    }

    #[test]
    fn runner_is_reusable_across_sessions() {
        let backend = ScriptedBackend::new().with_frame_interval(Duration::from_millis(1));
        let (runner, _sink) = runner(fast_config(), backend);
        let stages = vec![StageDefinition::new("quick", StageRule::ElapsedPresence { hold_ms: 10 })];
        assert!(runner.start_session(&stages));
        assert!(runner.start_session(&stages));
    }

    #[test]
    fn join_with_timeout_detaches_stuck_threads() {
        let stuck = std::thread::spawn(|| std::thread::sleep(Duration::from_millis(300)));
        let started = Instant::now();
        assert!(!join_with_timeout(stuck, Duration::from_millis(30)));
        assert!(started.elapsed() < Duration::from_millis(200));

        let quick = std::thread::spawn(|| {});
        assert!(join_with_timeout(quick, Duration::from_secs(1)));
    }
}

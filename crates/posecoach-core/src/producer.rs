//! Video producer loop — camera, reference clip and landmark processing.
//!
//! Runs on its own thread for the lifetime of one session. All media handles
//! are opened and released on that thread; the only outputs are messages to
//! the coordinator and detection keys in the shared state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::analyzer::{PostureAnalyzer, Verdict};
use crate::channel::ProducerLinks;
use crate::config::Config;
use crate::media::playlist::{EndOfClip, ReferencePlaylist};
use crate::media::{open_camera_with_fallback, FrameSource, LandmarkSource, MediaBackend};
use crate::message::Event;
use crate::pose::Pose;
use crate::stage::StageDefinition;
use crate::state::{SharedSessionState, StateEntry};

const HEARTBEAT_FRAMES: u64 = 100;
const PAUSE_SLICE: Duration = Duration::from_millis(20);

/// Timing and media parameters for one producer.
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub camera_index: u32,
    pub camera_fallbacks: u32,
    pub clips: Vec<PathBuf>,
    pub max_replays: u32,
    pub replay_delay: Duration,
    pub check_interval: Duration,
    pub lost_notice_interval: Duration,
}

impl ProducerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            camera_index: cfg.media.camera_index,
            camera_fallbacks: cfg.media.camera_fallbacks,
            clips: cfg.media.clips.clone(),
            max_replays: cfg.media.max_replays,
            replay_delay: cfg.media.replay_delay(),
            check_interval: cfg.detection.check_interval(),
            lost_notice_interval: cfg.detection.lost_notice_interval(),
        }
    }
}

pub struct VideoProducerLoop {
    settings: ProducerSettings,
    stages: Arc<Vec<StageDefinition>>,
    backend: Arc<dyn MediaBackend>,
    state: Arc<SharedSessionState>,
    links: ProducerLinks,
    shutdown: Arc<AtomicBool>,

    analyzer: PostureAnalyzer,
    active: usize,
    /// Success was reported for `active`; hold evaluation until the
    /// coordinator's advance arrives.
    awaiting_advance: bool,
    detected: bool,
    last_lost_notice: Option<Instant>,
    frames: u64,
}

impl VideoProducerLoop {
    pub fn new(
        settings: ProducerSettings,
        stages: Arc<Vec<StageDefinition>>,
        backend: Arc<dyn MediaBackend>,
        state: Arc<SharedSessionState>,
        links: ProducerLinks,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let active = state.current_stage().index().unwrap_or(0);
        let awaiting_advance = active >= stages.len();
        Self {
            analyzer: PostureAnalyzer::new(settings.check_interval),
            settings,
            stages,
            backend,
            state,
            links,
            shutdown,
            active,
            awaiting_advance,
            detected: false,
            last_lost_notice: None,
            frames: 0,
        }
    }

    /// Run the loop on a named thread.
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let handle = std::thread::Builder::new()
            .name("producer".into())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    /// Run until shutdown, coordinator departure, or camera failure.
    pub fn run(mut self) {
        log::info!("[producer] starting on {} backend", self.backend.name());

        let (mut camera, mut landmarks) = match self.open_inputs() {
            Ok(inputs) => inputs,
            Err(e) => {
                log::error!("[producer] media initialization failed: {e:#}");
                self.links.to_coordinator.send(Event::CameraError { reason: format!("{e:#}") });
                return;
            }
        };
        let mut playlist =
            ReferencePlaylist::open(self.backend.as_ref(), self.settings.clips.clone(), self.settings.max_replays);
        self.state.set(StateEntry::MediaIndex(playlist.index()));

        loop {
            if !self.handle_commands(&mut playlist) || self.shutdown_requested() {
                break;
            }

            let frame = match camera.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    log::error!("[producer] {} read failed: {e:#}", camera.name());
                    self.links.to_coordinator.send(Event::CameraError { reason: format!("{e:#}") });
                    break;
                }
            };
            self.frames += 1;
            if self.frames % HEARTBEAT_FRAMES == 0 {
                log::info!(
                    "[producer] {} frames, stage #{}, detected={}, clip {}",
                    self.frames,
                    self.active,
                    self.detected,
                    playlist.index()
                );
            }

            if !self.step_reference(&mut playlist) {
                break;
            }

            let pose = match landmarks.detect(&frame) {
                Ok(pose) => pose,
                Err(e) => {
                    log::debug!("[producer] landmark extraction failed, skipping frame: {e:#}");
                    continue;
                }
            };

            let now = Instant::now();
            self.track_detection(pose.is_some(), now);
            if let Some(pose) = pose {
                self.evaluate(&pose, now);
            }
        }

        log::info!("[producer] stopped after {} frames", self.frames);
    }

    fn open_inputs(&self) -> Result<(Box<dyn FrameSource>, Box<dyn LandmarkSource>)> {
        let camera =
            open_camera_with_fallback(self.backend.as_ref(), self.settings.camera_index, self.settings.camera_fallbacks)?;
        let landmarks = self.backend.landmark_source()?;
        log::info!("[producer] landmarks from {}", landmarks.name());
        Ok((camera, landmarks))
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Apply everything the coordinator sent since the last frame. Returns
    /// false when the loop should exit.
    fn handle_commands(&mut self, playlist: &mut ReferencePlaylist) -> bool {
        for msg in self.links.from_coordinator.drain() {
            match msg.into_event() {
                Event::AdvanceStage { stage } => {
                    log::info!("[producer] advancing to stage #{stage}");
                    self.analyzer.reset_stage(Instant::now(), self.detected);
                    self.state.set(StateEntry::FailCount(0));
                    self.active = stage;
                    self.awaiting_advance = stage >= self.stages.len();
                }
                Event::RestartMedia => {
                    log::info!("[producer] restarting reference clip");
                    playlist.restart();
                }
                Event::Shutdown => {
                    log::info!("[producer] shutdown requested");
                    return false;
                }
                other => log::warn!("[producer] unexpected message: {}", other.kind()),
            }
        }
        if self.links.from_coordinator.is_closed() {
            log::warn!("[producer] coordinator gone");
            return false;
        }
        true
    }

    /// Pull one reference frame, applying the end-of-clip policy. Returns
    /// false if shutdown arrived during a replay pause.
    fn step_reference(&mut self, playlist: &mut ReferencePlaylist) -> bool {
        if playlist.is_empty() || playlist.next_frame().is_some() {
            return true;
        }

        let completed = self.state.media_completed();
        match playlist.on_end_of_stream(self.backend.as_ref(), completed) {
            EndOfClip::Replayed { attempt } => {
                log::debug!("[producer] replay {attempt} after {:?}", self.settings.replay_delay);
                return self.pause(self.settings.replay_delay);
            }
            EndOfClip::Advanced { completed } => {
                self.state.update([StateEntry::MediaCompleted(false), StateEntry::MediaIndex(playlist.index())]);
                self.links.to_coordinator.send(Event::MediaEnd { stage: self.active, completed });
            }
        }
        true
    }

    /// Sleep for `duration` in short slices, returning false if shutdown is
    /// requested meanwhile.
    fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.shutdown_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }

    fn track_detection(&mut self, present: bool, now: Instant) {
        if present {
            self.analyzer.on_detected(now);
            self.state.update([StateEntry::PoseDetected(true), StateEntry::LastDetection(Some(now))]);
            if !self.detected {
                self.detected = true;
                self.links.to_coordinator.send(Event::PoseDetected);
            }
        } else if self.detected {
            self.detected = false;
            self.analyzer.on_lost();
            self.state.set(StateEntry::PoseDetected(false));
            let due = self
                .last_lost_notice
                .map_or(true, |t| now.saturating_duration_since(t) >= self.settings.lost_notice_interval);
            if due {
                self.last_lost_notice = Some(now);
                self.links.to_coordinator.send(Event::PoseLost);
            }
        }
    }

    fn evaluate(&mut self, pose: &Pose, now: Instant) {
        if self.awaiting_advance {
            return;
        }
        let stages = self.stages.clone();
        let Some(stage) = stages.get(self.active) else {
            return;
        };

        let verdict = match self.analyzer.evaluate_if_due(stage, pose, now) {
            Ok(Some(verdict)) => verdict,
            Ok(None) => return,
            Err(e) => {
                log::debug!("[producer] {}: unusable landmarks, cycle skipped: {e:#}", stage.id);
                return;
            }
        };

        match verdict {
            Verdict::Pending => {}
            Verdict::Success => self.report_success(false),
            Verdict::Fail { fail_count } => {
                if stage.rule.emits_fail() {
                    self.state.set(StateEntry::FailCount(fail_count));
                    self.links.to_coordinator.send(Event::PostureFail { stage: self.active, fail_count });
                }
            }
            Verdict::ForceAdvance { fail_count } => {
                log::warn!("[producer] {}: {fail_count} fails, forcing advance", stage.id);
                self.state.set(StateEntry::FailCount(fail_count));
                self.links.to_coordinator.send(Event::PostureFail { stage: self.active, fail_count });
                self.report_success(true);
            }
        }
    }

    fn report_success(&mut self, forced: bool) {
        self.state.update([StateEntry::MediaCompleted(true), StateEntry::FailCount(0)]);
        self.links.to_coordinator.send(Event::PostureSuccess { stage: self.active, forced });
        self.awaiting_advance = true;
    }
}

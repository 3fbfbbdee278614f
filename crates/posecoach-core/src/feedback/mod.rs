//! Feedback — pluggable audio sink trait + factory, and a bounded dispatcher.
//!
//! Sinks may block (an external player runs until the clip ends), so the
//! coordinator never calls them directly. It hands cues to a
//! [`FeedbackDispatcher`], whose worker thread plays them in order.

pub mod command;
pub mod log_sink;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, TrySendError};
use std::sync::Arc;
use std::time::Duration;

use crate::config::FeedbackConfig;

/// Why a cue is being played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackEvent {
    Welcome,
    StageIntro,
    StageSuccess,
    StageFail,
    PoseDetected,
    CameraError,
    SessionComplete,
}

impl fmt::Display for FeedbackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeedbackEvent::Welcome => "welcome",
            FeedbackEvent::StageIntro => "stage-intro",
            FeedbackEvent::StageSuccess => "stage-success",
            FeedbackEvent::StageFail => "stage-fail",
            FeedbackEvent::PoseDetected => "pose-detected",
            FeedbackEvent::CameraError => "camera-error",
            FeedbackEvent::SessionComplete => "session-complete",
        })
    }
}

/// One piece of feedback: the occasion plus the clip id to voice it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub event: FeedbackEvent,
    pub clip: Option<String>,
}

impl Cue {
    pub fn new(event: FeedbackEvent, clip: Option<&str>) -> Self {
        Self { event, clip: clip.map(str::to_string) }
    }
}

impl fmt::Display for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.clip {
            Some(clip) => write!(f, "{}[{clip}]", self.event),
            None => write!(f, "{}", self.event),
        }
    }
}

/// Trait for feedback backends.
pub trait FeedbackSink: Send + Sync {
    /// Deliver one cue. May block until playback finishes.
    fn play(&self, cue: &Cue) -> anyhow::Result<()>;
    fn name(&self) -> &str;
}

/// Create a feedback sink based on config.
///
/// A backend that cannot be set up degrades to the silent sink so a broken
/// audio setup never prevents a session from running.
pub fn create_feedback(cfg: &FeedbackConfig) -> anyhow::Result<Arc<dyn FeedbackSink>> {
    match cfg.backend.as_str() {
        "log" => Ok(Arc::new(log_sink::LogFeedback)),
        "none" => Ok(Arc::new(log_sink::SilentFeedback)),
        "command" => match command::CommandFeedback::from_config(cfg) {
            Ok(sink) => Ok(Arc::new(sink)),
            Err(e) => {
                log::warn!("Command feedback unavailable ({e:#}), falling back to silent");
                Ok(Arc::new(log_sink::SilentFeedback))
            }
        },
        other => {
            log::warn!("Unknown feedback backend '{other}', falling back to silent");
            Ok(Arc::new(log_sink::SilentFeedback))
        }
    }
}

struct Job {
    cue: Cue,
    delay: Duration,
}

/// Fire-and-forget front end for a [`FeedbackSink`].
///
/// Cloning shares the same worker and queue. The worker exits once every
/// clone has been dropped and the queue is empty.
#[derive(Clone)]
pub struct FeedbackDispatcher {
    tx: mpsc::SyncSender<Job>,
}

impl FeedbackDispatcher {
    /// Spawn the playback worker with room for `queue_depth` pending cues.
    pub fn spawn(sink: Arc<dyn FeedbackSink>, queue_depth: usize) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<Job>(queue_depth.max(1));
        let sink_name = sink.name().to_string();
        std::thread::Builder::new()
            .name("feedback".into())
            .spawn(move || {
                for job in rx {
                    if !job.delay.is_zero() {
                        std::thread::sleep(job.delay);
                    }
                    match catch_unwind(AssertUnwindSafe(|| sink.play(&job.cue))) {
                        Ok(Ok(())) => log::debug!("[feedback] played {}", job.cue),
                        Ok(Err(e)) => log::warn!("[feedback] {} failed on {}: {e:#}", sink.name(), job.cue),
                        Err(_) => log::error!("[feedback] {} panicked on {}", sink.name(), job.cue),
                    }
                }
                log::debug!("[feedback] worker exiting");
            })?;
        log::info!("Feedback dispatcher started ({sink_name}, queue {queue_depth})");
        Ok(Self { tx })
    }

    /// Queue a cue. Never blocks; a full queue drops the cue with a warning.
    pub fn play(&self, cue: Cue) {
        self.enqueue(Job { cue, delay: Duration::ZERO });
    }

    /// Queue a cue that plays `delay` after the worker reaches it.
    pub fn play_after(&self, cue: Cue, delay: Duration) {
        self.enqueue(Job { cue, delay });
    }

    fn enqueue(&self, job: Job) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => log::warn!("[feedback] queue full, dropped {}", job.cue),
            Err(TrySendError::Disconnected(job)) => log::warn!("[feedback] worker gone, dropped {}", job.cue),
        }
    }
}

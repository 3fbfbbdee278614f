//! Messages exchanged between the producer and the coordinator.

use std::fmt;
use std::time::Instant;

/// What happened. Payload fields travel with the variant they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // ── producer → coordinator ──
    PoseDetected,
    PoseLost,
    PostureSuccess { stage: usize, forced: bool },
    PostureFail { stage: usize, fail_count: u32 },
    MediaEnd { stage: usize, completed: bool },
    /// The camera could not be opened or read; the producer has stopped.
    CameraError { reason: String },

    // ── coordinator → producer ──
    AdvanceStage { stage: usize },
    RestartMedia,

    // ── either direction ──
    Shutdown,
}

impl Event {
    /// Short kebab-case name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::PoseDetected => "pose-detected",
            Event::PoseLost => "pose-lost",
            Event::PostureSuccess { .. } => "posture-success",
            Event::PostureFail { .. } => "posture-fail",
            Event::MediaEnd { .. } => "media-end",
            Event::CameraError { .. } => "media-error",
            Event::AdvanceStage { .. } => "advance-stage",
            Event::RestartMedia => "restart-media",
            Event::Shutdown => "shutdown",
        }
    }
}

/// An event stamped with its creation time. Immutable once built.
#[derive(Debug, Clone)]
pub struct Message {
    event: Event,
    created_at: Instant,
}

impl Message {
    pub fn new(event: Event) -> Self {
        Self { event, created_at: Instant::now() }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn into_event(self) -> Event {
        self.event
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

impl From<Event> for Message {
    fn from(event: Event) -> Self {
        Message::new(event)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.event {
            Event::PostureSuccess { stage, forced } => {
                write!(f, "posture-success(stage={stage}{})", if *forced { ", forced" } else { "" })
            }
            Event::PostureFail { stage, fail_count } => {
                write!(f, "posture-fail(stage={stage}, fails={fail_count})")
            }
            Event::MediaEnd { stage, completed } => write!(f, "media-end(stage={stage}, completed={completed})"),
            Event::CameraError { reason } => write!(f, "media-error({reason})"),
            Event::AdvanceStage { stage } => write!(f, "advance-stage(to={stage})"),
            other => f.write_str(other.kind()),
        }
    }
}

//! posecoach-core — Core library for the posecoach posture-coaching session.
//!
//! Camera → landmarks → analyzer → coordinator → audio feedback
//!
//! A session runs one video producer thread and one coordinator, connected
//! by two message channels and a small shared state table. Camera capture,
//! clip decoding and pose inference plug in through the traits in [`media`];
//! audio and voice recognition through [`feedback`] and [`voice`].

pub mod analyzer;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod feedback;
pub mod media;
pub mod message;
pub mod pose;
pub mod producer;
pub mod session;
pub mod stage;
pub mod state;
pub mod voice;

pub use coordinator::{SessionReport, SessionStatus};
pub use session::{SessionControl, SessionRunner};
pub use stage::{StageDefinition, StagePosition, StageRule};

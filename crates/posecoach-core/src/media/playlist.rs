//! Reference playlist — cycles demonstration clips with bounded replays.

use std::path::PathBuf;

use crate::media::{Frame, MediaBackend, ReferenceClip};

/// What the playlist did at the end of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfClip {
    /// Rewound the same clip; `attempt` counts replays of this clip.
    Replayed { attempt: u32 },
    /// Moved to the next clip. `completed` is false when the replay budget
    /// ran out rather than the posture being completed.
    Advanced { completed: bool },
}

pub struct ReferencePlaylist {
    clips: Vec<PathBuf>,
    index: usize,
    current: Option<Box<dyn ReferenceClip>>,
    replays: u32,
    max_replays: u32,
}

impl ReferencePlaylist {
    /// Open the first clip. A clip that cannot be opened is not fatal: the
    /// playlist reports end-of-stream and moves on through its retry policy.
    pub fn open(backend: &dyn MediaBackend, clips: Vec<PathBuf>, max_replays: u32) -> Self {
        let current = clips.first().and_then(|path| match backend.open_clip(path) {
            Ok(clip) => {
                log::info!("Reference clip opened: {}", path.display());
                Some(clip)
            }
            Err(e) => {
                log::warn!("Reference clip {} unavailable: {e:#}", path.display());
                None
            }
        });
        Self { clips, index: 0, current, replays: 0, max_replays }
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn replays(&self) -> u32 {
        self.replays
    }

    /// Next frame of the current clip. Read errors count as end of stream.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let clip = self.current.as_mut()?;
        match clip.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Reference clip {} unreadable: {e:#}", clip.name());
                None
            }
        }
    }

    /// Apply the end-of-stream policy.
    pub fn on_end_of_stream(&mut self, backend: &dyn MediaBackend, completed: bool) -> EndOfClip {
        if completed {
            self.advance(backend);
            return EndOfClip::Advanced { completed: true };
        }
        if self.replays < self.max_replays {
            self.replays += 1;
            log::info!("Posture not completed, replaying clip ({}/{})", self.replays, self.max_replays);
            self.restart();
            EndOfClip::Replayed { attempt: self.replays }
        } else {
            log::info!("Replay limit reached, moving to the next clip");
            self.advance(backend);
            EndOfClip::Advanced { completed: false }
        }
    }

    /// Switch to the next clip cyclically. If it cannot be opened the current
    /// clip is kept and rewound. Returns whether the switch happened.
    pub fn advance(&mut self, backend: &dyn MediaBackend) -> bool {
        self.replays = 0;
        if self.clips.is_empty() {
            return false;
        }
        let next = (self.index + 1) % self.clips.len();
        let path = &self.clips[next];
        match backend.open_clip(path) {
            Ok(clip) => {
                log::info!("Switched to reference clip {}", path.display());
                self.current = Some(clip);
                self.index = next;
                true
            }
            Err(e) => {
                log::warn!("Cannot open {}: {e:#}; staying on the current clip", path.display());
                self.restart();
                false
            }
        }
    }

    /// Rewind the current clip to its first frame.
    pub fn restart(&mut self) {
        if let Some(clip) = self.current.as_mut() {
            if let Err(e) = clip.rewind() {
                log::warn!("Rewind of {} failed: {e:#}", clip.name());
            }
        }
    }
}

//! Shared session state — a small key/value table guarded by one mutex.
//!
//! The coordinator writes stage-progression keys, the producer writes
//! detection keys, and the session runner writes `Running`. Every call is a
//! single critical section over the whole table, so multi-key `update`s land
//! atomically relative to other readers and writers.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::stage::StagePosition;

/// Keys of the shared table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    CurrentStage,
    PoseDetected,
    FailCount,
    MediaCompleted,
    Running,
    MediaIndex,
    LastDetection,
}

/// A key together with its typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEntry {
    CurrentStage(StagePosition),
    PoseDetected(bool),
    FailCount(u32),
    MediaCompleted(bool),
    Running(bool),
    MediaIndex(usize),
    LastDetection(Option<Instant>),
}

impl StateEntry {
    pub fn key(&self) -> StateKey {
        match self {
            StateEntry::CurrentStage(_) => StateKey::CurrentStage,
            StateEntry::PoseDetected(_) => StateKey::PoseDetected,
            StateEntry::FailCount(_) => StateKey::FailCount,
            StateEntry::MediaCompleted(_) => StateKey::MediaCompleted,
            StateEntry::Running(_) => StateKey::Running,
            StateEntry::MediaIndex(_) => StateKey::MediaIndex,
            StateEntry::LastDetection(_) => StateKey::LastDetection,
        }
    }
}

/// Point-in-time copy of the whole table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub current_stage: StagePosition,
    pub pose_detected: bool,
    pub fail_count: u32,
    pub media_completed: bool,
    pub running: bool,
    pub media_index: usize,
    pub last_detection: Option<Instant>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            current_stage: StagePosition::Active(0),
            pose_detected: false,
            fail_count: 0,
            media_completed: false,
            running: false,
            media_index: 0,
            last_detection: None,
        }
    }
}

impl SessionSnapshot {
    fn get(&self, key: StateKey) -> StateEntry {
        match key {
            StateKey::CurrentStage => StateEntry::CurrentStage(self.current_stage),
            StateKey::PoseDetected => StateEntry::PoseDetected(self.pose_detected),
            StateKey::FailCount => StateEntry::FailCount(self.fail_count),
            StateKey::MediaCompleted => StateEntry::MediaCompleted(self.media_completed),
            StateKey::Running => StateEntry::Running(self.running),
            StateKey::MediaIndex => StateEntry::MediaIndex(self.media_index),
            StateKey::LastDetection => StateEntry::LastDetection(self.last_detection),
        }
    }

    fn apply(&mut self, entry: StateEntry) {
        match entry {
            StateEntry::CurrentStage(v) => self.current_stage = v,
            StateEntry::PoseDetected(v) => self.pose_detected = v,
            StateEntry::FailCount(v) => self.fail_count = v,
            StateEntry::MediaCompleted(v) => self.media_completed = v,
            StateEntry::Running(v) => self.running = v,
            StateEntry::MediaIndex(v) => self.media_index = v,
            StateEntry::LastDetection(v) => self.last_detection = v,
        }
    }
}

pub struct SharedSessionState {
    table: Mutex<SessionSnapshot>,
}

impl SharedSessionState {
    pub fn new() -> Self {
        Self { table: Mutex::new(SessionSnapshot::default()) }
    }

    // A panicking writer cannot leave a half-written field behind, so a
    // poisoned lock still guards a consistent table.
    fn lock(&self) -> MutexGuard<'_, SessionSnapshot> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: StateKey) -> StateEntry {
        self.lock().get(key)
    }

    pub fn set(&self, entry: StateEntry) {
        self.lock().apply(entry);
    }

    /// Apply several entries in one critical section.
    pub fn update(&self, entries: impl IntoIterator<Item = StateEntry>) {
        let mut table = self.lock();
        for entry in entries {
            table.apply(entry);
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        *self.lock()
    }

    /// Return every key to its session-start value and mark the session running.
    pub fn reset(&self) {
        *self.lock() = SessionSnapshot { running: true, ..SessionSnapshot::default() };
    }

    // ── Typed accessors ──────────────────────────────────────────────────

    pub fn current_stage(&self) -> StagePosition {
        self.lock().current_stage
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn media_completed(&self) -> bool {
        self.lock().media_completed
    }

    pub fn pose_detected(&self) -> bool {
        self.lock().pose_detected
    }
}

impl Default for SharedSessionState {
    fn default() -> Self {
        Self::new()
    }
}

//! Scripted media backend — deterministic camera, clips, and detections.
//!
//! Drives sessions without hardware: the binary's `--simulate` mode and the
//! crate's tests both use it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};

use super::{Frame, FrameSource, LandmarkSource, MediaBackend, ReferenceClip};
use crate::pose::{Joint, Landmark, Pose};

/// Which frames contain a person.
#[derive(Debug, Clone)]
pub enum DetectionScript {
    /// Every frame has this pose.
    Always(Pose),
    /// Frame `n` (1-based) uses entry `n-1`; the last entry repeats.
    Sequence(Vec<Option<Pose>>),
    Never,
}

impl DetectionScript {
    fn pose_for(&self, sequence: u64) -> Option<Pose> {
        match self {
            DetectionScript::Always(pose) => Some(pose.clone()),
            DetectionScript::Sequence(frames) => {
                let i = (sequence.saturating_sub(1) as usize).min(frames.len().saturating_sub(1));
                frames.get(i).cloned().flatten()
            }
            DetectionScript::Never => None,
        }
    }
}

/// A standing figure with arms at the sides.
pub fn standing_pose() -> Pose {
    Pose::with_joints(&[
        (Joint::Nose, Landmark::new(0.5, 0.15)),
        (Joint::LeftShoulder, Landmark::new(0.6, 0.3)),
        (Joint::RightShoulder, Landmark::new(0.4, 0.3)),
        (Joint::LeftElbow, Landmark::new(0.62, 0.45)),
        (Joint::RightElbow, Landmark::new(0.38, 0.45)),
        (Joint::LeftWrist, Landmark::new(0.63, 0.6)),
        (Joint::RightWrist, Landmark::new(0.37, 0.6)),
        (Joint::LeftHip, Landmark::new(0.57, 0.62)),
        (Joint::RightHip, Landmark::new(0.43, 0.62)),
    ])
}

pub struct ScriptedBackend {
    camera_indices: Vec<u32>,
    camera_fail_at: Option<u64>,
    frame_interval: Duration,
    clip_frames: u64,
    missing_clips: HashSet<PathBuf>,
    detection: DetectionScript,
    camera_reads: Arc<AtomicU64>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            camera_indices: vec![0],
            camera_fail_at: None,
            frame_interval: Duration::ZERO,
            clip_frames: 30,
            missing_clips: HashSet::new(),
            detection: DetectionScript::Always(standing_pose()),
            camera_reads: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Camera indices that can be opened.
    pub fn with_camera_indices(mut self, indices: &[u32]) -> Self {
        self.camera_indices = indices.to_vec();
        self
    }

    /// The camera's `n`th read (1-based) fails, as do all later ones.
    pub fn with_camera_failure_at(mut self, n: u64) -> Self {
        self.camera_fail_at = Some(n);
        self
    }

    /// Pause between camera frames, standing in for the capture rate.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_clip_frames(mut self, frames: u64) -> Self {
        self.clip_frames = frames;
        self
    }

    pub fn with_missing_clip(mut self, path: impl Into<PathBuf>) -> Self {
        self.missing_clips.insert(path.into());
        self
    }

    pub fn with_detection(mut self, script: DetectionScript) -> Self {
        self.detection = script;
        self
    }

    /// Counter of camera reads across every camera this backend opened.
    pub fn camera_reads(&self) -> Arc<AtomicU64> {
        self.camera_reads.clone()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for ScriptedBackend {
    fn open_camera(&self, index: u32) -> Result<Box<dyn FrameSource>> {
        if !self.camera_indices.contains(&index) {
            bail!("camera {index} not present");
        }
        Ok(Box::new(ScriptedCamera {
            name: format!("scripted-camera-{index}"),
            fail_at: self.camera_fail_at,
            interval: self.frame_interval,
            reads: self.camera_reads.clone(),
            sequence: 0,
        }))
    }

    fn open_clip(&self, path: &Path) -> Result<Box<dyn ReferenceClip>> {
        if self.missing_clips.contains(path) {
            bail!("no such clip: {}", path.display());
        }
        Ok(Box::new(ScriptedClip {
            name: path.display().to_string(),
            length: self.clip_frames,
            position: 0,
        }))
    }

    fn landmark_source(&self) -> Result<Box<dyn LandmarkSource>> {
        Ok(Box::new(ScriptedLandmarks { script: self.detection.clone() }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedCamera {
    name: String,
    fail_at: Option<u64>,
    interval: Duration,
    reads: Arc<AtomicU64>,
    sequence: u64,
}

impl FrameSource for ScriptedCamera {
    fn read_frame(&mut self) -> Result<Frame> {
        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.sequence += 1;
        if self.fail_at.is_some_and(|n| self.sequence >= n) {
            bail!("{}: read failed at frame {}", self.name, self.sequence);
        }
        Ok(Frame { sequence: self.sequence, width: 640, height: 480, pixels: Vec::new() })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct ScriptedLandmarks {
    script: DetectionScript,
}

impl LandmarkSource for ScriptedLandmarks {
    fn detect(&mut self, frame: &Frame) -> Result<Option<Pose>> {
        Ok(self.script.pose_for(frame.sequence))
    }

    fn name(&self) -> &str {
        "scripted-landmarks"
    }
}

struct ScriptedClip {
    name: String,
    length: u64,
    position: u64,
}

impl ReferenceClip for ScriptedClip {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.position >= self.length {
            return Ok(None);
        }
        self.position += 1;
        Ok(Some(Frame { sequence: self.position, width: 640, height: 480, pixels: Vec::new() }))
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

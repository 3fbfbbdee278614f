//! Pose landmarks — normalized joint coordinates from the external estimator.

use anyhow::{bail, Context, Result};

/// Body joints used by the built-in posture checks.
///
/// Discriminants follow the 33-point BlazePose topology so that a landmark
/// list produced by a MediaPipe-compatible estimator can be indexed directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joint {
    Nose = 0,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftHip = 23,
    RightHip = 24,
}

impl Joint {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One joint coordinate. `x`/`y` are normalized to the frame (0..1, y down).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0, visibility: 1.0 }
    }
}

/// A full set of landmarks for one detected person in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pose {
    pub landmarks: Vec<Landmark>,
}

impl Pose {
    pub fn new(landmarks: Vec<Landmark>) -> Self {
        Self { landmarks }
    }

    /// Look up a joint, failing on truncated landmark lists or NaN coordinates.
    pub fn joint(&self, joint: Joint) -> Result<Landmark> {
        let lm = *self
            .landmarks
            .get(joint.index())
            .with_context(|| format!("landmark {joint:?} missing ({} points)", self.landmarks.len()))?;
        if !lm.x.is_finite() || !lm.y.is_finite() {
            bail!("landmark {joint:?} has non-finite coordinates");
        }
        Ok(lm)
    }

    /// A pose with every BlazePose point at the frame center, then the given
    /// joints overridden. Handy for scripted sources.
    pub fn with_joints(joints: &[(Joint, Landmark)]) -> Self {
        let mut landmarks = vec![Landmark::new(0.5, 0.5); 33];
        for (joint, lm) in joints {
            landmarks[joint.index()] = *lm;
        }
        Self { landmarks }
    }
}

/// Angle at `b` formed by the segments `b→a` and `b→c`, in degrees (0..=180).
pub fn angle_at(a: Landmark, b: Landmark, c: Landmark) -> Result<f32> {
    let (bax, bay) = (a.x - b.x, a.y - b.y);
    let (bcx, bcy) = (c.x - b.x, c.y - b.y);
    let norm = (bax.hypot(bay)) * (bcx.hypot(bcy));
    if norm <= f32::EPSILON {
        bail!("degenerate angle: coincident landmarks");
    }
    let cosine = ((bax * bcx + bay * bcy) / norm).clamp(-1.0, 1.0);
    Ok(cosine.acos().to_degrees())
}

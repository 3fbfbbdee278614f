//! Posture predicates — pluggable trait + built-in geometric checks.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::pose::{angle_at, Joint, Pose};

/// Trait for geometric posture checks.
pub trait PosturePredicate: Send + Sync {
    /// `Ok(true)` when the pose satisfies the posture. `Err` means the
    /// landmarks were unusable for this check and the cycle should be skipped.
    fn check(&self, pose: &Pose) -> Result<bool>;
    fn name(&self) -> &str;
}

/// Serializable description of a built-in check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GeometricCheck {
    /// Left arm extended overhead: shoulder–elbow–wrist angle above the
    /// threshold and the wrist higher in the frame than the shoulder.
    ArmRaise {
        #[serde(default = "default_straight_angle")]
        min_elbow_angle: f32,
    },
    /// Left arm in line with the torso: elbow–shoulder–hip angle above the
    /// threshold.
    HandsOnWaist {
        #[serde(default = "default_straight_angle")]
        min_waist_angle: f32,
    },
    /// Left wrist resting at hip height.
    WristAtHip {
        #[serde(default = "default_hip_offset")]
        max_offset: f32,
    },
}

fn default_straight_angle() -> f32 { 160.0 }
fn default_hip_offset() -> f32 { 0.05 }

impl GeometricCheck {
    /// Instantiate the predicate this description names.
    pub fn build(&self) -> Arc<dyn PosturePredicate> {
        match *self {
            GeometricCheck::ArmRaise { min_elbow_angle } => Arc::new(ArmRaise { min_elbow_angle }),
            GeometricCheck::HandsOnWaist { min_waist_angle } => {
                Arc::new(HandsOnWaist { min_waist_angle })
            }
            GeometricCheck::WristAtHip { max_offset } => Arc::new(WristAtHip { max_offset }),
        }
    }
}

impl fmt::Display for GeometricCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometricCheck::ArmRaise { min_elbow_angle } => write!(f, "arm-raise(>{min_elbow_angle}°)"),
            GeometricCheck::HandsOnWaist { min_waist_angle } => {
                write!(f, "hands-on-waist(>{min_waist_angle}°)")
            }
            GeometricCheck::WristAtHip { max_offset } => write!(f, "wrist-at-hip(<{max_offset})"),
        }
    }
}

struct ArmRaise {
    min_elbow_angle: f32,
}

impl PosturePredicate for ArmRaise {
    fn check(&self, pose: &Pose) -> Result<bool> {
        let shoulder = pose.joint(Joint::LeftShoulder)?;
        let elbow = pose.joint(Joint::LeftElbow)?;
        let wrist = pose.joint(Joint::LeftWrist)?;
        let angle = angle_at(shoulder, elbow, wrist)?;
        log::debug!("arm-raise: elbow angle {angle:.0}°, wrist.y={:.2} shoulder.y={:.2}", wrist.y, shoulder.y);
        Ok(angle > self.min_elbow_angle && wrist.y < shoulder.y)
    }

    fn name(&self) -> &str {
        "arm-raise"
    }
}

struct HandsOnWaist {
    min_waist_angle: f32,
}

impl PosturePredicate for HandsOnWaist {
    fn check(&self, pose: &Pose) -> Result<bool> {
        let elbow = pose.joint(Joint::LeftElbow)?;
        let shoulder = pose.joint(Joint::LeftShoulder)?;
        let hip = pose.joint(Joint::LeftHip)?;
        let angle = angle_at(elbow, shoulder, hip)?;
        log::debug!("hands-on-waist: waist angle {angle:.0}°");
        Ok(angle > self.min_waist_angle)
    }

    fn name(&self) -> &str {
        "hands-on-waist"
    }
}

struct WristAtHip {
    max_offset: f32,
}

impl PosturePredicate for WristAtHip {
    fn check(&self, pose: &Pose) -> Result<bool> {
        let wrist = pose.joint(Joint::LeftWrist)?;
        let hip = pose.joint(Joint::LeftHip)?;
        Ok((wrist.y - hip.y).abs() < self.max_offset)
    }

    fn name(&self) -> &str {
        "wrist-at-hip"
    }
}

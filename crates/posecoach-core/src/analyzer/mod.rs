//! Posture analyzer — evaluates the active stage's rule against detected poses.
//!
//! The analyzer owns the per-stage detection bookkeeping (when continuous
//! detection began, attempt and fail counters, evaluation cadence). The
//! producer feeds it detection transitions and asks it for a verdict once per
//! cadence interval.

pub mod predicate;

use std::time::{Duration, Instant};

use anyhow::Result;

use crate::pose::Pose;
use crate::stage::{StageDefinition, StageRule};

/// Outcome of one evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    /// Not decided yet; nothing to report.
    Pending,
    Fail { fail_count: u32 },
    /// The fail budget is exhausted; move on regardless of success.
    ForceAdvance { fail_count: u32 },
}

pub struct PostureAnalyzer {
    default_interval: Duration,
    detection_start: Option<Instant>,
    continuous: bool,
    attempts: u32,
    fails: u32,
    last_check: Option<Instant>,
}

impl PostureAnalyzer {
    /// `default_interval` is the cadence for rules without their own.
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            detection_start: None,
            continuous: false,
            attempts: 0,
            fails: 0,
            last_check: None,
        }
    }

    /// A person came into view (or a new stage began while one is in view).
    pub fn on_detected(&mut self, now: Instant) {
        if self.detection_start.is_none() {
            self.detection_start = Some(now);
        }
        self.continuous = true;
    }

    /// Continuous detection broke; timers and attempt counts start over.
    pub fn on_lost(&mut self) {
        self.detection_start = None;
        self.continuous = false;
        self.attempts = 0;
    }

    /// Clear per-stage state when the coordinator advances the session.
    ///
    /// If the person is still in view the new stage's presence timer starts
    /// now, otherwise it starts at the next detection.
    pub fn reset_stage(&mut self, now: Instant, detected: bool) {
        self.detection_start = detected.then_some(now);
        self.continuous = detected;
        self.attempts = 0;
        self.fails = 0;
    }

    pub fn fail_count(&self) -> u32 {
        self.fails
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// How long the current continuous-detection span has lasted.
    pub fn detected_for(&self, now: Instant) -> Option<Duration> {
        self.detection_start.map(|start| now.saturating_duration_since(start))
    }

    /// Evaluate only if the stage's cadence interval has elapsed since the
    /// previous evaluation. Returns `Ok(None)` when not due.
    pub fn evaluate_if_due(&mut self, stage: &StageDefinition, pose: &Pose, now: Instant) -> Result<Option<Verdict>> {
        let interval = stage.rule.check_interval(self.default_interval);
        if let Some(last) = self.last_check {
            if now.saturating_duration_since(last) < interval {
                return Ok(None);
            }
        }
        self.last_check = Some(now);
        self.evaluate(stage, pose, now).map(Some)
    }

    /// Evaluate `stage` against `pose` at time `now`.
    ///
    /// An `Err` means the landmarks were unusable; counters are left untouched.
    pub fn evaluate(&mut self, stage: &StageDefinition, pose: &Pose, now: Instant) -> Result<Verdict> {
        let verdict = match &stage.rule {
            StageRule::ElapsedPresence { hold_ms } => match self.detected_for(now) {
                Some(elapsed) if elapsed >= Duration::from_millis(*hold_ms) => {
                    log::info!("{}: held for {:.1}s", stage.id, elapsed.as_secs_f64());
                    Verdict::Success
                }
                _ => Verdict::Pending,
            },
            StageRule::Geometric { max_fails, .. } => {
                let predicate = stage
                    .geometric_predicate()
                    .ok_or_else(|| anyhow::anyhow!("stage {} has no geometric predicate", stage.id))?;
                if predicate.check(pose)? {
                    self.fails = 0;
                    Verdict::Success
                } else {
                    self.fails += 1;
                    log::info!("{}: {} failed ({}/{})", stage.id, predicate.name(), self.fails, max_fails);
                    if self.fails >= *max_fails {
                        Verdict::ForceAdvance { fail_count: self.fails }
                    } else {
                        Verdict::Fail { fail_count: self.fails }
                    }
                }
            }
            StageRule::AttemptCounted { .. } => {
                if self.continuous {
                    self.attempts += 1;
                    log::info!("{}: attempt {} while continuously detected", stage.id, self.attempts);
                    // The first attempt is always failed to pace the spoken
                    // feedback, independent of pose quality.
                    if self.attempts == 1 {
                        self.fails += 1;
                        Verdict::Fail { fail_count: self.fails }
                    } else {
                        Verdict::Success
                    }
                } else {
                    self.fails += 1;
                    Verdict::Fail { fail_count: self.fails }
                }
            }
        };
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::predicate::{GeometricCheck, PosturePredicate};
    use crate::pose::{Joint, Landmark};
    use std::sync::Arc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn elapsed_stage(hold_ms: u64) -> StageDefinition {
        StageDefinition::new("hold", StageRule::ElapsedPresence { hold_ms })
    }

    fn geometric_stage(max_fails: u32) -> StageDefinition {
        StageDefinition::new(
            "raise",
            StageRule::Geometric { check: GeometricCheck::ArmRaise { min_elbow_angle: 160.0 }, max_fails },
        )
    }

    fn attempt_stage() -> StageDefinition {
        StageDefinition::new("attempts", StageRule::AttemptCounted { check_interval_ms: 5_000 })
    }

    fn arms_down() -> Pose {
        Pose::with_joints(&[
            (Joint::LeftShoulder, Landmark::new(0.6, 0.4)),
            (Joint::LeftElbow, Landmark::new(0.6, 0.5)),
            (Joint::LeftWrist, Landmark::new(0.6, 0.6)),
        ])
    }

    fn arms_up() -> Pose {
        Pose::with_joints(&[
            (Joint::LeftShoulder, Landmark::new(0.6, 0.4)),
            (Joint::LeftElbow, Landmark::new(0.6, 0.3)),
            (Joint::LeftWrist, Landmark::new(0.6, 0.2)),
        ])
    }

    #[test]
    fn elapsed_presence_succeeds_at_threshold() {
        let t0 = Instant::now();
        let stage = elapsed_stage(5_000);
        let mut a = PostureAnalyzer::new(ms(1_000));
        a.on_detected(t0);
        assert_eq!(a.evaluate(&stage, &Pose::default(), t0 + ms(4_999)).unwrap(), Verdict::Pending);
        assert_eq!(a.evaluate(&stage, &Pose::default(), t0 + ms(5_000)).unwrap(), Verdict::Success);
    }

    #[test]
    fn elapsed_presence_loss_just_before_threshold_restarts_timer() {
        let t0 = Instant::now();
        let stage = elapsed_stage(5_000);
        let mut a = PostureAnalyzer::new(ms(1_000));
        a.on_detected(t0);
        a.on_lost();
        let t1 = t0 + ms(4_999);
        a.on_detected(t1);
        assert_eq!(a.evaluate(&stage, &Pose::default(), t0 + ms(5_000)).unwrap(), Verdict::Pending);
        assert_eq!(a.evaluate(&stage, &Pose::default(), t1 + ms(4_999)).unwrap(), Verdict::Pending);
        assert_eq!(a.evaluate(&stage, &Pose::default(), t1 + ms(5_000)).unwrap(), Verdict::Success);
    }

    #[test]
    fn elapsed_presence_never_reports_fail() {
        let t0 = Instant::now();
        let stage = elapsed_stage(5_000);
        let mut a = PostureAnalyzer::new(ms(1_000));
        for i in 0..10 {
            assert_eq!(a.evaluate(&stage, &Pose::default(), t0 + ms(i * 100)).unwrap(), Verdict::Pending);
        }
        assert_eq!(a.fail_count(), 0);
    }

    #[test]
    fn repeated_detection_does_not_move_the_start() {
        let t0 = Instant::now();
        let mut a = PostureAnalyzer::new(ms(1_000));
        a.on_detected(t0);
        a.on_detected(t0 + ms(3_000));
        assert_eq!(a.detected_for(t0 + ms(5_000)), Some(ms(5_000)));
    }

    #[test]
    fn geometric_counts_one_fail_per_cycle_and_forces_at_max() {
        let t0 = Instant::now();
        let stage = geometric_stage(3);
        let mut a = PostureAnalyzer::new(ms(1_000));
        a.on_detected(t0);
        assert_eq!(a.evaluate(&stage, &arms_down(), t0).unwrap(), Verdict::Fail { fail_count: 1 });
        assert_eq!(a.evaluate(&stage, &arms_down(), t0).unwrap(), Verdict::Fail { fail_count: 2 });
        assert_eq!(a.evaluate(&stage, &arms_down(), t0).unwrap(), Verdict::ForceAdvance { fail_count: 3 });
    }

    #[test]
    fn geometric_success_clears_fails() {
        let t0 = Instant::now();
        let stage = geometric_stage(3);
        let mut a = PostureAnalyzer::new(ms(1_000));
        assert_eq!(a.evaluate(&stage, &arms_down(), t0).unwrap(), Verdict::Fail { fail_count: 1 });
        assert_eq!(a.evaluate(&stage, &arms_up(), t0).unwrap(), Verdict::Success);
        assert_eq!(a.fail_count(), 0);
    }

    #[test]
    fn geometric_malformed_landmarks_leave_counters_alone() {
        let t0 = Instant::now();
        let stage = geometric_stage(3);
        let mut a = PostureAnalyzer::new(ms(1_000));
        assert!(a.evaluate(&stage, &Pose::new(vec![]), t0).is_err());
        assert_eq!(a.fail_count(), 0);
        assert_eq!(a.evaluate(&stage, &arms_down(), t0).unwrap(), Verdict::Fail { fail_count: 1 });
    }

    #[test]
    fn custom_predicate_overrides_the_rule_check() {
        struct Always;
        impl PosturePredicate for Always {
            fn check(&self, _: &Pose) -> Result<bool> { Ok(true) }
            fn name(&self) -> &str { "always" }
        }
        let stage = geometric_stage(3).with_predicate(Arc::new(Always));
        let mut a = PostureAnalyzer::new(ms(1_000));
        assert_eq!(a.evaluate(&stage, &arms_down(), Instant::now()).unwrap(), Verdict::Success);
    }

    #[test]
    fn attempt_counted_fails_first_then_succeeds() {
        let t0 = Instant::now();
        let stage = attempt_stage();
        let mut a = PostureAnalyzer::new(ms(1_000));
        a.on_detected(t0);
        assert_eq!(a.evaluate(&stage, &Pose::default(), t0).unwrap(), Verdict::Fail { fail_count: 1 });
        assert_eq!(a.evaluate(&stage, &Pose::default(), t0).unwrap(), Verdict::Success);
        assert_eq!(a.evaluate(&stage, &Pose::default(), t0).unwrap(), Verdict::Success);
        assert_eq!(a.attempts(), 3);
    }

    #[test]
    fn attempt_counted_loss_resets_attempts() {
        let t0 = Instant::now();
        let stage = attempt_stage();
        let mut a = PostureAnalyzer::new(ms(1_000));
        a.on_detected(t0);
        assert!(matches!(a.evaluate(&stage, &Pose::default(), t0).unwrap(), Verdict::Fail { .. }));
        a.on_lost();
        assert_eq!(a.attempts(), 0);
        // Not continuously detected: fails without counting an attempt.
        assert!(matches!(a.evaluate(&stage, &Pose::default(), t0).unwrap(), Verdict::Fail { .. }));
        assert_eq!(a.attempts(), 0);
        a.on_detected(t0 + ms(10));
        assert!(matches!(a.evaluate(&stage, &Pose::default(), t0).unwrap(), Verdict::Fail { .. }));
        assert_eq!(a.evaluate(&stage, &Pose::default(), t0).unwrap(), Verdict::Success);
    }

    #[test]
    fn cadence_is_stage_specific() {
        let t0 = Instant::now();
        let mut a = PostureAnalyzer::new(ms(1_000));
        a.on_detected(t0);
        let stage = attempt_stage();
        assert!(a.evaluate_if_due(&stage, &Pose::default(), t0).unwrap().is_some());
        assert!(a.evaluate_if_due(&stage, &Pose::default(), t0 + ms(1_000)).unwrap().is_none());
        assert!(a.evaluate_if_due(&stage, &Pose::default(), t0 + ms(4_999)).unwrap().is_none());
        assert!(a.evaluate_if_due(&stage, &Pose::default(), t0 + ms(5_000)).unwrap().is_some());

        let stage = elapsed_stage(5_000);
        assert!(a.evaluate_if_due(&stage, &Pose::default(), t0 + ms(5_999)).unwrap().is_none());
        assert!(a.evaluate_if_due(&stage, &Pose::default(), t0 + ms(6_000)).unwrap().is_some());
    }

    #[test]
    fn reset_stage_restarts_timer_for_person_in_view() {
        let t0 = Instant::now();
        let mut a = PostureAnalyzer::new(ms(1_000));
        a.on_detected(t0);
        a.reset_stage(t0 + ms(7_000), true);
        assert_eq!(a.detected_for(t0 + ms(8_000)), Some(ms(1_000)));
        a.reset_stage(t0 + ms(9_000), false);
        assert_eq!(a.detected_for(t0 + ms(10_000)), None);
    }

    #[test]
    fn stages_sharing_an_id_keep_their_own_checks() {
        let t0 = Instant::now();
        let raise = StageDefinition::new(
            "reach",
            StageRule::Geometric { check: GeometricCheck::ArmRaise { min_elbow_angle: 160.0 }, max_fails: 3 },
        );
        let at_hip = StageDefinition::new(
            "reach",
            StageRule::Geometric { check: GeometricCheck::WristAtHip { max_offset: 0.05 }, max_fails: 3 },
        );
        let pose = Pose::with_joints(&[
            (Joint::LeftShoulder, Landmark::new(0.6, 0.4)),
            (Joint::LeftElbow, Landmark::new(0.62, 0.52)),
            (Joint::LeftWrist, Landmark::new(0.63, 0.65)),
            (Joint::LeftHip, Landmark::new(0.57, 0.65)),
        ]);
        let mut a = PostureAnalyzer::new(ms(1_000));
        assert_eq!(a.evaluate(&raise, &pose, t0).unwrap(), Verdict::Fail { fail_count: 1 });
        a.reset_stage(t0, true);
        assert_eq!(a.evaluate(&at_hip, &pose, t0).unwrap(), Verdict::Success);
    }
}

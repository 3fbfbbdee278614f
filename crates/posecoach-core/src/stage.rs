//! Stage definitions — the parameterized table a session walks through.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analyzer::predicate::{GeometricCheck, PosturePredicate};

/// How a stage decides success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StageRule {
    /// Succeeds once the person has been continuously detected for `hold_ms`.
    ElapsedPresence {
        #[serde(default = "default_hold_ms")]
        hold_ms: u64,
    },
    /// Succeeds when the geometric check passes; force-advances after
    /// `max_fails` failed evaluations.
    Geometric {
        check: GeometricCheck,
        #[serde(default = "default_max_fails")]
        max_fails: u32,
    },
    /// Counts attempts while continuously detected. The first attempt is
    /// reported as a fail to pace the spoken feedback; later ones succeed.
    AttemptCounted {
        #[serde(default = "default_attempt_interval_ms")]
        check_interval_ms: u64,
    },
}

fn default_hold_ms() -> u64 { 5_000 }
fn default_max_fails() -> u32 { 3 }
fn default_attempt_interval_ms() -> u64 { 5_000 }

impl StageRule {
    /// Elapsed-presence stages never surface fail events.
    pub fn emits_fail(&self) -> bool {
        !matches!(self, StageRule::ElapsedPresence { .. })
    }

    /// Evaluation cadence for this rule, given the session-wide default.
    pub fn check_interval(&self, default: Duration) -> Duration {
        match self {
            StageRule::AttemptCounted { check_interval_ms } => Duration::from_millis(*check_interval_ms),
            _ => default,
        }
    }
}

impl fmt::Display for StageRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageRule::ElapsedPresence { hold_ms } => write!(f, "elapsed-presence({hold_ms}ms)"),
            StageRule::Geometric { check, max_fails } => write!(f, "geometric({check}, max {max_fails} fails)"),
            StageRule::AttemptCounted { check_interval_ms } => {
                write!(f, "attempt-counted(every {check_interval_ms}ms)")
            }
        }
    }
}

/// Audio cue ids for one stage. Ids name clips in the feedback clip directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageCues {
    #[serde(default)]
    pub intro: Option<String>,
    #[serde(default)]
    pub success: Option<String>,
    #[serde(default)]
    pub fail: Option<String>,
    /// Whether the fail cue is actually spoken for this stage.
    #[serde(default)]
    pub voice_fail: bool,
}

/// One posture-verification step.
#[derive(Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: String,
    pub rule: StageRule,
    #[serde(default)]
    pub cues: StageCues,
    /// Ask the producer to rewind the demonstration clip after a failure.
    #[serde(default)]
    pub replay_on_fail: bool,
    /// Overrides the predicate built from a geometric rule's check.
    #[serde(skip)]
    pub predicate: Option<Arc<dyn PosturePredicate>>,
}

impl StageDefinition {
    pub fn new(id: impl Into<String>, rule: StageRule) -> Self {
        Self {
            id: id.into(),
            rule,
            cues: StageCues::default(),
            replay_on_fail: false,
            predicate: None,
        }
    }

    pub fn with_cues(mut self, cues: StageCues) -> Self {
        self.cues = cues;
        self
    }

    pub fn with_predicate(mut self, predicate: Arc<dyn PosturePredicate>) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// The predicate used for geometric evaluation, if this stage has one.
    pub fn geometric_predicate(&self) -> Option<Arc<dyn PosturePredicate>> {
        if let Some(p) = &self.predicate {
            return Some(p.clone());
        }
        match &self.rule {
            StageRule::Geometric { check, .. } => Some(check.build()),
            _ => None,
        }
    }
}

impl fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDefinition")
            .field("id", &self.id)
            .field("rule", &self.rule)
            .field("cues", &self.cues)
            .field("replay_on_fail", &self.replay_on_fail)
            .field("predicate", &self.predicate.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

/// Where the coordinator is in the stage list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StagePosition {
    Active(usize),
    Done,
}

impl StagePosition {
    pub fn index(self) -> Option<usize> {
        match self {
            StagePosition::Active(i) => Some(i),
            StagePosition::Done => None,
        }
    }

    /// Position after completing the active stage of a `len`-stage session.
    pub fn next(self, len: usize) -> StagePosition {
        match self {
            StagePosition::Active(i) if i + 1 < len => StagePosition::Active(i + 1),
            _ => StagePosition::Done,
        }
    }
}

impl fmt::Display for StagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StagePosition::Active(i) => write!(f, "stage #{i}"),
            StagePosition::Done => write!(f, "done"),
        }
    }
}

/// Reject stage tables with repeated ids; cues and logs refer to stages by id.
pub fn validate_stages(stages: &[StageDefinition]) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for stage in stages {
        if !seen.insert(stage.id.as_str()) {
            anyhow::bail!("duplicate stage id {:?}", stage.id);
        }
    }
    Ok(())
}

/// The three-posture routine the device ships with.
pub fn default_stages() -> Vec<StageDefinition> {
    vec![
        StageDefinition::new("posture1", StageRule::ElapsedPresence { hold_ms: 5_000 }).with_cues(StageCues {
            intro: Some("0005".into()),
            success: Some("0006".into()),
            fail: Some("0013".into()),
            voice_fail: false,
        }),
        StageDefinition::new("posture2", StageRule::ElapsedPresence { hold_ms: 5_000 }).with_cues(StageCues {
            intro: Some("0004".into()),
            success: Some("0006".into()),
            fail: Some("0014".into()),
            voice_fail: false,
        }),
        StageDefinition {
            replay_on_fail: true,
            ..StageDefinition::new("posture3", StageRule::AttemptCounted { check_interval_ms: 5_000 })
                .with_cues(StageCues {
                    intro: Some("0005".into()),
                    success: Some("0008".into()),
                    fail: Some("0011".into()),
                    voice_fail: true,
                })
        },
    ]
}

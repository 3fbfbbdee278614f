//! Config — nested sections for session timing, media, feedback, voice and stages.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::stage::{default_stages, validate_stages, StageDefinition};

// ── Sections ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long the coordinator blocks on its inbox before re-checking the
    /// cancellation signal.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on waiting for the producer thread at shutdown.
    #[serde(default = "default_shutdown_join_timeout_ms")]
    pub shutdown_join_timeout_ms: u64,
    /// Pause between a stage's success cue and the next stage's intro.
    #[serde(default = "default_intro_delay_ms")]
    pub intro_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_join_timeout_ms: default_shutdown_join_timeout_ms(),
            intro_delay_ms: default_intro_delay_ms(),
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_join_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_join_timeout_ms)
    }

    pub fn intro_delay(&self) -> Duration {
        Duration::from_millis(self.intro_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Default evaluation cadence for stages without their own.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Minimum spacing between `pose-lost` notices.
    #[serde(default = "default_lost_notice_interval_ms")]
    pub lost_notice_interval_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            lost_notice_interval_ms: default_lost_notice_interval_ms(),
        }
    }
}

impl DetectionConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn lost_notice_interval(&self) -> Duration {
        Duration::from_millis(self.lost_notice_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default)]
    pub camera_index: u32,
    /// Extra camera indices tried after `camera_index`.
    #[serde(default = "default_camera_fallbacks")]
    pub camera_fallbacks: u32,
    #[serde(default = "default_clips")]
    pub clips: Vec<PathBuf>,
    #[serde(default = "default_max_replays")]
    pub max_replays: u32,
    #[serde(default = "default_replay_delay_ms")]
    pub replay_delay_ms: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            camera_fallbacks: default_camera_fallbacks(),
            clips: default_clips(),
            max_replays: default_max_replays(),
            replay_delay_ms: default_replay_delay_ms(),
        }
    }
}

impl MediaConfig {
    pub fn replay_delay(&self) -> Duration {
        Duration::from_millis(self.replay_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default = "default_feedback_backend")]
    pub backend: String,
    /// Directory holding the numbered cue clips (`0001.mp3`, ...).
    #[serde(default)]
    pub clip_dir: Option<PathBuf>,
    #[serde(default = "default_player")]
    pub player: String,
    #[serde(default = "default_player_args")]
    pub player_args: Vec<String>,
    /// Pending cues beyond this are dropped with a warning.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_welcome_cues")]
    pub welcome: Vec<String>,
    #[serde(default = "default_complete_cues")]
    pub complete: Vec<String>,
    #[serde(default = "default_camera_error_cue")]
    pub camera_error: Option<String>,
    #[serde(default)]
    pub pose_detected: Option<String>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            backend: default_feedback_backend(),
            clip_dir: None,
            player: default_player(),
            player_args: default_player_args(),
            queue_depth: default_queue_depth(),
            welcome: default_welcome_cues(),
            complete: default_complete_cues(),
            camera_error: default_camera_error_cue(),
            pose_detected: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_voice_backend")]
    pub backend: String,
    #[serde(default = "default_start_phrases")]
    pub start_phrases: Vec<String>,
    #[serde(default = "default_stop_phrases")]
    pub stop_phrases: Vec<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            backend: default_voice_backend(),
            start_phrases: default_start_phrases(),
            stop_phrases: default_stop_phrases(),
        }
    }
}

// ── Top-level config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default = "default_stages")]
    pub stages: Vec<StageDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            detection: DetectionConfig::default(),
            media: MediaConfig::default(),
            feedback: FeedbackConfig::default(),
            voice: VoiceConfig::default(),
            stages: default_stages(),
        }
    }
}

// ── Defaults ───────────────────────────────────────────────────────────────

fn default_poll_interval_ms() -> u64 { 500 }
fn default_shutdown_join_timeout_ms() -> u64 { 5_000 }
fn default_intro_delay_ms() -> u64 { 2_000 }
fn default_check_interval_ms() -> u64 { 1_000 }
fn default_lost_notice_interval_ms() -> u64 { 5_000 }
fn default_camera_fallbacks() -> u32 { 3 }
fn default_clips() -> Vec<PathBuf> {
    vec!["posture1.mp4".into(), "posture2.mp4".into(), "posture3.mp4".into()]
}
fn default_max_replays() -> u32 { 3 }
fn default_replay_delay_ms() -> u64 { 3_000 }
fn default_feedback_backend() -> String { "log".into() }
fn default_player() -> String { "mpv".into() }
fn default_player_args() -> Vec<String> { vec!["--no-video".into(), "--really-quiet".into()] }
fn default_queue_depth() -> usize { 16 }
fn default_welcome_cues() -> Vec<String> { vec!["0001".into(), "0002".into(), "0003".into()] }
fn default_complete_cues() -> Vec<String> { vec!["0008".into(), "0009".into()] }
fn default_camera_error_cue() -> Option<String> { Some("0010".into()) }
fn default_voice_backend() -> String { "stdin".into() }
fn default_start_phrases() -> Vec<String> { vec!["운동하자".into(), "start".into()] }
fn default_stop_phrases() -> Vec<String> { vec!["종료".into(), "stop".into()] }

// ── Load / save ────────────────────────────────────────────────────────────

/// `config.json` next to the binary.
pub fn config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("config.json")))
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

/// Load config from config.json next to the binary.
pub fn load_config() -> Config {
    load_config_from(&config_path())
}

/// Load config from `path`, falling back to defaults when the file is missing
/// or unparseable. Relative clip paths resolve against the file's directory.
pub fn load_config_from(path: &Path) -> Config {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => {
            log::info!("No config at {:?}, using defaults", path);
            return Config::default();
        }
    };

    let mut cfg = match serde_json::from_str::<Config>(&contents) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::warn!("Failed to parse {:?}: {e}. Using defaults.", path);
            return Config::default();
        }
    };

    if cfg.stages.is_empty() {
        log::warn!("Config lists no stages; using the default routine");
        cfg.stages = default_stages();
    } else if let Err(e) = validate_stages(&cfg.stages) {
        log::warn!("Invalid stage list in {:?}: {e}. Using the default routine.", path);
        cfg.stages = default_stages();
    }

    if let Some(base) = path.parent() {
        for clip in cfg.media.clips.iter_mut() {
            if clip.is_relative() {
                *clip = base.join(&*clip);
            }
        }
        if let Some(dir) = cfg.feedback.clip_dir.as_mut() {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }
    cfg
}

pub fn save_config(cfg: &Config) {
    save_config_to(cfg, &config_path());
}

pub fn save_config_to(cfg: &Config, path: &Path) {
    match serde_json::to_string_pretty(cfg) {
        Ok(contents) => {
            if let Err(e) = std::fs::write(path, contents) {
                log::error!("Failed to write {:?}: {e}", path);
            }
        }
        Err(e) => log::error!("Failed to serialize config: {e}"),
    }
}

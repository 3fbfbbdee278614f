//! Command feedback — plays numbered clips through an external player.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context};

use super::{Cue, FeedbackSink};
use crate::config::FeedbackConfig;

pub struct CommandFeedback {
    player: String,
    args: Vec<String>,
    clip_dir: PathBuf,
}

impl CommandFeedback {
    pub fn new(player: impl Into<String>, args: Vec<String>, clip_dir: impl Into<PathBuf>) -> Self {
        Self { player: player.into(), args, clip_dir: clip_dir.into() }
    }

    pub fn from_config(cfg: &FeedbackConfig) -> anyhow::Result<Self> {
        let dir = cfg.clip_dir.as_ref().context("feedback.clip_dir is not set")?;
        if !dir.is_dir() {
            bail!("clip directory {} does not exist", dir.display());
        }
        Ok(Self::new(cfg.player.clone(), cfg.player_args.clone(), dir.clone()))
    }
}

impl FeedbackSink for CommandFeedback {
    fn play(&self, cue: &Cue) -> anyhow::Result<()> {
        let Some(id) = cue.clip.as_deref() else {
            log::debug!("[feedback] {cue} has no clip");
            return Ok(());
        };
        let path = find_clip(&self.clip_dir, id)
            .with_context(|| format!("no clip for '{id}' in {}", self.clip_dir.display()))?;
        log::info!("[feedback] {cue} → {}", path.display());
        let status = Command::new(&self.player)
            .args(&self.args)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .with_context(|| format!("failed to launch {}", self.player))?;
        if !status.success() {
            bail!("{} exited with {status}", self.player);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "command"
    }
}

/// Resolve clip `id` inside `dir`: `<id>.mp3`, `<id>.MP3`, the id without
/// leading zeros, then any file whose name contains the id.
pub fn find_clip(dir: &Path, id: &str) -> Option<PathBuf> {
    let trimmed = id.trim_start_matches('0');
    let mut candidates = vec![format!("{id}.mp3"), format!("{id}.MP3")];
    if !trimmed.is_empty() && trimmed != id {
        candidates.push(format!("{trimmed}.mp3"));
    }
    for name in &candidates {
        let path = dir.join(name);
        if path.is_file() {
            return Some(path);
        }
    }

    let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.contains(id)))
        .collect();
    matches.sort();
    matches.into_iter().next()
}

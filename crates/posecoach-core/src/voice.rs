//! Voice commands — recognized phrases mapped to start/stop.
//!
//! Speech recognition itself is external; a [`CommandSource`] yields the
//! recognized text and [`VoiceCommand::parse`] matches it against the
//! configured phrase lists.

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Result;

use crate::config::VoiceConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceCommand {
    Start,
    Stop,
    Unknown(String),
}

impl VoiceCommand {
    /// Substring match, case-insensitive. Stop phrases win when both match.
    pub fn parse(text: &str, cfg: &VoiceConfig) -> Self {
        let text = text.trim();
        let lowered = text.to_lowercase();
        let hit = |phrases: &[String]| {
            phrases.iter().any(|p| !p.trim().is_empty() && lowered.contains(&p.trim().to_lowercase()))
        };
        if hit(&cfg.stop_phrases) {
            VoiceCommand::Stop
        } else if hit(&cfg.start_phrases) {
            VoiceCommand::Start
        } else {
            VoiceCommand::Unknown(text.to_string())
        }
    }
}

/// Trait for recognized-text backends.
pub trait CommandSource: Send {
    /// Block until the next utterance. `Ok(None)` means the source is exhausted.
    fn next_utterance(&mut self) -> Result<Option<String>>;
    fn name(&self) -> &str;
}

/// Reads one utterance per line from standard input.
pub struct StdinCommandSource;

impl CommandSource for StdinCommandSource {
    fn next_utterance(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = std::io::stdin().lock().read_line(&mut line)?;
        Ok((n > 0).then(|| line.trim_end().to_string()))
    }

    fn name(&self) -> &str {
        "stdin"
    }
}

/// Replays a fixed list of utterances, pausing before each one.
pub struct ScriptedCommandSource {
    lines: VecDeque<String>,
    delay: Duration,
}

impl ScriptedCommandSource {
    pub fn new<I, S>(lines: I, delay: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { lines: lines.into_iter().map(Into::into).collect(), delay }
    }
}

impl CommandSource for ScriptedCommandSource {
    fn next_utterance(&mut self) -> Result<Option<String>> {
        if self.lines.is_empty() {
            return Ok(None);
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(self.lines.pop_front())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Create a command source based on config.
pub fn create_command_source(cfg: &VoiceConfig) -> Result<Box<dyn CommandSource>> {
    match cfg.backend.as_str() {
        "stdin" => Ok(Box::new(StdinCommandSource)),
        other => anyhow::bail!("Unknown voice backend: {other}"),
    }
}

/// Read utterances on a background thread and deliver parsed commands.
///
/// The channel disconnects when the source is exhausted or fails.
pub fn spawn_listener(mut source: Box<dyn CommandSource>, cfg: VoiceConfig) -> Result<mpsc::Receiver<VoiceCommand>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("voice".into())
        .spawn(move || {
            log::info!("[voice] listening on {}", source.name());
            loop {
                let text = match source.next_utterance() {
                    Ok(Some(text)) => text,
                    Ok(None) => {
                        log::info!("[voice] {} exhausted", source.name());
                        break;
                    }
                    Err(e) => {
                        log::error!("[voice] {} failed: {e:#}", source.name());
                        break;
                    }
                };
                if text.trim().is_empty() {
                    continue;
                }
                let cmd = VoiceCommand::parse(&text, &cfg);
                if let VoiceCommand::Unknown(ref t) = cmd {
                    log::info!("[voice] unrecognized: {t:?}");
                }
                if tx.send(cmd).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

//! posecoach — Voice-started posture coaching sessions
//!
//! Voice command → session (camera → landmarks → stages) → audio feedback
//!
//! `--simulate` drives a session with the scripted camera and a scripted
//! "start" command. `--once` exits after the first session.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;

use posecoach_core::config::{self, Config};
use posecoach_core::feedback::{self, Cue, FeedbackDispatcher, FeedbackEvent};
use posecoach_core::media::scripted::ScriptedBackend;
use posecoach_core::media::MediaBackend;
use posecoach_core::voice::{self, CommandSource, ScriptedCommandSource, VoiceCommand};
use posecoach_core::SessionRunner;

const COMMAND_POLL: Duration = Duration::from_millis(100);

// ── Flags ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    simulate: bool,
    once: bool,
}

fn parse_flags() -> Flags {
    let mut flags = Flags::default();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--simulate" | "-s" => flags.simulate = true,
            "--once" => flags.once = true,
            other => log::warn!("Ignoring unknown argument: {other}"),
        }
    }
    flags
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Log to both stderr and a file next to the exe for diagnostics.
    let log_path = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("posecoach.log")));
    let log_file = log_path.as_ref().and_then(|p| std::fs::File::create(p).ok());

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Some(file) = log_file {
        use std::io::Write;
        let file = std::sync::Mutex::new(file);
        builder.format(move |buf, record| {
            let line = format!(
                "[{} {} {}] {}\n",
                buf.timestamp_seconds(),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args(),
            );
            let _ = buf.write_all(line.as_bytes());
            if let Ok(mut f) = file.lock() {
                let _ = f.write_all(line.as_bytes());
                let _ = f.flush();
            }
            Ok(())
        });
    }
    builder.init();

    if let Err(e) = run() {
        log::error!("Fatal: {e:#}");
        eprintln!("Error: {e:#}");
        return Err(e);
    }
    Ok(())
}

fn run() -> Result<()> {
    log::info!("─── posecoach v{} starting ───", env!("CARGO_PKG_VERSION"));

    let flags = parse_flags();
    let config_path = config::config_path();
    let first_run = !config_path.exists();
    let cfg = config::load_config();
    if first_run {
        config::save_config(&cfg);
        log::info!("Wrote default config to {:?}", config_path);
    }
    log::info!(
        "Config: feedback={}, voice={}, camera={}, {} stages, {} clips",
        cfg.feedback.backend,
        cfg.voice.backend,
        cfg.media.camera_index,
        cfg.stages.len(),
        cfg.media.clips.len()
    );

    let sink = feedback::create_feedback(&cfg.feedback)?;
    let feedback = FeedbackDispatcher::spawn(sink, cfg.feedback.queue_depth)?;

    let backend = media_backend(flags)?;
    let source = command_source(&cfg, flags)?;
    let commands = voice::spawn_listener(source, cfg.voice.clone())?;

    let runner = Arc::new(SessionRunner::new(cfg, backend, feedback.clone()));
    log::info!("Ready, say one of the start phrases to begin");
    command_loop(runner, &feedback, commands, flags.once)
}

/// Image decoding and pose inference are provided by a host integration;
/// this binary only ships the scripted backend.
fn media_backend(flags: Flags) -> Result<Arc<dyn MediaBackend>> {
    if !flags.simulate {
        anyhow::bail!("no camera backend is built into this binary; run with --simulate");
    }
    log::info!("Simulation mode: scripted camera at ~30 fps");
    Ok(Arc::new(
        ScriptedBackend::new().with_frame_interval(Duration::from_millis(33)).with_clip_frames(90),
    ))
}

fn command_source(cfg: &Config, flags: Flags) -> Result<Box<dyn CommandSource>> {
    if flags.simulate {
        let start = cfg.voice.start_phrases.first().cloned().unwrap_or_else(|| "start".into());
        return Ok(Box::new(ScriptedCommandSource::new([start], Duration::from_secs(1))));
    }
    voice::create_command_source(&cfg.voice)
}

/// The runner is reset here, before the thread exists, so a stop command
/// that arrives while the session thread is starting still cancels it.
fn spawn_session(runner: Arc<SessionRunner>) -> Result<JoinHandle<bool>> {
    runner.prepare();
    let handle = std::thread::Builder::new()
        .name("session".into())
        .spawn(move || runner.start_prepared(&runner.config().stages))?;
    Ok(handle)
}

fn play_cues(feedback: &FeedbackDispatcher, event: FeedbackEvent, ids: &[String]) {
    for id in ids {
        feedback.play(Cue::new(event, Some(id.as_str())));
    }
}

/// Start sessions on command and stop them again. Returns when the user says
/// a stop phrase while idle, the command source closes while idle, or after
/// the first session with `once`.
fn command_loop(
    runner: Arc<SessionRunner>,
    feedback: &FeedbackDispatcher,
    commands: Receiver<VoiceCommand>,
    once: bool,
) -> Result<()> {
    let control = runner.control();
    let mut active: Option<JoinHandle<bool>> = None;
    let mut listening = true;

    loop {
        if active.as_ref().is_some_and(|h| h.is_finished()) {
            let succeeded = active.take().map(|h| h.join().unwrap_or(false)).unwrap_or(false);
            if succeeded {
                log::info!("Session complete");
                play_cues(feedback, FeedbackEvent::SessionComplete, &runner.config().feedback.complete);
            } else {
                log::warn!("Session ended without completing every stage");
            }
            if once {
                return Ok(());
            }
        }

        if !listening {
            if active.is_none() {
                log::info!("Command source closed, exiting");
                return Ok(());
            }
            std::thread::sleep(COMMAND_POLL);
            continue;
        }

        match commands.recv_timeout(COMMAND_POLL) {
            Ok(VoiceCommand::Start) => {
                if active.is_some() {
                    log::info!("Session already running");
                } else {
                    log::info!("Starting session");
                    play_cues(feedback, FeedbackEvent::Welcome, &runner.config().feedback.welcome);
                    active = Some(spawn_session(runner.clone())?);
                }
            }
            Ok(VoiceCommand::Stop) => {
                if active.is_some() {
                    control.request_shutdown();
                } else {
                    log::info!("Stop requested while idle, exiting");
                    return Ok(());
                }
            }
            Ok(VoiceCommand::Unknown(_)) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => listening = false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Mutex};
    use std::time::Instant;

    use posecoach_core::feedback::FeedbackSink;
    use posecoach_core::{StageDefinition, StageRule};

    #[derive(Default)]
    struct Recorder {
        played: Mutex<Vec<Cue>>,
    }

    impl Recorder {
        fn count(&self, event: FeedbackEvent) -> usize {
            self.played.lock().unwrap().iter().filter(|c| c.event == event).count()
        }

        fn wait_for(&self, event: FeedbackEvent, n: usize) {
            let deadline = Instant::now() + Duration::from_secs(3);
            while self.count(event) < n && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            assert_eq!(self.count(event), n, "{event} cues");
        }
    }

    impl FeedbackSink for Recorder {
        fn play(&self, cue: &Cue) -> Result<()> {
            self.played.lock().unwrap().push(cue.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    fn quick_config() -> Config {
        let mut cfg = Config::default();
        cfg.session.poll_interval_ms = 20;
        cfg.session.intro_delay_ms = 0;
        cfg.session.shutdown_join_timeout_ms = 1_000;
        cfg.detection.check_interval_ms = 5;
        cfg.media.replay_delay_ms = 0;
        cfg.media.camera_fallbacks = 0;
        cfg.feedback.welcome = vec!["w1".into(), "w2".into()];
        cfg.feedback.complete = vec!["done".into()];
        cfg.stages = vec![StageDefinition::new("quick", StageRule::ElapsedPresence { hold_ms: 10 })];
        cfg
    }

    #[test]
    fn welcome_plays_on_every_start() {
        let sink = Arc::new(Recorder::default());
        let feedback = FeedbackDispatcher::spawn(sink.clone(), 32).unwrap();
        let backend = ScriptedBackend::new().with_frame_interval(Duration::from_millis(1));
        let runner = Arc::new(SessionRunner::new(quick_config(), Arc::new(backend), feedback.clone()));
        let (tx, rx) = mpsc::channel();
        let commands = std::thread::spawn(move || command_loop(runner, &feedback, rx, false));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.count(FeedbackEvent::Welcome), 0);

        tx.send(VoiceCommand::Start).unwrap();
        sink.wait_for(FeedbackEvent::SessionComplete, 1);
        assert_eq!(sink.count(FeedbackEvent::Welcome), 2);

        tx.send(VoiceCommand::Start).unwrap();
        sink.wait_for(FeedbackEvent::SessionComplete, 2);
        assert_eq!(sink.count(FeedbackEvent::Welcome), 4);

        drop(tx);
        commands.join().unwrap().unwrap();
    }

    #[test]
    fn stop_right_after_start_cancels_the_session() {
        let sink = Arc::new(Recorder::default());
        let feedback = FeedbackDispatcher::spawn(sink.clone(), 32).unwrap();
        let backend = ScriptedBackend::new().with_frame_interval(Duration::from_millis(1));
        let mut cfg = quick_config();
        cfg.stages = vec![StageDefinition::new("forever", StageRule::ElapsedPresence { hold_ms: 60_000 })];
        let runner = Arc::new(SessionRunner::new(cfg, Arc::new(backend), feedback.clone()));
        let (tx, rx) = mpsc::channel();
        tx.send(VoiceCommand::Start).unwrap();
        tx.send(VoiceCommand::Stop).unwrap();
        drop(tx);

        let started = Instant::now();
        command_loop(runner, &feedback, rx, true).unwrap();
        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
        assert_eq!(sink.count(FeedbackEvent::SessionComplete), 0);
    }
}

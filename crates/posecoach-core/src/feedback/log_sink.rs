//! Log-only and silent feedback sinks.

use super::{Cue, FeedbackSink};

/// Writes each cue to the log instead of playing audio.
pub struct LogFeedback;

impl FeedbackSink for LogFeedback {
    fn play(&self, cue: &Cue) -> anyhow::Result<()> {
        log::info!("[feedback] {cue}");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Discards every cue.
pub struct SilentFeedback;

impl FeedbackSink for SilentFeedback {
    fn play(&self, _cue: &Cue) -> anyhow::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "silent"
    }
}

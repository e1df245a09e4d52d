//! Stimulus adapter for hosts without audio or haptic hardware.
//!
//! Every cue is reported through `tracing` with the channels a real output
//! stage would drive, and a running count is kept for the session summary.

use experiment_core::orchestrator::{Feedback, StimulusSink};
use experiment_core::trials::CueType;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct LoggedStimulus {
    cues_delivered: usize,
    background: bool,
}

impl LoggedStimulus {
    /// Cues that produced an actual stimulus.
    #[must_use]
    pub const fn cues_delivered(&self) -> usize {
        self.cues_delivered
    }
}

impl StimulusSink for LoggedStimulus {
    fn emit(&mut self, cue: CueType, effect_level: u8) {
        if cue == CueType::None {
            debug!(effect_level, "silent trial");
            return;
        }
        self.cues_delivered += 1;
        info!(
            %cue,
            audio = cue.has_audio(),
            tactile = cue.has_tactile(),
            effect_level,
            "cue delivered"
        );
    }

    fn feedback(&mut self, feedback: Feedback) {
        info!(?feedback, "feedback sound");
    }

    fn background(&mut self, enabled: bool) {
        if self.background != enabled {
            self.background = enabled;
            info!(enabled, "background noise");
        }
    }
}

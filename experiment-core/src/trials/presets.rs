//! Named session presets offered to the operator.
//!
//! Each preset pins a [`SessionMode`], a [`RobotSelection`] policy and the
//! [`TrialPlan`] the generator runs with. Hosts may override the timing
//! fields of the plan from configuration before generating.

use core::fmt;
use core::str::FromStr;
use core::time::Duration;

use thiserror::Error;

use super::{CueType, IntervalRange, TrialPlan};
use crate::orchestrator::{RobotSelection, SessionMode};

/// Trailing margin the timing protocols leave after the final trial.
pub const TIMING_END_OFFSET: Duration = Duration::from_secs(10);
/// Leading margin before the first trial in every preset.
pub const DEFAULT_START_OFFSET: Duration = Duration::from_secs(30);
/// Trailing margin of the paced protocols.
pub const PACED_END_OFFSET: Duration = Duration::from_secs(30);
/// Length of the single-cue paced sessions.
pub const CUE_SESSION_DURATION: Duration = Duration::from_secs(180);

/// Effect levels used by the full timing experiment.
const TIMING_EFFECT_LEVELS: [u8; 7] = [0, 1, 2, 3, 4, 5, 6];
/// Shortest and longest confirmation holds, used by training and test.
const BISECTION_EFFECT_LEVELS: [u8; 2] = [0, 6];

/// Session kinds available from the operator console.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SessionPreset {
    Training,
    Test,
    Timing,
    PipAndPop,
    PipAndPopPractice,
    CueNone,
    CueAudio,
    CueTactile,
    CueMulti,
}

/// Every preset in menu order.
#[must_use]
pub const fn all_presets() -> &'static [SessionPreset] {
    &[
        SessionPreset::Training,
        SessionPreset::Test,
        SessionPreset::Timing,
        SessionPreset::PipAndPop,
        SessionPreset::PipAndPopPractice,
        SessionPreset::CueNone,
        SessionPreset::CueAudio,
        SessionPreset::CueTactile,
        SessionPreset::CueMulti,
    ]
}

impl SessionPreset {
    /// Stable identifier accepted on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            SessionPreset::Training => "training",
            SessionPreset::Test => "test",
            SessionPreset::Timing => "timing",
            SessionPreset::PipAndPop => "pip-and-pop",
            SessionPreset::PipAndPopPractice => "pip-and-pop-practice",
            SessionPreset::CueNone => "cue-none",
            SessionPreset::CueAudio => "cue-audio",
            SessionPreset::CueTactile => "cue-tactile",
            SessionPreset::CueMulti => "cue-multi",
        }
    }

    /// One-line description for help output.
    #[must_use]
    pub const fn summary(self) -> &'static str {
        match self {
            SessionPreset::Training => "single robot, detection with short/long feedback",
            SessionPreset::Test => "single robot, detection then short/long response",
            SessionPreset::Timing => "all robots, detection then response over 7 hold lengths",
            SessionPreset::PipAndPop => "all robots, paced pauses over every cue, 10 repeats",
            SessionPreset::PipAndPopPractice => "all robots, paced pauses over every cue, 2 repeats",
            SessionPreset::CueNone => "180 s paced session without cues",
            SessionPreset::CueAudio => "180 s paced session with audio cues",
            SessionPreset::CueTactile => "180 s paced session with tactile cues",
            SessionPreset::CueMulti => "180 s paced session with audio-tactile cues",
        }
    }

    #[must_use]
    pub const fn mode(self) -> SessionMode {
        match self {
            SessionPreset::Training => SessionMode::Training,
            SessionPreset::Test | SessionPreset::Timing => SessionMode::Timed,
            _ => SessionMode::Paced,
        }
    }

    #[must_use]
    pub const fn selection(self) -> RobotSelection {
        match self {
            SessionPreset::Training | SessionPreset::Test => RobotSelection::Single,
            _ => RobotSelection::PerTrial,
        }
    }

    /// Builds the default trial plan for this preset.
    #[must_use]
    pub fn plan(self) -> TrialPlan {
        match self {
            SessionPreset::Training | SessionPreset::Test => {
                timing_plan(7, vec![CueType::None], BISECTION_EFFECT_LEVELS.to_vec())
            }
            SessionPreset::Timing => timing_plan(
                13,
                vec![CueType::None, CueType::Tactile],
                TIMING_EFFECT_LEVELS.to_vec(),
            ),
            SessionPreset::PipAndPop => paced_repetition_plan(10),
            SessionPreset::PipAndPopPractice => paced_repetition_plan(2),
            SessionPreset::CueNone => paced_duration_plan(CueType::None),
            SessionPreset::CueAudio => paced_duration_plan(CueType::Audio),
            SessionPreset::CueTactile => paced_duration_plan(CueType::Tactile),
            SessionPreset::CueMulti => paced_duration_plan(CueType::AudioTactile),
        }
    }
}

fn timing_plan(repetitions: u32, cue_types: Vec<CueType>, effect_levels: Vec<u8>) -> TrialPlan {
    TrialPlan {
        repetitions,
        duration: Duration::ZERO,
        start_offset: DEFAULT_START_OFFSET,
        end_offset: TIMING_END_OFFSET,
        cue_types,
        effect_levels,
        interval: IntervalRange::default(),
    }
}

fn paced_repetition_plan(repetitions: u32) -> TrialPlan {
    TrialPlan {
        repetitions,
        duration: Duration::ZERO,
        start_offset: DEFAULT_START_OFFSET,
        end_offset: PACED_END_OFFSET,
        cue_types: CueType::ALL.to_vec(),
        effect_levels: vec![0, 1],
        interval: IntervalRange::default(),
    }
}

fn paced_duration_plan(cue: CueType) -> TrialPlan {
    TrialPlan {
        repetitions: 0,
        duration: CUE_SESSION_DURATION,
        start_offset: DEFAULT_START_OFFSET,
        end_offset: PACED_END_OFFSET,
        cue_types: vec![cue],
        effect_levels: Vec::new(),
        interval: IntervalRange::default(),
    }
}

impl fmt::Display for SessionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raised when a preset name is not recognised.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("unknown session preset `{0}`")]
pub struct UnknownPreset(pub String);

impl FromStr for SessionPreset {
    type Err = UnknownPreset;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        all_presets()
            .iter()
            .copied()
            .find(|preset| preset.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| UnknownPreset(value.to_string()))
    }
}

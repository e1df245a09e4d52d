//! Trial schedule generation.
//!
//! A [`Timeline`] is the ordered list of stimulus trials for one session. It
//! is built once from a [`TrialPlan`] before the session starts and never
//! mutated afterwards; the orchestrator only walks it by index.

use core::fmt;
use core::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod presets;

pub use presets::{SessionPreset, all_presets};

/// Effect level assigned to every trial on the duration-driven path.
pub const UNIFORM_EFFECT_LEVEL: u8 = 1;

/// Sensory modality delivered at trial onset.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CueType {
    None,
    Audio,
    Tactile,
    AudioTactile,
}

impl CueType {
    /// Every cue type in wire-index order.
    pub const ALL: [CueType; 4] = [
        CueType::None,
        CueType::Audio,
        CueType::Tactile,
        CueType::AudioTactile,
    ];

    /// Wire index in `0..=3`.
    #[must_use]
    pub const fn as_index(self) -> u8 {
        match self {
            CueType::None => 0,
            CueType::Audio => 1,
            CueType::Tactile => 2,
            CueType::AudioTactile => 3,
        }
    }

    /// Attempts to construct a [`CueType`] from its wire index.
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(CueType::None),
            1 => Some(CueType::Audio),
            2 => Some(CueType::Tactile),
            3 => Some(CueType::AudioTactile),
            _ => None,
        }
    }

    /// Value reported on the `cue_state` telemetry stream.
    #[must_use]
    pub const fn state_code(self) -> i32 {
        self.as_index() as i32 + 1
    }

    /// Returns `true` when the cue includes a sound.
    #[must_use]
    pub const fn has_audio(self) -> bool {
        matches!(self, CueType::Audio | CueType::AudioTactile)
    }

    /// Returns `true` when the cue drives the haptic actuator.
    #[must_use]
    pub const fn has_tactile(self) -> bool {
        matches!(self, CueType::Tactile | CueType::AudioTactile)
    }
}

impl fmt::Display for CueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CueType::None => "none",
            CueType::Audio => "audio",
            CueType::Tactile => "tactile",
            CueType::AudioTactile => "audio-tactile",
        };
        f.pad(label)
    }
}

/// One scheduled stimulus event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Trial {
    /// Offset from the (compensated) session start.
    pub scheduled_offset: Duration,
    pub cue_type: CueType,
    pub effect_level: u8,
}

impl Trial {
    #[must_use]
    pub const fn new(scheduled_offset: Duration, cue_type: CueType, effect_level: u8) -> Self {
        Self {
            scheduled_offset,
            cue_type,
            effect_level,
        }
    }

    /// Value reported on the `stop_state` telemetry stream.
    #[must_use]
    pub const fn stop_state_code(&self) -> i32 {
        self.effect_level as i32 + 1
    }
}

/// Inclusive range of whole-second gaps between consecutive trials.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct IntervalRange {
    pub min: u32,
    pub max: u32,
}

impl IntervalRange {
    #[must_use]
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Checks that offsets generated from this range stay strictly increasing.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::InvalidInterval`] when `min` is zero or above `max`.
    pub const fn validate(self) -> Result<Self, PlanError> {
        if self.min == 0 || self.min > self.max {
            Err(PlanError::InvalidInterval {
                min: self.min,
                max: self.max,
            })
        } else {
            Ok(self)
        }
    }

    /// Midpoint of the range in seconds.
    #[must_use]
    pub fn mean(self) -> f64 {
        (f64::from(self.min) + f64::from(self.max)) / 2.0
    }

    fn sample<R: Rng + ?Sized>(self, rng: &mut R) -> Duration {
        Duration::from_secs(u64::from(rng.gen_range(self.min..=self.max)))
    }
}

impl Default for IntervalRange {
    fn default() -> Self {
        Self::new(8, 12)
    }
}

/// Inputs to [`generate`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialPlan {
    /// Copies of the cue × effect product; zero selects the duration-driven path.
    pub repetitions: u32,
    /// Total session length, only consulted when `repetitions` is zero.
    #[serde(with = "serde_secs")]
    pub duration: Duration,
    #[serde(with = "serde_secs")]
    pub start_offset: Duration,
    #[serde(with = "serde_secs")]
    pub end_offset: Duration,
    pub cue_types: Vec<CueType>,
    pub effect_levels: Vec<u8>,
    pub interval: IntervalRange,
}

impl TrialPlan {
    /// Returns `true` when the plan is driven by repetitions rather than duration.
    #[must_use]
    pub const fn is_repetition_driven(&self) -> bool {
        self.repetitions > 0
    }

    /// Number of trials the duration-driven path fits between the offsets.
    #[must_use]
    pub fn duration_trial_count(&self) -> usize {
        let usable = self.duration.as_secs_f64()
            - self.start_offset.as_secs_f64()
            - self.end_offset.as_secs_f64();
        let mean = self.interval.mean();
        if usable <= 0.0 || mean <= 0.0 {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let count = (usable / mean).floor() as usize;
        count
    }

    /// Session length the orchestrator runs for once the timeline is known.
    #[must_use]
    pub fn session_duration(&self, timeline: &Timeline) -> Duration {
        if self.is_repetition_driven() {
            timeline.total_duration(self.end_offset)
        } else {
            self.duration
        }
    }
}

/// Configuration errors rejected before any schedule is produced.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum PlanError {
    #[error("at least one cue type is required")]
    NoCueTypes,
    #[error("repetition plans need at least one effect level")]
    NoEffectLevels,
    #[error("interval range {min}..={max} must satisfy 1 <= min <= max")]
    InvalidInterval { min: u32, max: u32 },
}

/// Smallest and largest effect level present in a timeline.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EffectBounds {
    pub min: u8,
    pub max: u8,
}

/// Immutable, offset-ordered list of trials.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Timeline {
    trials: Vec<Trial>,
}

impl Timeline {
    /// Wraps trials that are already ordered by offset.
    #[must_use]
    pub fn from_trials(trials: Vec<Trial>) -> Self {
        debug_assert!(
            trials
                .windows(2)
                .all(|pair| pair[0].scheduled_offset < pair[1].scheduled_offset)
        );
        Self { trials }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.trials.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Trial> {
        self.trials.get(index)
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Trial> {
        self.trials.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Trial] {
        &self.trials
    }

    /// Offset of the final trial, if any.
    #[must_use]
    pub fn last_offset(&self) -> Option<Duration> {
        self.trials.last().map(|trial| trial.scheduled_offset)
    }

    /// Last offset plus the trailing margin; zero for an empty timeline.
    #[must_use]
    pub fn total_duration(&self, end_offset: Duration) -> Duration {
        self.last_offset()
            .map_or(Duration::ZERO, |offset| offset + end_offset)
    }

    #[must_use]
    pub fn effect_bounds(&self) -> Option<EffectBounds> {
        let min = self.trials.iter().map(|trial| trial.effect_level).min()?;
        let max = self.trials.iter().map(|trial| trial.effect_level).max()?;
        Some(EffectBounds { min, max })
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a Trial;
    type IntoIter = core::slice::Iter<'a, Trial>;

    fn into_iter(self) -> Self::IntoIter {
        self.trials.iter()
    }
}

/// Builds the trial schedule for a plan.
///
/// With `repetitions > 0` every `(cue, effect)` pair appears exactly
/// `repetitions` times in shuffled order. Otherwise the session is filled
/// with as many uniform trials (first cue type, effect level 1) as the mean
/// interval fits between the start and end offsets. In both cases offsets
/// begin at `start_offset` and advance by a uniform draw from the interval
/// range after each trial.
///
/// # Errors
///
/// Returns a [`PlanError`] when the plan itself is malformed. A
/// duration-driven plan too short for any trial yields an empty timeline,
/// not an error.
pub fn generate<R: Rng + ?Sized>(plan: &TrialPlan, rng: &mut R) -> Result<Timeline, PlanError> {
    let interval = plan.interval.validate()?;
    let Some(&first_cue) = plan.cue_types.first() else {
        return Err(PlanError::NoCueTypes);
    };

    let mut pairs: Vec<(CueType, u8)> = if plan.is_repetition_driven() {
        if plan.effect_levels.is_empty() {
            return Err(PlanError::NoEffectLevels);
        }
        let product: Vec<(CueType, u8)> = plan
            .cue_types
            .iter()
            .flat_map(|&cue| plan.effect_levels.iter().map(move |&effect| (cue, effect)))
            .collect();
        let copies = usize::try_from(plan.repetitions).unwrap_or(usize::MAX);
        let mut pairs = Vec::with_capacity(product.len().saturating_mul(copies));
        for _ in 0..copies {
            pairs.extend_from_slice(&product);
        }
        pairs.shuffle(rng);
        pairs
    } else {
        vec![(first_cue, UNIFORM_EFFECT_LEVEL); plan.duration_trial_count()]
    };

    let mut cursor = plan.start_offset;
    let trials = pairs
        .drain(..)
        .map(|(cue_type, effect_level)| {
            let trial = Trial::new(cursor, cue_type, effect_level);
            cursor += interval.sample(rng);
            trial
        })
        .collect();

    Ok(Timeline::from_trials(trials))
}

/// Serializes durations as fractional seconds in config files.
pub mod serde_secs {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

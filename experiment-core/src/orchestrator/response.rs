//! Temporal-bisection response scoring.

use crate::trials::EffectBounds;

/// Judgement entered by the participant after a detected pause.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Response {
    Short,
    Long,
}

/// Result of scoring a response against the trial's effect level.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResponseOutcome {
    Correct,
    Incorrect,
    /// The effect level lies strictly between the extremes; no feedback is given.
    Unscored,
}

/// Scores `response` for a trial with `effect_level`.
///
/// The lowest effect level in the session is the "short" ground truth and the
/// highest is the "long" one.
#[must_use]
pub fn classify(effect_level: u8, bounds: EffectBounds, response: Response) -> ResponseOutcome {
    let is_short = effect_level == bounds.min;
    let is_long = effect_level == bounds.max;
    match response {
        Response::Short if is_short => ResponseOutcome::Correct,
        Response::Long if is_long => ResponseOutcome::Correct,
        Response::Short if is_long => ResponseOutcome::Incorrect,
        Response::Long if is_short => ResponseOutcome::Incorrect,
        _ => ResponseOutcome::Unscored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: EffectBounds = EffectBounds { min: 0, max: 6 };

    #[test]
    fn extremes_score_symmetrically() {
        assert_eq!(classify(0, BOUNDS, Response::Short), ResponseOutcome::Correct);
        assert_eq!(classify(0, BOUNDS, Response::Long), ResponseOutcome::Incorrect);
        assert_eq!(classify(6, BOUNDS, Response::Long), ResponseOutcome::Correct);
        assert_eq!(classify(6, BOUNDS, Response::Short), ResponseOutcome::Incorrect);
    }

    #[test]
    fn intermediate_levels_are_unscored() {
        for level in 1..6 {
            assert_eq!(classify(level, BOUNDS, Response::Short), ResponseOutcome::Unscored);
            assert_eq!(classify(level, BOUNDS, Response::Long), ResponseOutcome::Unscored);
        }
    }
}

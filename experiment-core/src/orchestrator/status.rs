//! Operator-facing progress line.
//!
//! Hosts refresh a single console line about once per second while a session
//! runs. [`StatusLine`] captures what that line should say so every front-end
//! renders it the same way.

use core::fmt;
use core::time::Duration;

/// Snapshot of session progress for the console.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StatusLine {
    /// Free-running between trials.
    Elapsed(Duration),
    /// A robot is paused and the participant has not reported it yet.
    AwaitingDetection(Duration),
    /// Detection confirmed; waiting for the short/long judgement.
    ResponseWindow(Duration),
    /// No session is running.
    Idle,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLine::Elapsed(elapsed) => write!(f, "Elapsed {}", elapsed.as_secs()),
            StatusLine::AwaitingDetection(waiting) => {
                write!(f, "Waiting for detection. Elapsed: {}", waiting.as_secs())
            }
            StatusLine::ResponseWindow(waiting) => {
                write!(f, "Response window. Elapsed: {}", waiting.as_secs())
            }
            StatusLine::Idle => f.write_str("Idle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_whole_seconds() {
        assert_eq!(
            StatusLine::Elapsed(Duration::from_millis(42_900)).to_string(),
            "Elapsed 42"
        );
        assert_eq!(
            StatusLine::AwaitingDetection(Duration::from_secs(3)).to_string(),
            "Waiting for detection. Elapsed: 3"
        );
        assert_eq!(
            StatusLine::ResponseWindow(Duration::from_secs(1)).to_string(),
            "Response window. Elapsed: 1"
        );
    }
}

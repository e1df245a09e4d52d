//! Experiment state streams pushed to the biosignal recorder.
//!
//! The orchestrator publishes a small set of integer-valued streams at a
//! fixed cadence so the recorded physiological data can be aligned with the
//! experiment timeline. Streams carry plain `i32` samples; the meaning of each
//! code is documented on [`TelemetryStream`].

use core::fmt;
use core::time::Duration;

use heapless::HistoryBuf;

use crate::clock::SessionInstant;

/// Period between pushes of the state streams (100 Hz).
pub const TELEMETRY_PERIOD: Duration = Duration::from_millis(10);

/// Sample value pushed on every stream while no session is running.
pub const IDLE_SAMPLE: i32 = -1;

/// Default capacity for [`TelemetryRecorder`].
pub const DEFAULT_TELEMETRY_CAPACITY: usize = 256;

/// Named telemetry channels.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TelemetryStream {
    /// 0 idle, 1 robot paused, 2 catch trial without a pause.
    RobotState,
    /// 1-based id of the robot most recently paused.
    RobotId,
    /// 0 no cue, otherwise `cue index + 1`.
    CueState,
    /// 0 outside a trial, otherwise `effect level + 1`.
    StopState,
    /// Bitmask of operator inputs, see [`UserInputMask`].
    UserInput,
}

impl TelemetryStream {
    /// Streams pushed on every cadence tick.
    pub const PERIODIC: [TelemetryStream; 4] = [
        TelemetryStream::RobotState,
        TelemetryStream::CueState,
        TelemetryStream::StopState,
        TelemetryStream::UserInput,
    ];

    /// Every stream, including the event-driven `robot_id`.
    pub const ALL: [TelemetryStream; 5] = [
        TelemetryStream::RobotState,
        TelemetryStream::RobotId,
        TelemetryStream::CueState,
        TelemetryStream::StopState,
        TelemetryStream::UserInput,
    ];

    /// Stream name as registered with the recorder.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            TelemetryStream::RobotState => "robot_state",
            TelemetryStream::RobotId => "robot_id",
            TelemetryStream::CueState => "cue_state",
            TelemetryStream::StopState => "stop_state",
            TelemetryStream::UserInput => "user_input",
        }
    }
}

impl fmt::Display for TelemetryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Consumer of telemetry samples. Implementations must never block.
pub trait TelemetrySink {
    fn push(&mut self, stream: TelemetryStream, sample: i32);
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for &mut T {
    fn push(&mut self, stream: TelemetryStream, sample: i32) {
        (**self).push(stream, sample);
    }
}

/// Sink that drops every sample.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn push(&mut self, _: TelemetryStream, _: i32) {}
}

/// Pushes the idle heartbeat on every stream.
pub fn push_idle<T: TelemetrySink + ?Sized>(sink: &mut T) {
    for stream in TelemetryStream::ALL {
        sink.push(stream, IDLE_SAMPLE);
    }
}

/// Bitmask of operator inputs pushed on [`TelemetryStream::UserInput`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct UserInputMask(u8);

impl UserInputMask {
    pub const DETECT: u8 = 1 << 0;
    pub const SHORT: u8 = 1 << 1;
    pub const LONG: u8 = 1 << 2;

    #[must_use]
    pub const fn from_levels(detect: bool, short: bool, long: bool) -> Self {
        let mut bits = 0;
        if detect {
            bits |= Self::DETECT;
        }
        if short {
            bits |= Self::SHORT;
        }
        if long {
            bits |= Self::LONG;
        }
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// State codes pushed together on each cadence tick.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TelemetryFrame {
    pub robot_state: i32,
    pub cue_state: i32,
    pub stop_state: i32,
    pub user_input: UserInputMask,
}

impl TelemetryFrame {
    /// Pushes every periodic stream once.
    pub fn publish<T: TelemetrySink + ?Sized>(&self, sink: &mut T) {
        sink.push(TelemetryStream::RobotState, self.robot_state);
        sink.push(TelemetryStream::CueState, self.cue_state);
        sink.push(TelemetryStream::StopState, self.stop_state);
        sink.push(TelemetryStream::UserInput, i32::from(self.user_input.bits()));
    }
}

/// Fixed-period deadline tracker.
///
/// A tick that arrives late fires once and re-arms relative to `now`; missed
/// periods are not replayed.
#[derive(Copy, Clone, Debug)]
pub struct TelemetryCadence<TInstant> {
    period: Duration,
    next_due: Option<TInstant>,
}

impl<TInstant: SessionInstant> TelemetryCadence<TInstant> {
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            next_due: None,
        }
    }

    /// Returns `true` and re-arms when the deadline has passed.
    pub fn poll(&mut self, now: TInstant) -> bool {
        match self.next_due {
            Some(due) if now < due => false,
            _ => {
                self.next_due = Some(now + self.period);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.next_due = None;
    }
}

impl<TInstant: SessionInstant> Default for TelemetryCadence<TInstant> {
    fn default() -> Self {
        Self::new(TELEMETRY_PERIOD)
    }
}

/// Identifier assigned to each recorded sample.
pub type SampleId = u32;

/// One stored telemetry sample.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TelemetryRecord {
    pub id: SampleId,
    pub stream: TelemetryStream,
    pub sample: i32,
}

/// Bounded in-memory sink that retains the most recent samples.
pub struct TelemetryRecorder<const CAPACITY: usize = DEFAULT_TELEMETRY_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord, CAPACITY>,
    next_id: SampleId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_id: 0,
        }
    }

    /// Records a sample and returns its id.
    pub fn record(&mut self, stream: TelemetryStream, sample: i32) -> SampleId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.ring.write(TelemetryRecord { id, stream, sample });
        id
    }

    /// Returns the most recent record, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Most recent sample pushed on `stream` still held in the ring.
    #[must_use]
    pub fn latest_on(&self, stream: TelemetryStream) -> Option<i32> {
        self.samples(stream).last().copied()
    }

    /// Samples held for `stream`, oldest first.
    #[must_use]
    pub fn samples(&self, stream: TelemetryStream) -> Vec<i32> {
        self.ring
            .oldest_ordered()
            .filter(|record| record.stream == stream)
            .map(|record| record.sample)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Total samples recorded, including ones evicted from the ring.
    #[must_use]
    pub const fn total_recorded(&self) -> SampleId {
        self.next_id
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAPACITY: usize> TelemetrySink for TelemetryRecorder<CAPACITY> {
    fn push(&mut self, stream: TelemetryStream, sample: i32) {
        self.record(stream, sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ops::Add;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MicrosInstant(u64);

    impl Add<Duration> for MicrosInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self::Output {
            Self(self.0 + u64::try_from(rhs.as_micros()).unwrap())
        }
    }

    impl SessionInstant for MicrosInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    #[test]
    fn user_input_mask_sets_documented_bits() {
        assert_eq!(UserInputMask::from_levels(false, false, false).bits(), 0);
        assert_eq!(UserInputMask::from_levels(true, false, false).bits(), 1);
        assert_eq!(UserInputMask::from_levels(false, true, false).bits(), 2);
        assert_eq!(UserInputMask::from_levels(true, false, true).bits(), 5);
    }

    #[test]
    fn cadence_fires_once_per_period_and_rearms_from_now() {
        let mut cadence = TelemetryCadence::new(Duration::from_millis(10));

        assert!(cadence.poll(MicrosInstant(0)));
        assert!(!cadence.poll(MicrosInstant(9_999)));
        assert!(cadence.poll(MicrosInstant(10_000)));
        // A late tick fires once, then waits a full period from the late instant.
        assert!(cadence.poll(MicrosInstant(45_000)));
        assert!(!cadence.poll(MicrosInstant(50_000)));
        assert!(cadence.poll(MicrosInstant(55_000)));
    }

    #[test]
    fn frame_publishes_each_periodic_stream_once() {
        let mut recorder = TelemetryRecorder::<16>::new();
        let frame = TelemetryFrame {
            robot_state: 1,
            cue_state: 3,
            stop_state: 2,
            user_input: UserInputMask::from_levels(true, false, false),
        };
        frame.publish(&mut recorder);

        assert_eq!(recorder.len(), 4);
        assert_eq!(recorder.latest_on(TelemetryStream::CueState), Some(3));
        assert_eq!(recorder.latest_on(TelemetryStream::UserInput), Some(1));
        assert_eq!(recorder.latest_on(TelemetryStream::RobotId), None);
    }

    #[test]
    fn idle_heartbeat_covers_every_stream() {
        let mut recorder = TelemetryRecorder::<16>::new();
        push_idle(&mut recorder);

        for stream in TelemetryStream::ALL {
            assert_eq!(recorder.samples(stream), vec![IDLE_SAMPLE], "{stream}");
        }
    }

    #[test]
    fn recorder_evicts_oldest_but_counts_everything() {
        let mut recorder = TelemetryRecorder::<2>::new();
        for value in 0..5 {
            recorder.push(TelemetryStream::RobotState, value);
        }

        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.total_recorded(), 5);
        assert_eq!(recorder.samples(TelemetryStream::RobotState), vec![3, 4]);
        assert_eq!(recorder.latest().map(|record| record.id), Some(4));
    }
}

//! Fixed-tick control loop of a robot node.

use std::future::Future;
use std::time::{Duration, Instant};

use experiment_core::bus::DirectiveSource;
use experiment_core::robot::{ControllerError, RobotController, halt};
use rand::Rng;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, trace};

use crate::arena::SimulatedBody;

/// Ticks the controller until `shutdown` resolves or a fault occurs.
///
/// The simulated body is advanced by the wall-clock time between ticks before
/// its sensors are sampled. Motors are halted on both exits.
///
/// # Errors
///
/// Returns the bus or hardware fault that ended the loop.
pub async fn run<B, R, F>(
    controller: &mut RobotController<Instant, R>,
    bus: &mut B,
    body: &mut SimulatedBody,
    tick: Duration,
    shutdown: F,
) -> Result<u64, ControllerError>
where
    B: DirectiveSource,
    R: Rng,
    F: Future<Output = ()>,
{
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    let mut last = Instant::now();
    let mut ticks = 0_u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = &mut shutdown => {
                info!(robot = %controller.id(), ticks, "shutting down");
                let (_, mut actuators) = body.split();
                halt(&mut actuators)?;
                return Ok(ticks);
            }
        }

        let now = Instant::now();
        body.advance(now.saturating_duration_since(last));
        last = now;

        let (mut sensors, mut actuators) = body.split();
        let command = controller.drive_once(now, bus, &mut sensors, &mut actuators)?;
        ticks += 1;
        trace!(action = ?controller.action(), ?command, "tick");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use experiment_core::bus::{BusError, Directive, RobotCommand, RobotId};
    use experiment_core::robot::{Action, Actuator, ControllerConfig, Mode};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::arena::{ArenaConfig, Pose};

    fn controller() -> RobotController<Instant, ChaCha8Rng> {
        RobotController::new(
            RobotId(1),
            ControllerConfig::default(),
            ChaCha8Rng::seed_from_u64(3),
        )
    }

    fn centred_body() -> SimulatedBody {
        SimulatedBody::with_pose(
            ArenaConfig::default(),
            Pose {
                x: 0.75,
                y: 0.75,
                heading: 0.0,
            },
        )
    }

    #[tokio::test]
    async fn drives_forward_until_shutdown_then_halts() {
        let mut robot = controller();
        let mut bus = VecDeque::from([Directive::All(RobotCommand::On)]);
        let mut body = centred_body();

        let ticks = run(
            &mut robot,
            &mut bus,
            &mut body,
            Duration::from_millis(5),
            tokio::time::sleep(Duration::from_millis(100)),
        )
        .await
        .unwrap();

        assert!(ticks > 2);
        assert_eq!(robot.mode(), Mode::On);
        assert_eq!(robot.action(), Action::Go);
        assert!(body.pose().x > 0.75, "robot moved forward");
        assert_eq!(body.target(Actuator::MotorLeft), Some(&[0][..]));
        assert_eq!(body.target(Actuator::MotorRight), Some(&[0][..]));
    }

    struct ClosedBus;

    impl DirectiveSource for ClosedBus {
        fn try_next(&mut self) -> Result<Option<Directive>, BusError> {
            Err(BusError::Disconnected)
        }
    }

    #[tokio::test]
    async fn lost_bus_ends_the_loop() {
        let mut robot = controller();
        let mut body = centred_body();

        let result = run(
            &mut robot,
            &mut ClosedBus,
            &mut body,
            Duration::from_millis(5),
            std::future::pending(),
        )
        .await;

        assert_eq!(
            result,
            Err(ControllerError::Bus(BusError::Disconnected))
        );
        assert_eq!(body.target(Actuator::MotorLeft), Some(&[0][..]));
    }
}

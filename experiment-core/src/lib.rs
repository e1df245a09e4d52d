#![doc = "Shared experiment logic for the orchestrator host and robot nodes."]

pub mod bus;
pub mod clock;
pub mod orchestrator;
pub mod robot;
pub mod telemetry;
pub mod trials;

//! The motion orchestrator: move-time estimation, coordinate-system
//! batching, per-motor jog dispatch, homing coordination, and abort.

mod error;
mod estimate;
mod orchestrator;
mod preset;

pub use error::MotionError;
pub use estimate::{move_time_seconds, MoveSpec};
pub use orchestrator::{BatchDispatch, MotionOrchestrator};
pub use preset::PresetSource;

#[cfg(test)]
pub use preset::mock;

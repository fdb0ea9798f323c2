//! Motor/IO object model, lookup tables, status-block decode, and the
//! fixed-size process-wide tables.

pub mod binary_input;
pub mod cs_mask;
pub mod fast_shutter;
pub mod lut;
pub mod motor;
pub mod omega_zero;
pub mod registry;
pub mod status;

pub use binary_input::BinaryInput;
pub use cs_mask::CsMotionMask;
pub use fast_shutter::FastShutterLatches;
pub use lut::{LookupTable, LutError};
pub use motor::{AxisLetter, Calibration, HomingPhase, Motor, MotionPolicy, MotorKind, ReadOutcome};
pub use omega_zero::{OmegaZeroSearch, ZeroCrossing};
pub use registry::{BinaryInputTable, MotorTable};
pub use status::{AxisStatus, Status1, Status2, StatusSummary};

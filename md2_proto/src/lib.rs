//! Turbo-PMAC binary wire protocol: command headers, the controller's error
//! table, DPRAM offsets, and response framing.

pub mod dpram;
pub mod error_table;
pub mod frame;
pub mod header;
pub mod status_block;

pub use error_table::PmacError;
pub use frame::{FrameError, Response};
pub use header::Header;

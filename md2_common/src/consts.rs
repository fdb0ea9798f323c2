//! Process-wide static sizing constants.
//!
//! These mirror the statically-sized tables of the original daemon: fixed
//! pools and bounded queues, never grown at runtime.

/// Size of the static motor table. Only [`MOTORS_USED`] entries are normally
/// populated by `machine.toml`, the remainder stay inactive.
pub const MAX_MOTORS: usize = 48;
/// Motor count actually wired up on a representative MD2 installation.
pub const MOTORS_USED: usize = 27;

/// Size of the static binary-input table.
pub const MAX_BINARY_INPUTS: usize = 17;

/// Binary (memory/status) PMAC command queue depth.
pub const PMAC_BINARY_QUEUE_LEN: usize = 2048;
/// ASCII mailbox command queue depth.
pub const PMAC_ASCII_QUEUE_LEN: usize = 1024;

/// SQL gateway query queue depth.
pub const SQL_QUEUE_LEN: usize = 16_384;

/// Log sink circular queue depth.
pub const LOG_QUEUE_LEN: usize = 8192;

/// Event bus bounded ring length.
pub const EVENT_QUEUE_LEN: usize = 512;

/// Timer service fixed pool size.
pub const TIMER_POOL_LEN: usize = 1024;

/// Minimum inter-command gap enforced by the PMAC link.
pub const PMAC_RATE_LIMIT: std::time::Duration = std::time::Duration::from_millis(10);

/// Minimum reconnect backoff for the PMAC link and the SQL gateway.
pub const RECONNECT_BACKOFF: std::time::Duration = std::time::Duration::from_secs(10);

/// Status-block poll cadence target, low end.
pub const STATUS_POLL_HZ_MIN: u32 = 50;
/// Status-block poll cadence target, high end.
pub const STATUS_POLL_HZ_MAX: u32 = 100;

/// Timer service resolution window.
pub const TIMER_RESOLUTION: std::time::Duration = std::time::Duration::from_micros(100);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motor_table_bounds() {
        assert!(MOTORS_USED <= MAX_MOTORS);
    }

    #[test]
    fn queue_sizes_are_powers_suitable_for_the_spec() {
        assert_eq!(PMAC_BINARY_QUEUE_LEN, 2048);
        assert_eq!(PMAC_ASCII_QUEUE_LEN, 1024);
        assert_eq!(SQL_QUEUE_LEN, 16_384);
        assert_eq!(LOG_QUEUE_LEN, 8192);
        assert_eq!(EVENT_QUEUE_LEN, 512);
        assert_eq!(TIMER_POOL_LEN, 1024);
    }
}

//! Raw layout of the fixed status block read from DPRAM.
//!
//! This module only describes the *wire* shape: fixed-size arrays of raw
//! 32-bit words, decoded with no interpretation. `md2_model` turns this into
//! the live per-motor/per-input state.

use md2_common::consts::MAX_MOTORS;

/// Per-axis raw status tuple as it appears in the status block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawAxisStatus {
    pub status1: u32,
    pub status2: u32,
    pub actual_position_counts: i32,
}

/// Number of ACC-11C digital I/O words carried in the status block.
pub const ACC11C_WORD_COUNT: usize = 4;
/// Number of DAC readback channels in the status block.
pub const DAC_READBACK_COUNT: usize = 4;

/// Raw, undecoded status block.
#[derive(Debug, Clone)]
pub struct RawStatusBlock {
    pub axes: [RawAxisStatus; MAX_MOTORS],
    pub acc11c_words: [u32; ACC11C_WORD_COUNT],
    pub dac_readbacks: [i32; DAC_READBACK_COUNT],
    pub fast_shutter_is_open: bool,
    pub fast_shutter_has_opened_since_reset: bool,
    /// Coordinate-system "moving" bitmask, bit N-1 set for coordinate system N (1..16).
    pub cs_moving_mask: u16,
}

impl Default for RawStatusBlock {
    fn default() -> Self {
        RawStatusBlock {
            axes: [RawAxisStatus::default(); MAX_MOTORS],
            acc11c_words: [0; ACC11C_WORD_COUNT],
            dac_readbacks: [0; DAC_READBACK_COUNT],
            fast_shutter_is_open: false,
            fast_shutter_has_opened_since_reset: false,
            cs_moving_mask: 0,
        }
    }
}

/// Byte length of the wire-encoded status block, read in one
/// `GETMEM` at [`crate::dpram::STATUS_BLOCK_OFFSET`]: 12 bytes per axis
/// entry, plus the ACC-11C words, DAC readbacks, a one-byte fast-shutter
/// flag pair, and a `u16` coordinate-system mask.
pub const STATUS_BLOCK_WIRE_LEN: usize =
    MAX_MOTORS * 12 + ACC11C_WORD_COUNT * 4 + DAC_READBACK_COUNT * 4 + 1 + 2;

impl RawStatusBlock {
    /// Test whether coordinate system `cs` (1..=16) is currently moving.
    pub fn cs_is_moving(&self, cs: u8) -> bool {
        debug_assert!((1..=16).contains(&cs));
        self.cs_moving_mask & (1 << (cs - 1)) != 0
    }

    /// Decode the fixed-layout little-endian byte image returned by the
    /// controller's `GETMEM` response into a [`RawStatusBlock`].
    pub fn decode(bytes: &[u8]) -> Option<RawStatusBlock> {
        if bytes.len() < STATUS_BLOCK_WIRE_LEN {
            return None;
        }
        let mut block = RawStatusBlock::default();
        let mut off = 0;
        for axis in block.axes.iter_mut() {
            axis.status1 = u32::from_le_bytes(bytes[off..off + 4].try_into().ok()?);
            axis.status2 = u32::from_le_bytes(bytes[off + 4..off + 8].try_into().ok()?);
            axis.actual_position_counts = i32::from_le_bytes(bytes[off + 8..off + 12].try_into().ok()?);
            off += 12;
        }
        for word in block.acc11c_words.iter_mut() {
            *word = u32::from_le_bytes(bytes[off..off + 4].try_into().ok()?);
            off += 4;
        }
        for dac in block.dac_readbacks.iter_mut() {
            *dac = i32::from_le_bytes(bytes[off..off + 4].try_into().ok()?);
            off += 4;
        }
        let shutter_flags = bytes[off];
        block.fast_shutter_is_open = shutter_flags & 0b01 != 0;
        block.fast_shutter_has_opened_since_reset = shutter_flags & 0b10 != 0;
        off += 1;
        block.cs_moving_mask = u16::from_le_bytes(bytes[off..off + 2].try_into().ok()?);
        Some(block)
    }

    /// Encode back to the wire image (used by tests and the simulated
    /// transport to script controller responses).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(STATUS_BLOCK_WIRE_LEN);
        for axis in &self.axes {
            out.extend_from_slice(&axis.status1.to_le_bytes());
            out.extend_from_slice(&axis.status2.to_le_bytes());
            out.extend_from_slice(&axis.actual_position_counts.to_le_bytes());
        }
        for word in &self.acc11c_words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        for dac in &self.dac_readbacks {
            out.extend_from_slice(&dac.to_le_bytes());
        }
        let flags = (self.fast_shutter_is_open as u8) | ((self.fast_shutter_has_opened_since_reset as u8) << 1);
        out.push(flags);
        out.extend_from_slice(&self.cs_moving_mask.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cs_moving_bit_mapping() {
        let mut block = RawStatusBlock::default();
        block.cs_moving_mask = 1 << 3; // coordinate system 4
        assert!(block.cs_is_moving(4));
        assert!(!block.cs_is_moving(1));
        assert!(!block.cs_is_moving(5));
    }

    #[test]
    fn encode_decode_round_trips() {
        let mut block = RawStatusBlock::default();
        block.axes[0] = RawAxisStatus {
            status1: 0x0102_0304,
            status2: 0x0506_0708,
            actual_position_counts: -42,
        };
        block.acc11c_words[2] = 0xdead_beef;
        block.dac_readbacks[1] = 1234;
        block.fast_shutter_is_open = true;
        block.fast_shutter_has_opened_since_reset = false;
        block.cs_moving_mask = 0b1010;

        let bytes = block.encode();
        assert_eq!(bytes.len(), STATUS_BLOCK_WIRE_LEN);
        let decoded = RawStatusBlock::decode(&bytes).unwrap();
        assert_eq!(decoded.axes[0], block.axes[0]);
        assert_eq!(decoded.acc11c_words, block.acc11c_words);
        assert_eq!(decoded.dac_readbacks, block.dac_readbacks);
        assert_eq!(decoded.fast_shutter_is_open, block.fast_shutter_is_open);
        assert_eq!(
            decoded.fast_shutter_has_opened_since_reset,
            block.fast_shutter_has_opened_since_reset
        );
        assert_eq!(decoded.cs_moving_mask, block.cs_moving_mask);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        assert!(RawStatusBlock::decode(&[0u8; 4]).is_none());
    }
}

//! Fixed dual-port-RAM offsets consumed by the status read and the ASCII
//! mailbox.

/// Offset of the fixed-layout status block.
pub const STATUS_BLOCK_OFFSET: u16 = 0x0400;

/// ASCII command control word (bit 0 set to submit a command).
pub const ASCII_CMD_CONTROL_OFFSET: u16 = 0x0e9c;
/// ASCII command control-character cell.
pub const ASCII_CMD_CTRLCHAR_OFFSET: u16 = 0x0e9e;
/// ASCII command string buffer.
pub const ASCII_CMD_STRING_OFFSET: u16 = 0x0ea0;

/// ASCII response control word.
pub const ASCII_RSP_CONTROL_OFFSET: u16 = 0x0f40;
/// ASCII response length cell.
pub const ASCII_RSP_LENGTH_OFFSET: u16 = 0x0f42;
/// ASCII response string buffer.
pub const ASCII_RSP_STRING_OFFSET: u16 = 0x0f44;

/// Low byte of the ASCII response control word meaning "more lines follow,
/// repeat the read".
pub const ASCII_RSP_MORE_LINES: u8 = 0x0d;
/// ASCII response control word value meaning "final line".
pub const ASCII_RSP_FINAL_LINE: u8 = 0x06;
/// High bit of the ASCII response control word set when it encodes a BCD
/// error code rather than a line-count.
pub const ASCII_RSP_ERROR_FLAG: u16 = 0x8000;

/// Acknowledgement byte terminating a binary-protocol response.
pub const ACK_BYTE: u8 = 0x06;
/// First byte of an error frame.
pub const ERROR_FRAME_MARKER: u8 = 0x07;

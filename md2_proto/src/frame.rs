//! Response framing: the three response shapes a command can produce
//! and the scanner that tells them apart.

use crate::dpram::{ACK_BYTE, ERROR_FRAME_MARKER};
use crate::error_table::PmacError;
use thiserror::Error;

/// A decoded controller response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Success acknowledgement (`0x06`).
    Ack,
    /// Controller-reported protocol error.
    Error(PmacError),
    /// Binary data (memory upload), up to 1400 bytes.
    Data(Vec<u8>),
}

/// Errors scanning a response out of the receive buffer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("response buffer is empty")]
    Empty,
    #[error("truncated error frame: need 6 bytes, have {0}")]
    TruncatedErrorFrame(usize),
    #[error("malformed error frame: expected 'ERR' after 0x07, got {0:?}")]
    MalformedErrorFrame([u8; 3]),
    #[error("error frame digits not ASCII decimal: {0:?}")]
    BadErrorDigits([u8; 3]),
}

/// Scan a growable receive buffer for one logical response.
///
/// Distinguishes `0x07` (error frame), `0x06` (ack, with nothing else in the
/// buffer), and otherwise treats the whole buffer as binary data (a GETMEM
/// upload does not scan for markers, it just reads `length` bytes — the
/// caller is expected to call this function only when it already knows how
/// many bytes the response should contain, passing `expect_binary = true`).
pub fn scan_response(buf: &[u8], expect_binary: bool) -> Result<Response, FrameError> {
    if buf.is_empty() {
        return Err(FrameError::Empty);
    }

    if expect_binary {
        return Ok(Response::Data(buf.to_vec()));
    }

    if buf[0] == ERROR_FRAME_MARKER {
        // 0x07 'E' 'R' 'R' D D D 0x0D
        if buf.len() < 7 {
            return Err(FrameError::TruncatedErrorFrame(buf.len()));
        }
        let tag = [buf[1], buf[2], buf[3]];
        if &tag != b"ERR" {
            return Err(FrameError::MalformedErrorFrame(tag));
        }
        let digits = [buf[4], buf[5], buf[6]];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(FrameError::BadErrorDigits(digits));
        }
        let code: u16 = digits
            .iter()
            .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
        return Ok(Response::Error(PmacError::from_code(code)));
    }

    if buf[0] == ACK_BYTE {
        return Ok(Response::Ack);
    }

    Ok(Response::Data(buf.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_ack() {
        assert_eq!(scan_response(&[0x06], false).unwrap(), Response::Ack);
    }

    #[test]
    fn scans_error_frame() {
        let buf = b"\x07ERR011\x0d";
        assert_eq!(
            scan_response(buf, false).unwrap(),
            Response::Error(PmacError::PreviousMoveNotComplete)
        );
    }

    #[test]
    fn scans_binary_data_when_expected() {
        let buf = [1u8, 2, 3, 4, 5];
        assert_eq!(
            scan_response(&buf, true).unwrap(),
            Response::Data(buf.to_vec())
        );
    }

    #[test]
    fn empty_buffer_errors() {
        assert_eq!(scan_response(&[], false).unwrap_err(), FrameError::Empty);
    }

    #[test]
    fn truncated_error_frame_errors() {
        let buf = b"\x07ER";
        assert!(matches!(
            scan_response(buf, false).unwrap_err(),
            FrameError::TruncatedErrorFrame(_)
        ));
    }
}

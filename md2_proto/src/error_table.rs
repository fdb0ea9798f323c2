//! The controller's fixed 23-entry error table.
//!
//! Error frames on the wire carry a three-decimal-digit code; `000` is not a
//! controller-assigned code but the table's "unknown" slot.

use thiserror::Error;

/// One of the controller's enumerated protocol error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PmacError {
    #[error("ERR000: unknown error")]
    Unknown,
    #[error("ERR001: command not allowed during program execution")]
    CommandNotAllowedDuringProgramExecution,
    #[error("ERR002: password error")]
    PasswordError,
    #[error("ERR003: data error or unrecognized command")]
    DataError,
    #[error("ERR004: illegal character")]
    IllegalCharacter,
    #[error("ERR005: command not allowed unless buffer is open")]
    BufferNotOpen,
    #[error("ERR006: no room in buffer for command")]
    BufferFull,
    #[error("ERR007: buffer already in use")]
    BufferInUse,
    #[error("ERR008: MACRO auxiliary communication error")]
    MacroAuxError,
    #[error("ERR009: program structure error (e.g. ENDIF without IF)")]
    ProgramStructureError,
    #[error("ERR010: both overtravel limits set for a motor in the coordinate system")]
    BothOvertravel,
    #[error("ERR011: previous move not completed")]
    PreviousMoveNotComplete,
    #[error("ERR012: a motor in the coordinate system is open-loop")]
    OpenLoopMotor,
    #[error("ERR013: a motor in the coordinate system is not activated")]
    InactiveMotor,
    #[error("ERR014: no motors in the coordinate system")]
    NoMotorsInCs,
    #[error("ERR015: not a pointer to a valid program buffer")]
    InvalidProgramPointer,
    #[error("ERR016: running an improperly structured program (e.g. missing ENDWHILE)")]
    ImproperlyStructuredProgram,
    #[error("ERR017: trying to resume after H or Q with motors out of stopped position")]
    ResumeFromBadStop,
    #[error(
        "ERR018: attempt to perform phase reference during move, move during phase reference, or enabling with phase clock error"
    )]
    PhaseRefDuringMove,
    #[error("ERR019: illegal position-change command while moves are stored in CCBUFFER")]
    CcBufferPositionChange,
    #[error("ERR020: FSAVE issued on a Turbo PMAC with incompatible flash memory")]
    FsaveFlashIncompatible,
    #[error("ERR021: FSAVE issued while clearing old flash memory sector")]
    FsaveErasing,
    #[error("ERR022: FREAD attempted but the flash memory is bad")]
    FreadFlashBad,
}

impl PmacError {
    /// Decode the three-decimal-digit code carried in an error frame.
    pub fn from_code(code: u16) -> PmacError {
        match code {
            1 => PmacError::CommandNotAllowedDuringProgramExecution,
            2 => PmacError::PasswordError,
            3 => PmacError::DataError,
            4 => PmacError::IllegalCharacter,
            5 => PmacError::BufferNotOpen,
            6 => PmacError::BufferFull,
            7 => PmacError::BufferInUse,
            8 => PmacError::MacroAuxError,
            9 => PmacError::ProgramStructureError,
            10 => PmacError::BothOvertravel,
            11 => PmacError::PreviousMoveNotComplete,
            12 => PmacError::OpenLoopMotor,
            13 => PmacError::InactiveMotor,
            14 => PmacError::NoMotorsInCs,
            15 => PmacError::InvalidProgramPointer,
            16 => PmacError::ImproperlyStructuredProgram,
            17 => PmacError::ResumeFromBadStop,
            18 => PmacError::PhaseRefDuringMove,
            19 => PmacError::CcBufferPositionChange,
            20 => PmacError::FsaveFlashIncompatible,
            21 => PmacError::FsaveErasing,
            22 => PmacError::FreadFlashBad,
            _ => PmacError::Unknown,
        }
    }

    /// The numeric code this variant decodes from (inverse of [`Self::from_code`]
    /// for all codes except the unknown/default slot).
    pub fn code(self) -> u16 {
        match self {
            PmacError::Unknown => 0,
            PmacError::CommandNotAllowedDuringProgramExecution => 1,
            PmacError::PasswordError => 2,
            PmacError::DataError => 3,
            PmacError::IllegalCharacter => 4,
            PmacError::BufferNotOpen => 5,
            PmacError::BufferFull => 6,
            PmacError::BufferInUse => 7,
            PmacError::MacroAuxError => 8,
            PmacError::ProgramStructureError => 9,
            PmacError::BothOvertravel => 10,
            PmacError::PreviousMoveNotComplete => 11,
            PmacError::OpenLoopMotor => 12,
            PmacError::InactiveMotor => 13,
            PmacError::NoMotorsInCs => 14,
            PmacError::InvalidProgramPointer => 15,
            PmacError::ImproperlyStructuredProgram => 16,
            PmacError::ResumeFromBadStop => 17,
            PmacError::PhaseRefDuringMove => 18,
            PmacError::CcBufferPositionChange => 19,
            PmacError::FsaveFlashIncompatible => 20,
            PmacError::FsaveErasing => 21,
            PmacError::FreadFlashBad => 22,
        }
    }

    /// True for the one error the link's ASCII-mailbox retry policy handles
    /// by requeueing the command exactly once.
    pub fn is_retryable(self) -> bool {
        matches!(self, PmacError::CommandNotAllowedDuringProgramExecution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_all_22_enumerated_codes() {
        for code in 1..=22u16 {
            let err = PmacError::from_code(code);
            assert_ne!(err, PmacError::Unknown, "code {code} decoded as unknown");
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn unknown_codes_fall_back() {
        assert_eq!(PmacError::from_code(0), PmacError::Unknown);
        assert_eq!(PmacError::from_code(999), PmacError::Unknown);
    }

    #[test]
    fn only_code_001_is_retryable() {
        assert!(PmacError::from_code(1).is_retryable());
        for code in [0, 2, 3, 10, 22] {
            assert!(!PmacError::from_code(code).is_retryable());
        }
    }
}

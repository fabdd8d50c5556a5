// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use core::fmt;

#[cfg(feature = "std")]
use crate::frame::Exception;
#[cfg(feature = "std")]
use std::{io, time::Duration};

/// Codec error
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Invalid coil value
    CoilValue(u16),
    /// Invalid buffer size
    BufferSize,
    /// Invalid function code
    FnCode(u8),
    /// Invalid exception code
    ExceptionCode(u8),
    /// Invalid exception function code
    ExceptionFnCode(u8),
    /// Invalid CRC
    Crc(u16, u16),
    /// Invalid byte count
    ByteCount(u8),
    /// Invalid quantity of coils or registers
    Quantity(u16),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;

        match self {
            CoilValue(v) => write!(f, "Invalid coil value: 0x{v:0>4X}"),
            BufferSize => write!(f, "Invalid buffer size"),
            FnCode(fn_code) => write!(f, "Invalid function code: 0x{fn_code:0>2X}"),
            ExceptionCode(code) => write!(f, "Invalid exception code: 0x{code:0>2X}"),
            ExceptionFnCode(code) => write!(f, "Invalid exception function code: 0x{code:0>2X}"),
            Crc(expected, actual) => write!(
                f,
                "Invalid CRC: expected = 0x{expected:0>4X}, actual = 0x{actual:0>4X}"
            ),
            ByteCount(cnt) => write!(f, "Invalid byte count: {cnt}"),
            Quantity(cnt) => write!(f, "Invalid quantity: {cnt}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Failure of a single client transaction or server listen cycle.
#[cfg(feature = "std")]
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// No complete frame arrived within the read timeout.
    #[error("no complete frame received within {}ms", .0.as_millis())]
    Timeout(Duration),
    /// A complete frame arrived but its checksum is wrong.
    #[error("CRC mismatch: expected = 0x{expected:0>4X}, actual = 0x{actual:0>4X}")]
    CrcMismatch { expected: u16, actual: u16 },
    /// The response carries neither the requested function code nor its exception variant.
    #[error("unexpected function code 0x{actual:0>2X} (requested 0x{expected:0>2X})")]
    UnexpectedFunctionCode { expected: u8, actual: u8 },
    /// The response was sent by another device.
    #[error("unexpected slave id {actual} (requested {expected})")]
    UnexpectedSlave { expected: u8, actual: u8 },
    /// The device answered with an exception response.
    #[error("device exception: {0}")]
    Exception(Exception),
    /// The response is well-formed but does not confirm the request.
    #[error("response does not match the request")]
    ResponseMismatch,
    /// Broadcast requests are never answered.
    #[error("broadcast requests have no response")]
    NoResponse,
    #[error("invalid frame: {0}")]
    Frame(#[source] Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(feature = "std")]
impl From<Error> for ProtocolError {
    fn from(err: Error) -> Self {
        match err {
            Error::Crc(expected, actual) => Self::CrcMismatch { expected, actual },
            err => Self::Frame(err),
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn crc_error_turns_into_crc_mismatch() {
        let err = ProtocolError::from(Error::Crc(0x1234, 0xABCD));
        assert!(matches!(
            err,
            ProtocolError::CrcMismatch {
                expected: 0x1234,
                actual: 0xABCD
            }
        ));
    }

    #[test]
    fn other_codec_errors_are_frame_errors() {
        let err = ProtocolError::from(Error::ByteCount(3));
        assert!(matches!(err, ProtocolError::Frame(Error::ByteCount(3))));
        assert_eq!(err.to_string(), "invalid frame: Invalid byte count: 3");
    }

    #[test]
    fn display_exception() {
        let err = ProtocolError::Exception(Exception::IllegalDataAddress);
        assert_eq!(err.to_string(), "device exception: Illegal data address");
    }
}

// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU

use super::*;
use crate::SlaveId;

pub mod client;
pub mod server;
pub use crate::frame::rtu::*;

// [MODBUS over Serial Line Specification and Implementation Guide V1.02](http://modbus.org/docs/Modbus_over_serial_line_V1_02.pdf), page 13
// "The maximum size of a MODBUS RTU frame is 256 bytes."
pub const MAX_FRAME_LEN: usize = 256;

/// Slave id + function code + CRC.
pub const MIN_FRAME_LEN: usize = 4;

/// Bytes an ADU adds around its PDU: the slave id and the CRC.
const ADU_OVERHEAD: usize = 3;

/// An extracted RTU PDU frame.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame<'a> {
    pub slave: SlaveId,
    pub pdu: &'a [u8],
}

/// The logical content of a decoded frame.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBody<'a> {
    /// A regular PDU: function code and the bytes between it and the CRC.
    Pdu(FunctionCode, &'a [u8]),
    /// The function code has the exception bit set.
    Exception(ExceptionResponse),
}

impl<'a> DecodedFrame<'a> {
    /// The raw function code byte, including a set exception bit.
    #[must_use]
    pub fn function(&self) -> Option<u8> {
        self.pdu.first().copied()
    }

    /// Split the PDU into function code and payload, or the exception it carries.
    pub fn body(&self) -> Result<FrameBody<'a>> {
        let Some((&fn_code, payload)) = self.pdu.split_first() else {
            return Err(Error::BufferSize);
        };
        if fn_code & EXCEPTION_FLAG != 0 {
            return ExceptionResponse::try_from(self.pdu).map(FrameBody::Exception);
        }
        Ok(FrameBody::Pdu(FunctionCode::new(fn_code), payload))
    }
}

/// Encode a raw frame: `[slave][function][payload][crc lo][crc hi]`.
///
/// Returns the number of bytes written to `buf`.
pub fn encode_frame(slave: SlaveId, function: u8, payload: &[u8], buf: &mut [u8]) -> Result<usize> {
    let len = payload.len() + ADU_OVERHEAD + 1;
    if buf.len() < len || len > MAX_FRAME_LEN {
        return Err(Error::BufferSize);
    }
    buf[0] = slave;
    buf[1] = function;
    buf[2..len - 2].copy_from_slice(payload);
    let crc = crc16(&buf[..len - 2]);
    BigEndian::write_u16(&mut buf[len - 2..len], crc);
    Ok(len)
}

/// Decode a buffer holding exactly one frame.
///
/// Fails if the buffer is shorter than [`MIN_FRAME_LEN`] or if the
/// trailing CRC does not match the preceding bytes.
pub fn decode_frame(buf: &[u8]) -> Result<DecodedFrame<'_>> {
    if buf.len() < MIN_FRAME_LEN || buf.len() > MAX_FRAME_LEN {
        return Err(Error::BufferSize);
    }
    extract_frame(buf, buf.len() - ADU_OVERHEAD)?.ok_or(Error::BufferSize)
}

/// Number of bytes of a complete ADU with a PDU of `pdu_len` bytes.
#[must_use]
pub const fn adu_len(pdu_len: usize) -> usize {
    pdu_len + ADU_OVERHEAD
}

/// Extract a PDU frame out of a buffer.
#[allow(clippy::similar_names)]
pub fn extract_frame(buf: &[u8], pdu_len: usize) -> Result<Option<DecodedFrame<'_>>> {
    if buf.is_empty() {
        return Err(Error::BufferSize);
    }

    let adu_len = 1 + pdu_len;
    if buf.len() >= adu_len + 2 {
        let (adu_buf, buf) = buf.split_at(adu_len);
        let (crc_buf, _) = buf.split_at(2);
        // Read trailing CRC and verify ADU
        let expected_crc = BigEndian::read_u16(crc_buf);
        let actual_crc = crc16(adu_buf);
        if expected_crc != actual_crc {
            #[cfg(feature = "log")]
            log::debug!(
                "Dropping RTU frame with invalid CRC: expected = 0x{expected_crc:0>4X}, actual = 0x{actual_crc:0>4X}"
            );
            return Err(Error::Crc(expected_crc, actual_crc));
        }
        let (slave_id, pdu_data) = adu_buf.split_at(1);
        let slave_id = slave_id[0];
        return Ok(Some(DecodedFrame {
            slave: slave_id,
            pdu: pdu_data,
        }));
    }
    // Incomplete frame
    Ok(None)
}

/// Calculate the CRC (Cyclic Redundancy Check) sum.
///
/// The result is byte swapped: written big-endian it yields the
/// low byte first as required on the wire.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0xFFFF;
    for x in data {
        crc ^= u16::from(*x);
        for _ in 0..8 {
            // if we followed clippy's suggestion to move out the crc >>= 1, the condition may not be met any more
            // the recommended action therefore makes no sense and it is better to allow this lint
            #[allow(clippy::branches_sharing_code)]
            if (crc & 0x0001) != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc.rotate_right(8)
}

/// Extract the PDU length out of the ADU request buffer.
pub const fn request_pdu_len(adu_buf: &[u8]) -> Result<Option<usize>> {
    if adu_buf.len() < 2 {
        return Ok(None);
    }
    let fn_code = adu_buf[1];
    let len = match fn_code {
        0x01..=0x06 | 0x08 => Some(5),
        0x07 | 0x0B | 0x0C | 0x11 => Some(1),
        0x0F | 0x10 => {
            if adu_buf.len() > 6 {
                Some(6 + adu_buf[6] as usize)
            } else {
                // incomplete frame
                None
            }
        }
        0x16 => Some(7),
        0x18 => Some(3),
        0x17 => {
            if adu_buf.len() > 10 {
                Some(10 + adu_buf[10] as usize)
            } else {
                // incomplete frame
                None
            }
        }
        _ => {
            return Err(Error::FnCode(fn_code));
        }
    };
    Ok(len)
}

/// Extract the PDU length out of the ADU response buffer.
pub fn response_pdu_len(adu_buf: &[u8]) -> Result<Option<usize>> {
    if adu_buf.len() < 2 {
        return Ok(None);
    }
    let fn_code = adu_buf[1];
    let len = match fn_code {
        0x01..=0x04 | 0x0C | 0x17 => {
            if adu_buf.len() > 2 {
                Some(2 + adu_buf[2] as usize)
            } else {
                // incomplete frame
                None
            }
        }
        0x05 | 0x06 | 0x08 | 0x0B | 0x0F | 0x10 => Some(5),
        0x07 | 0x81..=0xAB => Some(2),
        0x16 => Some(7),
        0x18 => {
            if adu_buf.len() > 3 {
                Some(3 + BigEndian::read_u16(&adu_buf[2..=3]) as usize)
            } else {
                // incomplete frame
                None
            }
        }
        _ => return Err(Error::FnCode(fn_code)),
    };
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_crc16() {
        let msg = &[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02];
        assert_eq!(crc16(msg), 0xB663);

        let msg = &[0x01, 0x03, 0x04, 0x00, 0x20, 0x00, 0x00];
        assert_eq!(crc16(msg), 0xFBF9);
    }

    #[test]
    fn test_request_pdu_len() {
        let buf = &mut [0x66, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(request_pdu_len(buf).is_err());

        for fn_code in 0x01..=0x06 {
            buf[1] = fn_code;
            assert_eq!(request_pdu_len(buf).unwrap(), Some(5));
        }

        buf[1] = 0x07;
        assert_eq!(request_pdu_len(buf).unwrap(), Some(1));

        buf[1] = 0x08;
        assert_eq!(request_pdu_len(buf).unwrap(), Some(5));

        buf[1] = 0x0B;
        assert_eq!(request_pdu_len(buf).unwrap(), Some(1));

        buf[1] = 0x0C;
        assert_eq!(request_pdu_len(buf).unwrap(), Some(1));

        buf[1] = 0x0F;
        buf[6] = 99;
        assert_eq!(request_pdu_len(buf).unwrap(), Some(105));

        buf[1] = 0x10;
        buf[6] = 99;
        assert_eq!(request_pdu_len(buf).unwrap(), Some(105));

        buf[1] = 0x11;
        assert_eq!(request_pdu_len(buf).unwrap(), Some(1));

        buf[1] = 0x16;
        assert_eq!(request_pdu_len(buf).unwrap(), Some(7));

        buf[1] = 0x17;
        buf[10] = 99; // write byte count
        assert_eq!(request_pdu_len(buf).unwrap(), Some(109));

        buf[1] = 0x18;
        assert_eq!(request_pdu_len(buf).unwrap(), Some(3));
    }

    #[test]
    fn request_pdu_len_waits_for_byte_count() {
        let buf = &[0x02, 0x10, 0x00, 0x05, 0x00, 0x04];
        assert_eq!(request_pdu_len(buf).unwrap(), None);
        let buf = &[0x02, 0x10, 0x00, 0x05, 0x00, 0x04, 0x08];
        assert_eq!(request_pdu_len(buf).unwrap(), Some(14));
        let buf = &[0x02];
        assert_eq!(request_pdu_len(buf).unwrap(), None);
    }

    #[test]
    fn test_get_response_pdu_len() {
        let buf = &mut [0x66, 0x01, 99];
        assert_eq!(response_pdu_len(buf).unwrap(), Some(101));

        let buf = &mut [0x66, 0x00, 99, 0x00];
        assert_eq!(response_pdu_len(buf).err().unwrap(), Error::FnCode(0));

        let buf = &mut [0x66, 0xee, 99, 0x00];
        assert_eq!(response_pdu_len(buf).err().unwrap(), Error::FnCode(0xee));

        for fn_code in 0x01..=0x04 {
            buf[1] = fn_code;
            assert_eq!(response_pdu_len(buf).unwrap(), Some(101));
        }

        for fn_code in [0x05, 0x06, 0x08, 0x0B, 0x0F, 0x10] {
            buf[1] = fn_code;
            assert_eq!(response_pdu_len(buf).unwrap(), Some(5));
        }

        buf[1] = 0x07;
        assert_eq!(response_pdu_len(buf).unwrap(), Some(2));

        buf[1] = 0x0C;
        assert_eq!(response_pdu_len(buf).unwrap(), Some(101));

        buf[1] = 0x16;
        assert_eq!(response_pdu_len(buf).unwrap(), Some(7));

        buf[1] = 0x17;
        assert_eq!(response_pdu_len(buf).unwrap(), Some(101));

        buf[1] = 0x18;
        buf[2] = 0x01; // byte count Hi
        buf[3] = 0x00; // byte count Lo
        assert_eq!(response_pdu_len(buf).unwrap(), Some(259));

        for i in 0x81..0xAB {
            buf[1] = i;
            assert_eq!(response_pdu_len(buf).unwrap(), Some(2));
        }
    }

    mod frame_codec {

        use super::*;

        #[test]
        fn encode_write_multiple_registers_confirmation() {
            let buf = &mut [0; MAX_FRAME_LEN];
            let len = encode_frame(0x02, 0x10, &[0x00, 0x05, 0x00, 0x04], buf).unwrap();
            assert_eq!(len, 8);
            assert_eq!(&buf[..6], &[0x02, 0x10, 0x00, 0x05, 0x00, 0x04]);
            let crc = crc16(&buf[..6]).to_be_bytes();
            assert_eq!(&buf[6..8], &crc);
        }

        #[test]
        fn encode_frame_into_small_buffer() {
            let buf = &mut [0; 5];
            assert_eq!(
                encode_frame(0x01, 0x03, &[0x00, 0x00], buf).err(),
                Some(Error::BufferSize)
            );
        }

        #[test]
        fn encode_and_decode_frames() {
            let payloads: &[&[u8]] = &[&[], &[0x00], &[0x12, 0x34, 0x56], &[0xFF; 100]];
            for slave in [0x00, 0x01, 0x7F, 0xF7] {
                for function in [0x01, 0x03, 0x08, 0x10, 0x41] {
                    for payload in payloads {
                        let buf = &mut [0; MAX_FRAME_LEN];
                        let len = encode_frame(slave, function, payload, buf).unwrap();
                        let frame = decode_frame(&buf[..len]).unwrap();
                        assert_eq!(frame.slave, slave);
                        assert_eq!(frame.function(), Some(function));
                        assert_eq!(
                            frame.body().unwrap(),
                            FrameBody::Pdu(FunctionCode::new(function), payload)
                        );
                    }
                }
            }
        }

        #[test]
        fn single_bit_flips_break_the_crc() {
            let buf = &mut [0; MAX_FRAME_LEN];
            let len = encode_frame(0x02, 0x10, &[0x00, 0x05, 0x00, 0x04], buf).unwrap();
            // Every bit in front of the CRC, plus one bit of each CRC byte.
            let bits = (0..(len - 2) * 8).chain([(len - 2) * 8, (len - 1) * 8 + 7]);
            for bit in bits {
                let mut frame = [0; 8];
                frame.copy_from_slice(&buf[..len]);
                frame[bit / 8] ^= 1 << (bit % 8);
                assert!(
                    matches!(decode_frame(&frame), Err(Error::Crc(_, _))),
                    "bit {bit} flipped without detection"
                );
            }
        }

        #[test]
        fn decode_too_short_frame() {
            assert_eq!(decode_frame(&[]).err(), Some(Error::BufferSize));
            assert_eq!(decode_frame(&[0x01, 0x03, 0x00]).err(), Some(Error::BufferSize));
        }

        #[test]
        fn decode_exception_frame() {
            let buf = &mut [0; MAX_FRAME_LEN];
            let len = encode_frame(0x02, 0x83, &[0x02], buf).unwrap();
            let frame = decode_frame(&buf[..len]).unwrap();
            assert_eq!(
                frame.body().unwrap(),
                FrameBody::Exception(ExceptionResponse {
                    function: FunctionCode::ReadHoldingRegisters,
                    exception: Exception::IllegalDataAddress,
                })
            );
        }

        #[test]
        fn decode_exception_frame_with_unknown_code() {
            let buf = &mut [0; MAX_FRAME_LEN];
            let len = encode_frame(0x02, 0x83, &[0x42], buf).unwrap();
            let frame = decode_frame(&buf[..len]).unwrap();
            assert_eq!(frame.body().err(), Some(Error::ExceptionCode(0x42)));
        }
    }

    mod frame_extractor {

        use super::*;

        #[test]
        fn extract_partly_received_rtu_frame() {
            let buf = &[
                0x12, // slave address
                0x02, // function code
                0x03, // byte count
                0x00, // data
                0x00, // data
                0x00, // data
                0x00, // CRC first byte
                      // missing crc second byte
            ];
            let pdu_len = response_pdu_len(buf).unwrap().unwrap();
            let res = extract_frame(buf, pdu_len).unwrap();
            assert!(res.is_none());
        }

        #[test]
        fn extract_usual_rtu_response_frame() {
            let buf = &[
                0x01, // slave address
                0x03, // function code
                0x04, // byte count
                0x89, //
                0x02, //
                0x42, //
                0xC7, //
                0x00, // crc
                0x9D, // crc
                0x03, // -- start of next frame
            ];
            let pdu_len = response_pdu_len(buf).unwrap().unwrap();
            let DecodedFrame { slave, pdu } = extract_frame(buf, pdu_len).unwrap().unwrap();
            assert_eq!(slave, 0x01);
            assert_eq!(pdu.len(), 6);
            assert_eq!(adu_len(pdu_len), 9);
        }

        #[test]
        fn extract_frame_with_bad_crc() {
            let buf = &[0x01, 0x03, 0x04, 0x89, 0x02, 0x42, 0xC7, 0x00, 0x9E];
            assert!(matches!(extract_frame(buf, 6), Err(Error::Crc(0x009E, _))));
        }
    }
}

// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{error::*, frame::*, util::*};
use byteorder::{BigEndian, ByteOrder};

pub mod rtu;

type Result<T> = core::result::Result<T, Error>;

impl TryFrom<u8> for Exception {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        use crate::frame::Exception::*;
        let ex = match code {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            _ => {
                return Err(Error::ExceptionCode(code));
            }
        };
        Ok(ex)
    }
}

impl From<ExceptionResponse> for [u8; 2] {
    fn from(ex: ExceptionResponse) -> [u8; 2] {
        let fn_code = ex.function.value();
        debug_assert!(fn_code < EXCEPTION_FLAG);
        [fn_code | EXCEPTION_FLAG, ex.exception.code()]
    }
}

impl TryFrom<&[u8]> for ExceptionResponse {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::BufferSize);
        }
        let fn_err_code = bytes[0];
        if fn_err_code < EXCEPTION_FLAG {
            return Err(Error::ExceptionFnCode(fn_err_code));
        }
        let function = FunctionCode::new(fn_err_code & !EXCEPTION_FLAG);
        let exception = Exception::try_from(bytes[1])?;
        Ok(ExceptionResponse {
            function,
            exception,
        })
    }
}

impl<'r> TryFrom<&'r [u8]> for Request<'r> {
    type Error = Error;

    fn try_from(bytes: &'r [u8]) -> Result<Self> {
        use crate::frame::Request::*;
        use FunctionCode as F;

        if bytes.is_empty() {
            return Err(Error::BufferSize);
        }

        let fn_code = FunctionCode::new(bytes[0]);

        if bytes.len() < min_request_pdu_len(fn_code) {
            return Err(Error::BufferSize);
        }

        let req = match fn_code {
            F::ReadCoils
            | F::ReadDiscreteInputs
            | F::ReadInputRegisters
            | F::ReadHoldingRegisters
            | F::WriteSingleRegister => {
                let addr = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);

                match fn_code {
                    F::ReadCoils => ReadCoils(addr, quantity),
                    F::ReadDiscreteInputs => ReadDiscreteInputs(addr, quantity),
                    F::ReadInputRegisters => ReadInputRegisters(addr, quantity),
                    F::ReadHoldingRegisters => ReadHoldingRegisters(addr, quantity),
                    _ => WriteSingleRegister(addr, quantity),
                }
            }
            F::WriteSingleCoil => WriteSingleCoil(
                BigEndian::read_u16(&bytes[1..3]),
                u16_coil_to_bool(BigEndian::read_u16(&bytes[3..5]))?,
            ),
            F::WriteMultipleCoils => {
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]) as usize;
                let byte_count = bytes[5];
                if bytes.len() < (6 + byte_count as usize)
                    || byte_count as usize != packed_coils_len(quantity)
                {
                    return Err(Error::ByteCount(byte_count));
                }
                let data = &bytes[6..6 + byte_count as usize];
                WriteMultipleCoils(address, Coils { data, quantity })
            }
            F::WriteMultipleRegisters => {
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]) as usize;
                let byte_count = bytes[5];
                if bytes.len() < (6 + byte_count as usize) || byte_count as usize != quantity * 2 {
                    return Err(Error::ByteCount(byte_count));
                }
                let data = Data {
                    quantity,
                    data: &bytes[6..6 + byte_count as usize],
                };
                WriteMultipleRegisters(address, data)
            }
            F::Diagnostics => {
                let sub_function = BigEndian::read_u16(&bytes[1..3]);
                let data = &bytes[3..];
                if data.len() % 2 != 0 {
                    return Err(Error::BufferSize);
                }
                let data = Data {
                    quantity: data.len() / 2,
                    data,
                };
                Diagnostics(sub_function, data)
            }
            F::Custom(code) if code < EXCEPTION_FLAG => Custom(fn_code, &bytes[1..]),
            F::Custom(code) => return Err(Error::FnCode(code)),
        };
        Ok(req)
    }
}

impl<'r> TryFrom<&'r [u8]> for Response<'r> {
    type Error = Error;

    fn try_from(bytes: &'r [u8]) -> Result<Self> {
        use crate::frame::Response::*;
        use FunctionCode as F;

        if bytes.is_empty() {
            return Err(Error::BufferSize);
        }
        let fn_code = FunctionCode::new(bytes[0]);
        if bytes.len() < min_response_pdu_len(fn_code) {
            return Err(Error::BufferSize);
        }
        let rsp = match fn_code {
            F::ReadCoils | F::ReadDiscreteInputs => {
                let byte_count = bytes[1] as usize;
                if byte_count + 2 > bytes.len() {
                    return Err(Error::BufferSize);
                }
                let data = &bytes[2..byte_count + 2];
                // Here we have not information about the exact requested quantity
                // therefore we just assume that the whole byte is meant.
                let quantity = byte_count * 8;

                match fn_code {
                    F::ReadCoils => ReadCoils(Coils { data, quantity }),
                    _ => ReadDiscreteInputs(Coils { data, quantity }),
                }
            }
            F::WriteSingleCoil => WriteSingleCoil(
                BigEndian::read_u16(&bytes[1..3]),
                u16_coil_to_bool(BigEndian::read_u16(&bytes[3..5]))?,
            ),
            F::WriteMultipleCoils | F::WriteSingleRegister | F::WriteMultipleRegisters => {
                let addr = BigEndian::read_u16(&bytes[1..3]);
                let payload = BigEndian::read_u16(&bytes[3..5]);
                match fn_code {
                    F::WriteMultipleCoils => WriteMultipleCoils(addr, payload),
                    F::WriteSingleRegister => WriteSingleRegister(addr, payload),
                    _ => WriteMultipleRegisters(addr, payload),
                }
            }
            F::ReadInputRegisters | F::ReadHoldingRegisters => {
                let byte_count = bytes[1] as usize;
                if byte_count + 2 > bytes.len() {
                    return Err(Error::BufferSize);
                }
                if byte_count % 2 != 0 {
                    return Err(Error::ByteCount(bytes[1]));
                }
                let data = Data {
                    quantity: byte_count / 2,
                    data: &bytes[2..2 + byte_count],
                };

                match fn_code {
                    F::ReadInputRegisters => ReadInputRegisters(data),
                    _ => ReadHoldingRegisters(data),
                }
            }
            F::Diagnostics => {
                let sub_function = BigEndian::read_u16(&bytes[1..3]);
                let data = &bytes[3..];
                if data.len() % 2 != 0 {
                    return Err(Error::BufferSize);
                }
                let data = Data {
                    quantity: data.len() / 2,
                    data,
                };
                Diagnostics(sub_function, data)
            }
            F::Custom(code) if code < EXCEPTION_FLAG => Custom(fn_code, &bytes[1..]),
            F::Custom(code) => return Err(Error::FnCode(code)),
        };
        Ok(rsp)
    }
}

impl Request<'_> {
    /// Serialize the PDU into `buf` and return the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        use crate::frame::Request::*;

        let len = self.pdu_len();
        if buf.len() < len {
            return Err(Error::BufferSize);
        }
        buf[0] = FunctionCode::from(*self).value();
        match *self {
            ReadCoils(address, quantity)
            | ReadDiscreteInputs(address, quantity)
            | ReadInputRegisters(address, quantity)
            | ReadHoldingRegisters(address, quantity) => {
                BigEndian::write_u16(&mut buf[1..3], address);
                BigEndian::write_u16(&mut buf[3..5], quantity);
            }
            WriteSingleCoil(address, state) => {
                BigEndian::write_u16(&mut buf[1..3], address);
                BigEndian::write_u16(&mut buf[3..5], bool_to_u16_coil(state));
            }
            WriteSingleRegister(address, word) => {
                BigEndian::write_u16(&mut buf[1..3], address);
                BigEndian::write_u16(&mut buf[3..5], word);
            }
            WriteMultipleCoils(address, coils) => {
                let packed_len = coils.packed_len();
                let quantity = u16::try_from(coils.len()).map_err(|_| Error::BufferSize)?;
                let byte_count = u8::try_from(packed_len).map_err(|_| Error::BufferSize)?;
                BigEndian::write_u16(&mut buf[1..3], address);
                BigEndian::write_u16(&mut buf[3..5], quantity);
                buf[5] = byte_count;
                if coils.data.len() < packed_len {
                    return Err(Error::BufferSize);
                }
                buf[6..6 + packed_len].copy_from_slice(&coils.data[..packed_len]);
            }
            WriteMultipleRegisters(address, words) => {
                let quantity = u16::try_from(words.len()).map_err(|_| Error::BufferSize)?;
                let byte_count = u8::try_from(words.len() * 2).map_err(|_| Error::BufferSize)?;
                BigEndian::write_u16(&mut buf[1..3], address);
                BigEndian::write_u16(&mut buf[3..5], quantity);
                buf[5] = byte_count;
                words.copy_to(&mut buf[6..]);
            }
            Diagnostics(sub_function, words) => {
                BigEndian::write_u16(&mut buf[1..3], sub_function);
                words.copy_to(&mut buf[3..]);
            }
            Custom(_, data) => {
                buf[1..len].copy_from_slice(data);
            }
        }
        Ok(len)
    }
}

impl Response<'_> {
    /// Serialize the PDU into `buf` and return the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        use crate::frame::Response::*;

        let len = self.pdu_len();
        if buf.len() < len {
            return Err(Error::BufferSize);
        }
        buf[0] = FunctionCode::from(*self).value();
        match *self {
            ReadCoils(coils) | ReadDiscreteInputs(coils) => {
                let packed_len = coils.packed_len();
                if coils.data.len() < packed_len {
                    return Err(Error::BufferSize);
                }
                buf[1] = u8::try_from(packed_len).map_err(|_| Error::BufferSize)?;
                buf[2..2 + packed_len].copy_from_slice(&coils.data[..packed_len]);
            }
            WriteSingleCoil(address, state) => {
                BigEndian::write_u16(&mut buf[1..3], address);
                BigEndian::write_u16(&mut buf[3..5], bool_to_u16_coil(state));
            }
            WriteMultipleCoils(address, payload)
            | WriteSingleRegister(address, payload)
            | WriteMultipleRegisters(address, payload) => {
                BigEndian::write_u16(&mut buf[1..3], address);
                BigEndian::write_u16(&mut buf[3..5], payload);
            }
            ReadInputRegisters(words) | ReadHoldingRegisters(words) => {
                buf[1] = u8::try_from(words.len() * 2).map_err(|_| Error::BufferSize)?;
                words.copy_to(&mut buf[2..]);
            }
            Diagnostics(sub_function, words) => {
                BigEndian::write_u16(&mut buf[1..3], sub_function);
                words.copy_to(&mut buf[3..]);
            }
            Custom(_, data) => {
                buf[1..len].copy_from_slice(data);
            }
        }
        Ok(len)
    }
}

impl RequestPdu<'_> {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.0.encode(buf)
    }
}

impl ResponsePdu<'_> {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        match self.0 {
            Ok(rsp) => rsp.encode(buf),
            Err(ex) => {
                if buf.len() < 2 {
                    return Err(Error::BufferSize);
                }
                let bytes: [u8; 2] = ex.into();
                buf[..2].copy_from_slice(&bytes);
                Ok(2)
            }
        }
    }
}

const fn min_request_pdu_len(fn_code: FunctionCode) -> usize {
    use FunctionCode::*;
    match fn_code {
        ReadCoils | ReadDiscreteInputs | ReadInputRegisters | WriteSingleCoil
        | ReadHoldingRegisters | WriteSingleRegister => 5,
        WriteMultipleCoils | WriteMultipleRegisters => 6,
        Diagnostics => 3,
        Custom(_) => 1,
    }
}

const fn min_response_pdu_len(fn_code: FunctionCode) -> usize {
    use FunctionCode::*;
    match fn_code {
        ReadCoils | ReadDiscreteInputs | ReadInputRegisters | ReadHoldingRegisters => 2,
        WriteSingleCoil | WriteMultipleCoils | WriteSingleRegister | WriteMultipleRegisters => 5,
        Diagnostics => 3,
        Custom(_) => 1,
    }
}

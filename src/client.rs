// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU client (master).

use crate::{
    Address, Coils, Data, FunctionCode, Request, Response, SlaveId,
    config::Config,
    error::{Error, ProtocolError},
    frame::{
        EXCEPTION_FLAG, ExceptionResponse, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS,
        MAX_WRITE_REGISTERS, RequestPdu,
    },
    rtu::{
        BROADCAST_ADDRESS, Header, MAX_FRAME_LEN, RequestAdu, client::encode_request,
        decode_frame, encode_frame, response_pdu_len,
    },
    transport::{Hex, Transport, read_frame},
    util::{packed_coils_len, unpack_coils},
};

/// Space for the packed values of the largest write request.
const MAX_WRITE_DATA_LEN: usize = MAX_WRITE_REGISTERS as usize * 2;

type Result<T> = core::result::Result<T, ProtocolError>;

/// A synchronous Modbus RTU client.
///
/// Every operation is one complete transaction: the request is written,
/// then the response is awaited for at most [`Config::read_timeout`].
/// Requests to [`BROADCAST_ADDRESS`] are never answered, so broadcast
/// writes return once the request has been sent and broadcast reads are
/// rejected with [`ProtocolError::NoResponse`].
#[derive(Debug)]
pub struct Client<T> {
    transport: T,
    config: Config,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, Config::default())
    }

    pub const fn with_config(transport: T, config: Config) -> Self {
        Self { transport, config }
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Give back the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Read `count` coils (`0x01`).
    pub fn read_coils(&mut self, slave: SlaveId, start: Address, count: u16) -> Result<Vec<bool>> {
        check_quantity(count.into(), MAX_READ_COILS)?;
        self.read_bits(slave, Request::ReadCoils(start, count), count)
    }

    /// Read `count` discrete inputs (`0x02`).
    pub fn read_discrete_inputs(
        &mut self,
        slave: SlaveId,
        start: Address,
        count: u16,
    ) -> Result<Vec<bool>> {
        check_quantity(count.into(), MAX_READ_COILS)?;
        self.read_bits(slave, Request::ReadDiscreteInputs(start, count), count)
    }

    /// Read `count` holding registers (`0x03`).
    pub fn read_holding_registers(
        &mut self,
        slave: SlaveId,
        start: Address,
        count: u16,
    ) -> Result<Vec<u16>> {
        check_quantity(count.into(), MAX_READ_REGISTERS)?;
        self.read_words(slave, Request::ReadHoldingRegisters(start, count), count)
    }

    /// Read `count` input registers (`0x04`).
    pub fn read_input_registers(
        &mut self,
        slave: SlaveId,
        start: Address,
        count: u16,
    ) -> Result<Vec<u16>> {
        check_quantity(count.into(), MAX_READ_REGISTERS)?;
        self.read_words(slave, Request::ReadInputRegisters(start, count), count)
    }

    /// Write a single coil (`0x05`).
    pub fn write_single_coil(&mut self, slave: SlaveId, address: Address, value: bool) -> Result<()> {
        let rx = &mut [0; MAX_FRAME_LEN];
        match self.transact(slave, Request::WriteSingleCoil(address, value), rx)? {
            None => Ok(()),
            Some(Response::WriteSingleCoil(a, v)) if a == address && v == value => Ok(()),
            Some(_) => Err(ProtocolError::ResponseMismatch),
        }
    }

    /// Write a single holding register (`0x06`).
    pub fn write_single_register(
        &mut self,
        slave: SlaveId,
        address: Address,
        value: u16,
    ) -> Result<()> {
        let rx = &mut [0; MAX_FRAME_LEN];
        match self.transact(slave, Request::WriteSingleRegister(address, value), rx)? {
            None => Ok(()),
            Some(Response::WriteSingleRegister(a, v)) if a == address && v == value => Ok(()),
            Some(_) => Err(ProtocolError::ResponseMismatch),
        }
    }

    /// Write consecutive coils starting at `start` (`0x0F`).
    pub fn write_multiple_coils(
        &mut self,
        slave: SlaveId,
        start: Address,
        values: &[bool],
    ) -> Result<()> {
        let count = check_quantity(values.len(), MAX_WRITE_COILS)?;
        let packed = &mut [0; MAX_WRITE_DATA_LEN];
        let coils = Coils::from_bools(values, packed)?;
        let rx = &mut [0; MAX_FRAME_LEN];
        match self.transact(slave, Request::WriteMultipleCoils(start, coils), rx)? {
            None => Ok(()),
            Some(Response::WriteMultipleCoils(a, q)) if a == start && q == count => Ok(()),
            Some(_) => Err(ProtocolError::ResponseMismatch),
        }
    }

    /// Write consecutive holding registers starting at `start` (`0x10`).
    pub fn write_multiple_registers(
        &mut self,
        slave: SlaveId,
        start: Address,
        values: &[u16],
    ) -> Result<()> {
        let count = check_quantity(values.len(), MAX_WRITE_REGISTERS)?;
        let packed = &mut [0; MAX_WRITE_DATA_LEN];
        let data = Data::from_words(values, packed)?;
        let rx = &mut [0; MAX_FRAME_LEN];
        match self.transact(slave, Request::WriteMultipleRegisters(start, data), rx)? {
            None => Ok(()),
            Some(Response::WriteMultipleRegisters(a, q)) if a == start && q == count => Ok(()),
            Some(_) => Err(ProtocolError::ResponseMismatch),
        }
    }

    /// Run a diagnostics sub-function with one data word (`0x08`).
    ///
    /// Returns the data word of the response.
    pub fn diagnostics(&mut self, slave: SlaveId, sub_function: u16, data: u16) -> Result<u16> {
        expect_response(slave)?;
        let packed = &mut [0; 2];
        let words = Data::from_words(&[data], packed)?;
        let rx = &mut [0; MAX_FRAME_LEN];
        match self.transact(slave, Request::Diagnostics(sub_function, words), rx)? {
            Some(Response::Diagnostics(sub, words)) if sub == sub_function => {
                words.get(0).ok_or(ProtocolError::ResponseMismatch)
            }
            _ => Err(ProtocolError::ResponseMismatch),
        }
    }

    /// Send an arbitrary request and return the payload of the response.
    ///
    /// The payload excludes slave id, function code and CRC. The response
    /// length is derived from the function code, so only functions with a
    /// known response layout can be awaited. A broadcast yields an empty
    /// payload.
    pub fn raw(&mut self, slave: SlaveId, function: u8, payload: &[u8]) -> Result<Vec<u8>> {
        let tx = &mut [0; MAX_FRAME_LEN];
        let len = encode_frame(slave, function, payload, tx)?;
        let rx = &mut [0; MAX_FRAME_LEN];
        let pdu = self.exchange(slave, function, &tx[..len], rx)?;
        Ok(pdu.map(|pdu| pdu[1..].to_vec()).unwrap_or_default())
    }

    fn read_bits(&mut self, slave: SlaveId, request: Request<'_>, count: u16) -> Result<Vec<bool>> {
        expect_response(slave)?;
        let rx = &mut [0; MAX_FRAME_LEN];
        let coils = match self.transact(slave, request, rx)? {
            Some(Response::ReadCoils(coils) | Response::ReadDiscreteInputs(coils)) => coils,
            _ => return Err(ProtocolError::ResponseMismatch),
        };
        if coils.payload().len() != packed_coils_len(count.into()) {
            return Err(ProtocolError::ResponseMismatch);
        }
        let mut values = vec![false; count.into()];
        unpack_coils(coils.payload(), count, &mut values)?;
        Ok(values)
    }

    fn read_words(&mut self, slave: SlaveId, request: Request<'_>, count: u16) -> Result<Vec<u16>> {
        expect_response(slave)?;
        let rx = &mut [0; MAX_FRAME_LEN];
        let data = match self.transact(slave, request, rx)? {
            Some(Response::ReadHoldingRegisters(data) | Response::ReadInputRegisters(data)) => data,
            _ => return Err(ProtocolError::ResponseMismatch),
        };
        if data.len() != usize::from(count) {
            return Err(ProtocolError::ResponseMismatch);
        }
        Ok(data.into_iter().collect())
    }

    /// Send a typed request and decode the typed response.
    fn transact<'b>(
        &mut self,
        slave: SlaveId,
        request: Request<'_>,
        rx: &'b mut [u8; MAX_FRAME_LEN],
    ) -> Result<Option<Response<'b>>> {
        let tx = &mut [0; MAX_FRAME_LEN];
        let adu = RequestAdu {
            hdr: Header { slave },
            pdu: RequestPdu(request),
        };
        let len = encode_request(adu, tx)?;
        let function = FunctionCode::from(request).value();
        let Some(pdu) = self.exchange(slave, function, &tx[..len], rx)? else {
            return Ok(None);
        };
        Ok(Some(Response::try_from(pdu)?))
    }

    /// Write a complete request frame and await the response.
    ///
    /// Returns the validated response PDU, or `None` for a broadcast.
    fn exchange<'b>(
        &mut self,
        slave: SlaveId,
        function: u8,
        request: &[u8],
        rx: &'b mut [u8; MAX_FRAME_LEN],
    ) -> Result<Option<&'b [u8]>> {
        self.transport.discard_input()?;
        log::trace!("Sending request: {}", Hex(request));
        self.transport.write_all(request)?;
        if slave == BROADCAST_ADDRESS {
            return Ok(None);
        }

        let len = match read_frame(
            &mut self.transport,
            rx,
            self.config.read_timeout,
            response_pdu_len,
        ) {
            Err(ProtocolError::Frame(Error::FnCode(actual))) if actual != function => {
                return Err(ProtocolError::UnexpectedFunctionCode {
                    expected: function,
                    actual,
                });
            }
            res => res?,
        };
        let rx: &'b [u8] = &rx[..len];
        log::trace!("Received response: {}", Hex(rx));

        let frame = decode_frame(rx)?;
        if frame.slave != slave {
            return Err(ProtocolError::UnexpectedSlave {
                expected: slave,
                actual: frame.slave,
            });
        }
        let Some(actual) = frame.function() else {
            return Err(Error::BufferSize.into());
        };
        if actual == function | EXCEPTION_FLAG {
            let ExceptionResponse { exception, .. } = ExceptionResponse::try_from(frame.pdu)?;
            return Err(ProtocolError::Exception(exception));
        }
        if actual != function {
            return Err(ProtocolError::UnexpectedFunctionCode {
                expected: function,
                actual,
            });
        }
        Ok(Some(frame.pdu))
    }
}

fn check_quantity(count: usize, max: u16) -> core::result::Result<u16, Error> {
    let quantity = u16::try_from(count).unwrap_or(u16::MAX);
    if quantity == 0 || quantity > max {
        return Err(Error::Quantity(quantity));
    }
    Ok(quantity)
}

fn expect_response(slave: SlaveId) -> Result<()> {
    if slave == BROADCAST_ADDRESS {
        return Err(ProtocolError::NoResponse);
    }
    Ok(())
}

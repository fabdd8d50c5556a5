// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU server (slave).

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    Address, Coils, Data, Exception, FunctionCode, Request, Response,
    config::Config,
    device::Device,
    error::{Error, ProtocolError},
    frame::{
        EXCEPTION_FLAG, ExceptionResponse, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS,
        MAX_WRITE_REGISTERS, ResponsePdu,
    },
    object::{Coil, DiscreteInput, HoldingRegister, InputRegister},
    rtu::{
        BROADCAST_ADDRESS, Header, MAX_FRAME_LEN, ResponseAdu, decode_frame, request_pdu_len,
        server::encode_response,
    },
    transport::{FrameReceiver, Hex, Transport},
};

/// Name of the listener thread.
pub const LISTENER_THREAD_NAME: &str = "modbus-rtu-server";

/// Pause after a failed listen cycle.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Diagnostics sub-function "Return Query Data".
const RETURN_QUERY_DATA: u16 = 0x0000;

type Result<T> = core::result::Result<T, ProtocolError>;

/// A Modbus RTU server answering requests on behalf of a [`Device`].
#[derive(Debug)]
pub struct Server<T, D> {
    transport: T,
    device: D,
    config: Config,
    receiver: FrameReceiver,
}

impl<T: Transport, D: Device> Server<T, D> {
    pub fn new(transport: T, device: D) -> Self {
        Self::with_config(transport, device, Config::default())
    }

    pub const fn with_config(transport: T, device: D, config: Config) -> Self {
        Self {
            transport,
            device,
            config,
            receiver: FrameReceiver::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_parts(self) -> (T, D) {
        (self.transport, self.device)
    }

    /// Handle one complete request frame.
    ///
    /// Returns the length of the response written to `out`, or `None` if
    /// the frame must not be answered: a broken CRC, another slave id or a
    /// broadcast. Broadcast requests are executed nevertheless.
    pub fn process_frame(&mut self, adu: &[u8], out: &mut [u8]) -> Option<usize> {
        let frame = match decode_frame(adu) {
            Ok(frame) => frame,
            Err(err) => {
                log::debug!("Dropping request frame: {err}");
                return None;
            }
        };
        let id = self.device.id();
        let broadcast = frame.slave == BROADCAST_ADDRESS;
        if frame.slave != id && !broadcast {
            log::debug!("Ignoring request for slave {}", frame.slave);
            return None;
        }
        let function = frame.function()?;
        if function & EXCEPTION_FLAG != 0 {
            log::debug!("Ignoring exception frame 0x{function:0>2X} on the request side");
            return None;
        }

        let buf = &mut [0; MAX_FRAME_LEN];
        let result = match Request::try_from(frame.pdu) {
            Ok(request) => self.dispatch(request, buf),
            Err(err) => {
                log::debug!("Rejecting malformed request: {err}");
                Err(rejection(err))
            }
        };
        if broadcast {
            log::debug!("Executed broadcast request (function 0x{function:0>2X})");
            return None;
        }
        let pdu = match result {
            Ok(response) => ResponsePdu(Ok(response)),
            Err(exception) => {
                log::debug!("Answering function 0x{function:0>2X} with exception: {exception}");
                ResponsePdu(Err(ExceptionResponse {
                    function: FunctionCode::new(function),
                    exception,
                }))
            }
        };
        let adu = ResponseAdu {
            hdr: Header { slave: id },
            pdu,
        };
        match encode_response(adu, out) {
            Ok(len) => Some(len),
            Err(err) => {
                log::warn!("Failed to encode response: {err}");
                None
            }
        }
    }

    /// Receive and answer at most one request.
    ///
    /// Returns `Ok(())` if no complete frame arrives within the read
    /// timeout. Bytes of a frame that is still arriving are kept for
    /// the next call.
    pub fn serve_once(&mut self) -> Result<()> {
        let rx = &mut [0; MAX_FRAME_LEN];
        let Some(len) = self.receiver.receive(
            &mut self.transport,
            rx,
            self.config.read_timeout,
            request_pdu_len,
        )?
        else {
            return Ok(());
        };
        log::trace!("Received request: {}", Hex(&rx[..len]));

        let tx = &mut [0; MAX_FRAME_LEN];
        if let Some(len) = self.process_frame(&rx[..len], tx) {
            log::trace!("Sending response: {}", Hex(&tx[..len]));
            self.transport.write_all(&tx[..len])?;
        }
        Ok(())
    }

    fn dispatch<'b>(
        &mut self,
        request: Request<'b>,
        buf: &'b mut [u8],
    ) -> core::result::Result<Response<'b>, Exception> {
        use Request as R;

        let device = &mut self.device;
        let response = match request {
            R::ReadCoils(start, count) => {
                let coils = read_bits(start, count, buf, |address| {
                    let mut coil = Coil::new(address);
                    device.read_coil(&mut coil).then(|| coil.value())
                })?;
                Response::ReadCoils(coils)
            }
            R::ReadDiscreteInputs(start, count) => {
                let inputs = read_bits(start, count, buf, |address| {
                    let mut input = DiscreteInput::new(address);
                    device.read_discrete_input(&mut input).then(|| input.value())
                })?;
                Response::ReadDiscreteInputs(inputs)
            }
            R::ReadHoldingRegisters(start, count) => {
                let data = read_words(start, count, buf, |address| {
                    let mut register = HoldingRegister::new(address);
                    device.read_holding_register(&mut register).then(|| register.value())
                })?;
                Response::ReadHoldingRegisters(data)
            }
            R::ReadInputRegisters(start, count) => {
                let data = read_words(start, count, buf, |address| {
                    let mut register = InputRegister::new(address);
                    device.read_input_register(&mut register).then(|| register.value())
                })?;
                Response::ReadInputRegisters(data)
            }
            R::WriteSingleCoil(address, value) => {
                if !device.write_coil(&Coil::with_value(address, value)) {
                    return Err(Exception::IllegalDataAddress);
                }
                Response::WriteSingleCoil(address, value)
            }
            R::WriteSingleRegister(address, value) => {
                if !device.write_holding_register(&HoldingRegister::with_value(address, value)) {
                    return Err(Exception::IllegalDataAddress);
                }
                Response::WriteSingleRegister(address, value)
            }
            R::WriteMultipleCoils(start, coils) => {
                let count = quantity(coils.len())?;
                check_range(start, count, MAX_WRITE_COILS)?;
                for (address, value) in addresses(start, count).zip(coils) {
                    if !device.write_coil(&Coil::with_value(address, value)) {
                        return Err(Exception::IllegalDataAddress);
                    }
                }
                Response::WriteMultipleCoils(start, count)
            }
            R::WriteMultipleRegisters(start, data) => {
                let count = quantity(data.len())?;
                check_range(start, count, MAX_WRITE_REGISTERS)?;
                for (address, value) in addresses(start, count).zip(data) {
                    if !device.write_holding_register(&HoldingRegister::with_value(address, value))
                    {
                        return Err(Exception::IllegalDataAddress);
                    }
                }
                Response::WriteMultipleRegisters(start, count)
            }
            R::Diagnostics(RETURN_QUERY_DATA, data) => Response::Diagnostics(RETURN_QUERY_DATA, data),
            R::Diagnostics(_, _) | R::Custom(_, _) => return Err(Exception::IllegalFunction),
        };
        Ok(response)
    }
}

impl<T, D> Server<T, D>
where
    T: Transport + Send + 'static,
    D: Device + Send + 'static,
{
    /// Serve requests on a dedicated thread until the returned
    /// [`Listener`] is stopped.
    ///
    /// All device hooks run on that thread. Failed listen cycles are
    /// logged and do not end the loop.
    pub fn start_listening(self) -> io::Result<Listener<T, D>> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut server = self;
        let handle = thread::Builder::new()
            .name(LISTENER_THREAD_NAME.to_owned())
            .spawn({
                let stop = Arc::clone(&stop);
                move || {
                    log::info!("Listening as slave {}", server.device.id());
                    while !stop.load(Ordering::Relaxed) {
                        if let Err(err) = server.serve_once() {
                            log::warn!("Failed to serve request: {err}");
                            thread::sleep(ERROR_BACKOFF);
                        }
                    }
                    log::info!("Stopped listening as slave {}", server.device.id());
                    server
                }
            })?;
        Ok(Listener { stop, handle })
    }
}

/// Handle of a server running on its listener thread.
#[derive(Debug)]
pub struct Listener<T, D> {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Server<T, D>>,
}

impl<T, D> Listener<T, D> {
    #[must_use]
    pub fn is_listening(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the listener thread and take back the server.
    ///
    /// The thread notices the request once its current read returns,
    /// i.e. after at most one read timeout.
    pub fn stop_listening(self) -> thread::Result<Server<T, D>> {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join()
    }
}

/// The exception answering a request that failed to decode.
const fn rejection(err: Error) -> Exception {
    match err {
        Error::CoilValue(_) | Error::ByteCount(_) | Error::BufferSize | Error::Quantity(_) => {
            Exception::IllegalDataValue
        }
        _ => Exception::IllegalFunction,
    }
}

fn quantity(len: usize) -> core::result::Result<u16, Exception> {
    u16::try_from(len).map_err(|_| Exception::IllegalDataValue)
}

fn check_range(start: Address, count: u16, max: u16) -> core::result::Result<(), Exception> {
    if count == 0 || count > max {
        return Err(Exception::IllegalDataValue);
    }
    if u32::from(start) + u32::from(count) > 0x1_0000 {
        return Err(Exception::IllegalDataAddress);
    }
    Ok(())
}

/// `count` consecutive addresses, which must have passed [`check_range`].
fn addresses(start: Address, count: u16) -> impl Iterator<Item = Address> {
    (0..count).map(move |offset| start + offset)
}

fn read_bits<'b>(
    start: Address,
    count: u16,
    buf: &'b mut [u8],
    mut read: impl FnMut(Address) -> Option<bool>,
) -> core::result::Result<Coils<'b>, Exception> {
    check_range(start, count, MAX_READ_COILS)?;
    let mut bits = [false; MAX_READ_COILS as usize];
    let bits = &mut bits[..usize::from(count)];
    for (address, bit) in addresses(start, count).zip(bits.iter_mut()) {
        *bit = read(address).ok_or(Exception::IllegalDataAddress)?;
    }
    Coils::from_bools(bits, buf).map_err(|_| Exception::ServerDeviceFailure)
}

fn read_words<'b>(
    start: Address,
    count: u16,
    buf: &'b mut [u8],
    mut read: impl FnMut(Address) -> Option<u16>,
) -> core::result::Result<Data<'b>, Exception> {
    check_range(start, count, MAX_READ_REGISTERS)?;
    let mut words = [0; MAX_READ_REGISTERS as usize];
    let words = &mut words[..usize::from(count)];
    for (address, word) in addresses(start, count).zip(words.iter_mut()) {
        *word = read(address).ok_or(Exception::IllegalDataAddress)?;
    }
    Data::from_words(words, buf).map_err(|_| Exception::ServerDeviceFailure)
}

// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Byte transports carrying RTU frames.

use std::{
    fmt, io, thread,
    time::{Duration, Instant},
};

use crate::{
    error::{Error, ProtocolError},
    rtu::{MAX_FRAME_LEN, MIN_FRAME_LEN, adu_len, decode_frame},
};

/// Pause between polls of a transport that has no data yet.
const IDLE_POLL: Duration = Duration::from_millis(1);

/// A half-duplex byte channel, e.g. an RS-485 line.
///
/// `read` may block up to the configured read timeout. The errors
/// `TimedOut`, `WouldBlock` and `Interrupted` as well as reads of zero
/// bytes all mean that no data has arrived yet.
pub trait Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer and flush it.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Bound the time a single `read` may block.
    fn set_read_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    /// Drop any received but not yet read bytes.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).write_all(buf)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        (**self).discard_input()
    }
}

/// Derives the PDU length from the first bytes of an ADU.
pub(crate) type PduLen = fn(&[u8]) -> Result<Option<usize>, Error>;

/// Bytes needed before `buf` may hold a whole frame.
fn needed_len(buf: &[u8], pdu_len: PduLen) -> Result<usize, Error> {
    let needed = match pdu_len(buf)? {
        Some(pdu_len) => adu_len(pdu_len),
        // Every frame has at least MIN_FRAME_LEN bytes.
        None => (buf.len() + 1).max(MIN_FRAME_LEN),
    };
    if needed > MAX_FRAME_LEN {
        return Err(Error::BufferSize);
    }
    Ok(needed)
}

/// Read once, blocking at most `remaining`.
///
/// Returns `0` if no data has arrived yet.
fn read_some<T: Transport + ?Sized>(
    transport: &mut T,
    buf: &mut [u8],
    remaining: Duration,
) -> io::Result<usize> {
    transport.set_read_timeout(remaining)?;
    let cnt = match transport.read(buf) {
        Ok(cnt) => cnt,
        Err(err) => match err.kind() {
            io::ErrorKind::Interrupted => return Ok(0),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => 0,
            _ => return Err(err),
        },
    };
    if cnt == 0 {
        thread::sleep(IDLE_POLL.min(remaining));
    }
    Ok(cnt)
}

/// Receive one frame starting at `buf[0]`.
///
/// Bytes are read until `pdu_len` reports the frame length and the
/// whole ADU including its CRC is buffered. The CRC is not checked.
/// Returns the length of the frame.
pub(crate) fn read_frame<T: Transport + ?Sized>(
    transport: &mut T,
    buf: &mut [u8; MAX_FRAME_LEN],
    timeout: Duration,
    pdu_len: PduLen,
) -> Result<usize, ProtocolError> {
    let deadline = Instant::now() + timeout;
    let mut len = 0;
    loop {
        let needed = needed_len(&buf[..len], pdu_len)?;
        if len >= needed {
            return Ok(needed);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            if len > 0 {
                transport.discard_input()?;
            }
            return Err(ProtocolError::Timeout(timeout));
        }
        len += read_some(transport, &mut buf[len..needed], remaining)?;
    }
}

/// Frames requests out of the byte stream of a shared bus.
///
/// Received bytes are kept between calls, so a request may arrive across
/// several of them. A candidate frame with a broken CRC, an unknown
/// function code or an impossible length loses its first byte and framing
/// restarts at the next one. So does a candidate that stays incomplete
/// while the line is silent for a whole read timeout.
#[derive(Debug)]
pub(crate) struct FrameReceiver {
    buf: [u8; MAX_FRAME_LEN],
    len: usize,
    /// When the latest byte in `buf` arrived.
    last_rx: Option<Instant>,
}

impl FrameReceiver {
    pub(crate) const fn new() -> Self {
        Self {
            buf: [0; MAX_FRAME_LEN],
            len: 0,
            last_rx: None,
        }
    }

    /// Number of received bytes not yet framed.
    #[cfg(test)]
    pub(crate) const fn pending(&self) -> usize {
        self.len
    }

    /// Wait up to `timeout` for the next frame with a valid CRC.
    ///
    /// The frame is copied to the start of `frame` and its length is
    /// returned. `Ok(None)` means that no frame was completed in time.
    pub(crate) fn receive<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        frame: &mut [u8; MAX_FRAME_LEN],
        timeout: Duration,
        pdu_len: PduLen,
    ) -> Result<Option<usize>, ProtocolError> {
        let deadline = Instant::now() + timeout;
        loop {
            let needed = match needed_len(&self.buf[..self.len], pdu_len) {
                Ok(needed) => needed,
                Err(err) => {
                    self.skip(err);
                    continue;
                }
            };
            if self.len >= needed {
                if let Err(err) = decode_frame(&self.buf[..needed]) {
                    self.skip(err);
                    continue;
                }
                frame[..needed].copy_from_slice(&self.buf[..needed]);
                self.consume(needed);
                return Ok(Some(needed));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let mut wait_until = deadline;
            if let Some(last_rx) = self.last_rx {
                let silent_until = last_rx + timeout;
                if now >= silent_until {
                    self.skip("incomplete frame");
                    continue;
                }
                wait_until = wait_until.min(silent_until);
            }
            let remaining = wait_until.saturating_duration_since(now);
            let cnt = read_some(transport, &mut self.buf[self.len..needed], remaining)?;
            if cnt > 0 {
                self.len += cnt;
                self.last_rx = Some(Instant::now());
            }
        }
    }

    fn skip(&mut self, reason: impl fmt::Display) {
        log::debug!("Skipping byte 0x{:0>2X}: {reason}", self.buf[0]);
        self.consume(1);
    }

    fn consume(&mut self, cnt: usize) {
        let cnt = cnt.min(self.len);
        self.buf.copy_within(cnt..self.len, 0);
        self.len -= cnt;
        if self.len == 0 {
            self.last_rx = None;
        }
    }
}

/// Formats a frame as space separated hex bytes.
pub(crate) struct Hex<'a>(pub &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

#[cfg(feature = "serial")]
pub use self::serial::{SerialConfig, SerialTransport};

#[cfg(feature = "serial")]
mod serial {
    use std::{fmt, io, time::Duration};

    use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

    use super::Transport;

    /// Settings of a native serial port.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SerialConfig {
        pub path: String,
        pub baud_rate: u32,
        pub data_bits: DataBits,
        pub parity: Parity,
        pub stop_bits: StopBits,
        pub timeout: Duration,
    }

    impl SerialConfig {
        /// 9600 baud, 8-N-1.
        pub fn new(path: impl Into<String>) -> Self {
            Self {
                path: path.into(),
                baud_rate: 9600,
                data_bits: DataBits::Eight,
                parity: Parity::None,
                stop_bits: StopBits::One,
                timeout: crate::config::DEFAULT_READ_TIMEOUT,
            }
        }

        #[must_use]
        pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
            self.baud_rate = baud_rate;
            self
        }

        #[must_use]
        pub fn with_parity(mut self, parity: Parity) -> Self {
            self.parity = parity;
            self
        }

        /// Open the port.
        pub fn open(&self) -> io::Result<SerialTransport> {
            let port = serialport::new(self.path.as_str(), self.baud_rate)
                .data_bits(self.data_bits)
                .parity(self.parity)
                .stop_bits(self.stop_bits)
                .timeout(self.timeout)
                .open()?;
            Ok(SerialTransport::new(port))
        }
    }

    /// [`Transport`] on top of a native serial port.
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
    }

    impl SerialTransport {
        #[must_use]
        pub fn new(port: Box<dyn SerialPort>) -> Self {
            Self { port }
        }

        #[must_use]
        pub fn into_inner(self) -> Box<dyn SerialPort> {
            self.port
        }
    }

    impl fmt::Debug for SerialTransport {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("SerialTransport")
                .field("port", &self.port.name())
                .finish()
        }
    }

    impl Transport for SerialTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            io::Read::read(&mut self.port, buf)
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            io::Write::write_all(&mut self.port, buf)?;
            io::Write::flush(&mut self.port)
        }

        fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.port.set_timeout(timeout).map_err(io::Error::from)
        }

        fn discard_input(&mut self) -> io::Result<()> {
            self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
        }
    }

}

#[cfg(test)]
pub(crate) mod mock {
    use std::{collections::VecDeque, io, time::Duration};

    use super::Transport;

    /// In-memory transport.
    ///
    /// Each write moves the next queued reply into the receive buffer.
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        pub rx: VecDeque<u8>,
        pub replies: VecDeque<Vec<u8>>,
        pub written: Vec<Vec<u8>>,
        /// Maximum number of bytes handed out per read, `0` for no limit.
        pub chunk: usize,
        pub read_timeout: Option<Duration>,
        pub discarded: usize,
    }

    impl MockTransport {
        pub fn with_rx(rx: &[u8]) -> Self {
            Self {
                rx: rx.iter().copied().collect(),
                ..Default::default()
            }
        }

        pub fn with_reply(reply: &[u8]) -> Self {
            Self {
                replies: VecDeque::from([reply.to_vec()]),
                ..Default::default()
            }
        }
    }

    impl Transport for MockTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.rx.is_empty() {
                return Err(io::ErrorKind::TimedOut.into());
            }
            let mut cnt = buf.len().min(self.rx.len());
            if self.chunk > 0 {
                cnt = cnt.min(self.chunk);
            }
            for (dst, src) in buf.iter_mut().zip(self.rx.drain(..cnt)) {
                *dst = src;
            }
            Ok(cnt)
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.written.push(buf.to_vec());
            if let Some(reply) = self.replies.pop_front() {
                self.rx.extend(reply);
            }
            Ok(())
        }

        fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.read_timeout = Some(timeout);
            Ok(())
        }

        fn discard_input(&mut self) -> io::Result<()> {
            self.discarded += self.rx.len();
            self.rx.clear();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{mock::MockTransport, *};
    use crate::rtu::{encode_frame, request_pdu_len, response_pdu_len};

    fn frame(slave: u8, function: u8, payload: &[u8]) -> Vec<u8> {
        let buf = &mut [0; MAX_FRAME_LEN];
        let len = encode_frame(slave, function, payload, buf).unwrap();
        buf[..len].to_vec()
    }

    #[test]
    fn assemble_frame_from_single_bytes() {
        let req = frame(0x02, 0x10, &[0x00, 0x05, 0x00, 0x01, 0x02, 0x00, 0x03]);
        let mut transport = MockTransport::with_rx(&req);
        transport.chunk = 1;
        let buf = &mut [0; MAX_FRAME_LEN];
        let len = read_frame(
            &mut transport,
            buf,
            Duration::from_millis(100),
            request_pdu_len,
        )
        .unwrap();
        assert_eq!(&buf[..len], req.as_slice());
    }

    #[test]
    fn leave_trailing_bytes_unread() {
        let mut rsp = frame(0x01, 0x03, &[0x02, 0x12, 0x34]);
        rsp.extend([0xAA, 0xBB]);
        let mut transport = MockTransport::with_rx(&rsp);
        let buf = &mut [0; MAX_FRAME_LEN];
        let len = read_frame(
            &mut transport,
            buf,
            Duration::from_millis(100),
            response_pdu_len,
        )
        .unwrap();
        assert_eq!(len, 7);
        assert_eq!(transport.rx.len(), 2);
    }

    #[test]
    fn time_out_on_partial_frame() {
        let mut transport = MockTransport::with_rx(&[0x01, 0x03, 0x02]);
        let buf = &mut [0; MAX_FRAME_LEN];
        let timeout = Duration::from_millis(30);
        let start = Instant::now();
        let err = read_frame(&mut transport, buf, timeout, response_pdu_len).unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout(t) if t == timeout));
        assert!(start.elapsed() >= timeout);
        assert!(start.elapsed() < timeout + Duration::from_millis(500));
        assert!(transport.read_timeout.unwrap() <= timeout);
    }

    #[test]
    fn reject_unknown_function_code() {
        let mut transport = MockTransport::with_rx(&[0x01, 0x66, 0x00, 0x00]);
        let buf = &mut [0; MAX_FRAME_LEN];
        let err = read_frame(
            &mut transport,
            buf,
            Duration::from_millis(100),
            request_pdu_len,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::Frame(Error::FnCode(0x66))));
    }

    #[test]
    fn receive_frame_after_garbage() {
        let req = frame(0x02, 0x06, &[0x00, 0x01, 0x00, 0x03]);
        let mut transport = MockTransport::with_rx(&[0x02, 0x66, 0x00]);
        transport.rx.extend(&req);
        let mut receiver = FrameReceiver::new();
        let buf = &mut [0; MAX_FRAME_LEN];
        let len = receiver
            .receive(&mut transport, buf, Duration::from_millis(20), request_pdu_len)
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], req.as_slice());
        assert_eq!(receiver.pending(), 0);
    }

    #[test]
    fn receive_frame_after_foreign_response() {
        // A response read with the request length table leaves one byte over.
        let rsp = frame(0x05, 0x03, &[0x04, 0x00, 0x0A, 0x01, 0x02]);
        let mut transport = MockTransport::with_rx(&rsp);
        let req = frame(0x02, 0x06, &[0x00, 0x01, 0x00, 0x03]);
        transport.rx.extend(&req);
        let mut receiver = FrameReceiver::new();
        let buf = &mut [0; MAX_FRAME_LEN];
        let len = receiver
            .receive(&mut transport, buf, Duration::from_millis(20), request_pdu_len)
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], req.as_slice());
    }

    #[test]
    fn keep_partial_frame_between_calls() {
        let req = frame(0x02, 0x06, &[0x00, 0x01, 0x00, 0x03]);
        let mut transport = MockTransport::with_rx(&req[..5]);
        let mut receiver = FrameReceiver::new();
        let buf = &mut [0; MAX_FRAME_LEN];
        let len = receiver
            .receive(&mut transport, buf, Duration::from_millis(5), request_pdu_len)
            .unwrap();
        assert!(len.is_none());
        assert_eq!(receiver.pending(), 5);

        transport.rx.extend(&req[5..]);
        let len = receiver
            .receive(&mut transport, buf, Duration::from_secs(5), request_pdu_len)
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], req.as_slice());
    }

    #[test]
    fn skip_stalled_frame_after_silence() {
        // Announces four data bytes that never arrive.
        let mut transport = MockTransport::with_rx(&[0x02, 0x10, 0x00, 0x05, 0x00, 0x02, 0x04]);
        let mut receiver = FrameReceiver::new();
        let buf = &mut [0; MAX_FRAME_LEN];
        let timeout = Duration::from_millis(10);
        let start = Instant::now();
        while receiver.pending() > 0 || start.elapsed() < timeout {
            assert!(start.elapsed() < Duration::from_secs(5), "stalled bytes kept");
            let len = receiver
                .receive(&mut transport, buf, timeout, request_pdu_len)
                .unwrap();
            assert!(len.is_none());
        }
        assert_eq!(receiver.pending(), 0);
    }

    #[test]
    fn format_hex() {
        assert_eq!(Hex(&[0x02, 0x10, 0xAB]).to_string(), "02 10 AB");
        assert_eq!(Hex(&[]).to_string(), "");
    }
}

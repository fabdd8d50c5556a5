// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU client (master) specific functions.
use super::*;

/// Encode an RTU request.
pub fn encode_request(adu: RequestAdu<'_>, buf: &mut [u8]) -> Result<usize> {
    let RequestAdu { hdr, pdu } = adu;
    if buf.len() < 2 {
        return Err(Error::BufferSize);
    }
    let len = pdu.encode(&mut buf[1..])?;
    if buf.len() < len + 3 {
        return Err(Error::BufferSize);
    }
    buf[0] = hdr.slave;
    let crc = crc16(&buf[0..=len]);
    BigEndian::write_u16(&mut buf[len + 1..], crc);
    Ok(len + 3)
}

/// Decode an RTU response.
///
/// Returns `Ok(None)` as long as the frame is incomplete.
pub fn decode_response(buf: &[u8]) -> Result<Option<ResponseAdu<'_>>> {
    let Some(pdu_len) = response_pdu_len(buf)? else {
        return Ok(None);
    };
    let Some(DecodedFrame { slave, pdu }) = extract_frame(buf, pdu_len)? else {
        return Ok(None);
    };
    let hdr = Header { slave };
    // The CRC already matched, so a PDU that fails to decode
    // is malformed at the sender rather than on the line.
    let response = if pdu[0] & EXCEPTION_FLAG == 0 {
        Response::try_from(pdu).map(Ok)
    } else {
        ExceptionResponse::try_from(pdu).map(Err)
    }
    .map(|pdu| Some(ResponseAdu { hdr, pdu: ResponsePdu(pdu) }));
    #[cfg(feature = "log")]
    if let Err(err) = &response {
        // Unrecoverable error
        log::error!("Failed to decode response PDU: {err}");
    }
    response
}

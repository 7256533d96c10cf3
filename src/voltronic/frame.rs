use crate::error::FrameError;

use bytes::{BufMut, Bytes, BytesMut};

/// Every frame, in either direction, ends with a carriage return.
pub const TERMINATOR: u8 = b'\r';

/// Replies from the inverter start with an opening parenthesis.
pub const START: u8 = b'(';

/// checksum + terminator
pub const OVERHEAD: usize = 3;

/// CRC-16/XMODEM over `payload`, high byte first.
///
/// Checksum bytes that would read as a start byte, CR or LF are bumped by one
/// so a receiver scanning for delimiters never trips over them. This makes the
/// mapping slightly lossy: e.g. a real checksum byte of 0x28 and 0x29 are both
/// sent as 0x29, so a corrupted frame whose checksum lands on the other member
/// of such a pair is accepted. Single-bit errors in payloads shorter than 200
/// bytes never produce such a pair.
pub fn checksum(payload: &[u8]) -> [u8; 2] {
    let crc = crc16::State::<crc16::XMODEM>::calculate(payload);
    let [hi, lo] = crc.to_be_bytes();

    [escape(hi), escape(lo)]
}

fn escape(byte: u8) -> u8 {
    match byte {
        START | TERMINATOR | b'\n' => byte + 1,
        _ => byte,
    }
}

/// Build a frame: payload, checksum, terminator.
pub fn encode(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(payload.len() + OVERHEAD);
    frame.put_slice(payload);
    frame.put_slice(&checksum(payload));
    frame.put_u8(TERMINATOR);
    frame.freeze()
}

/// Validate a frame and return its payload.
pub fn decode(frame: &[u8]) -> Result<&[u8], FrameError> {
    let len = frame.len();
    if len < OVERHEAD {
        return Err(FrameError::Truncated(len));
    }

    let last = frame[len - 1];
    if last != TERMINATOR {
        return Err(FrameError::BadTerminator(last));
    }

    let payload = &frame[..len - OVERHEAD];
    let got = [frame[len - 3], frame[len - 2]];
    let expected = checksum(payload);
    if got != expected {
        return Err(FrameError::ChecksumMismatch { got, expected });
    }

    Ok(payload)
}

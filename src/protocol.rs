//! Wire protocol shared by the server and the load-driving client.
//!
//! A request is a fixed 16-byte frame whose first four bytes carry the
//! desired response size as a little-endian u32; the remaining bytes are
//! padding and ignored. The response is exactly that many bytes of printable
//! pseudo-random ASCII with no header. Content never matters to the
//! benchmark, only size and timing.

use rand::Rng;
use std::io::{self, Read};

/// Exact length of a request frame on the wire.
pub const REQUEST_FRAME_LEN: usize = 16;

/// Upper bound on the response size a client may request.
///
/// The size field arrives from the network, so it is never trusted
/// unbounded; anything above this is a protocol violation and the server
/// closes the connection.
pub const MAX_RESPONSE_LEN: usize = 16 * 1024 * 1024;

/// Malformed request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Frame shorter than [`REQUEST_FRAME_LEN`].
    Truncated(usize),
    /// Requested response size exceeds [`MAX_RESPONSE_LEN`].
    Oversized(u32),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Truncated(len) => {
                write!(f, "request frame truncated: {len} of {REQUEST_FRAME_LEN} bytes")
            }
            FrameError::Oversized(size) => {
                write!(f, "requested response size {size} exceeds {MAX_RESPONSE_LEN} bytes")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Build a request frame asking for a response of `size` bytes.
pub fn encode_request(size: u32) -> [u8; REQUEST_FRAME_LEN] {
    let mut frame = [0u8; REQUEST_FRAME_LEN];
    frame[..4].copy_from_slice(&size.to_le_bytes());
    frame
}

/// Decode the requested response size from a request frame, enforcing the
/// response-size bound.
pub fn decode_request(frame: &[u8]) -> Result<u32, FrameError> {
    if frame.len() < REQUEST_FRAME_LEN {
        return Err(FrameError::Truncated(frame.len()));
    }
    let size = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    if size as usize > MAX_RESPONSE_LEN {
        return Err(FrameError::Oversized(size));
    }
    Ok(size)
}

/// Read exactly one request frame from a blocking stream.
///
/// Returns `Ok(None)` when the peer closed cleanly at a frame boundary. A
/// close part-way through a frame is an `UnexpectedEof` error, since the
/// peer abandoned a request it started.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<[u8; REQUEST_FRAME_LEN]>> {
    let mut frame = [0u8; REQUEST_FRAME_LEN];
    let mut filled = 0;
    while filled < REQUEST_FRAME_LEN {
        match reader.read(&mut frame[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("peer closed mid-frame after {filled} bytes"),
                ));
            }
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Some(frame))
}

/// Allocate a response payload of `len` printable pseudo-random bytes.
pub fn printable_payload(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut payload = vec![0u8; len];
    for byte in payload.iter_mut() {
        *byte = rng.gen_range(0x21..=0x7e);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_request_round_trip() {
        for size in [0u32, 1, 16, 1024, 65536] {
            let frame = encode_request(size);
            assert_eq!(frame.len(), REQUEST_FRAME_LEN);
            assert_eq!(decode_request(&frame), Ok(size));
        }
    }

    #[test]
    fn test_size_field_is_little_endian() {
        let mut frame = [0u8; REQUEST_FRAME_LEN];
        frame[0] = 0x80;
        assert_eq!(decode_request(&frame), Ok(128));

        frame[0] = 0x01;
        frame[1] = 0x02;
        assert_eq!(decode_request(&frame), Ok(0x0201));
    }

    #[test]
    fn test_padding_is_ignored() {
        let mut frame = encode_request(512);
        frame[4..].fill(0xff);
        assert_eq!(decode_request(&frame), Ok(512));
    }

    #[test]
    fn test_oversized_request_rejected() {
        let frame = encode_request(u32::MAX);
        assert_eq!(decode_request(&frame), Err(FrameError::Oversized(u32::MAX)));
    }

    #[test]
    fn test_truncated_frame_rejected() {
        assert_eq!(decode_request(&[0u8; 3]), Err(FrameError::Truncated(3)));
    }

    #[test]
    fn test_read_frame_clean_close() {
        let mut empty = Cursor::new(Vec::new());
        assert_eq!(read_frame(&mut empty).unwrap(), None);
    }

    #[test]
    fn test_read_frame_mid_frame_close_is_error() {
        let mut partial = Cursor::new(vec![0u8; REQUEST_FRAME_LEN - 3]);
        let err = read_frame(&mut partial).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_frame_back_to_back() {
        let mut data = Vec::new();
        data.extend_from_slice(&encode_request(7));
        data.extend_from_slice(&encode_request(9));
        let mut cursor = Cursor::new(data);

        let first = read_frame(&mut cursor).unwrap().unwrap();
        let second = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(decode_request(&first), Ok(7));
        assert_eq!(decode_request(&second), Ok(9));
        assert_eq!(read_frame(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_payload_is_printable_and_sized() {
        for len in [0usize, 1, 128, 4096] {
            let payload = printable_payload(len);
            assert_eq!(payload.len(), len);
            assert!(payload.iter().all(|b| (0x21u8..=0x7e).contains(b)));
        }
    }
}

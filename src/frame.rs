//! Wire frame codec.
//!
//! Every frame is a 16-byte little-endian header, 0..=46 payload bytes and
//! a 2-byte CRC trailer:
//!
//! ```text
//! [ magic:u16 | type:u8 | ver:u8 | len:u16 | cmd_id:u8 | rsv:u8 |
//!   seq:u32 | ts_ms:u32 | payload[len] | crc16:u16 ]
//! ```
//!
//! The CRC (CRC-16/CCITT-FALSE, seed 0xffff) covers header and payload.
//! The magic doubles as the resynchronization sentinel for the byte-stream
//! parser.

use crate::crc::{crc16, CRC_SEED};

/// Frame sentinel, serialized little-endian (`A5 5A` on the wire).
pub const MAGIC: u16 = 0x5aa5;
/// Protocol version carried in every header.
pub const PROTOCOL_VERSION: u8 = 0;
/// Header length in bytes.
pub const HDR_LEN: usize = 16;
/// CRC trailer length in bytes.
pub const CRC_LEN: usize = 2;
/// Maximum payload bytes per frame.
pub const MAX_PAYLOAD: usize = 46;
/// Largest possible frame; must fit in a single transport write.
pub const FRAME_MAX_BYTES: usize = HDR_LEN + MAX_PAYLOAD + CRC_LEN;

/// Frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Stream = 0,
    Cmd = 1,
    Ack = 2,
    Nack = 3,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FrameType::Stream),
            1 => Some(FrameType::Cmd),
            2 => Some(FrameType::Ack),
            3 => Some(FrameType::Nack),
            _ => None,
        }
    }
}

/// Decoded header fields. Magic, version, reserved byte and payload length
/// are validated by the codec and not carried around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub cmd_id: u8,
    pub seq: u32,
    pub ts_ms: u32,
}

/// Structural reasons a buffered candidate frame is not a frame. The
/// receiver reacts to all of these by dropping bytes and resyncing on the
/// next magic; a truncated candidate is not an error (`Ok(None)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    BadMagic,
    BadVersion,
    BadType,
    BadLength,
    BadCrc,
}

/// A successfully parsed frame borrowing its payload from the input.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedFrame<'a> {
    pub header: FrameHeader,
    pub payload: &'a [u8],
    /// Total frame bytes consumed from the input.
    pub consumed: usize,
}

/// Serializes a frame into `out`. Returns the total frame length, or
/// `None` when the payload exceeds [`MAX_PAYLOAD`] or `out` is too short
/// for the full frame.
pub fn write_frame(
    out: &mut [u8],
    frame_type: FrameType,
    cmd_id: u8,
    payload: &[u8],
    seq: u32,
    ts_ms: u32,
) -> Option<usize> {
    if payload.len() > MAX_PAYLOAD {
        return None;
    }
    let total = HDR_LEN + payload.len() + CRC_LEN;
    if out.len() < total {
        return None;
    }

    out[0..2].copy_from_slice(&MAGIC.to_le_bytes());
    out[2] = frame_type as u8;
    out[3] = PROTOCOL_VERSION;
    out[4..6].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    out[6] = cmd_id;
    out[7] = 0;
    out[8..12].copy_from_slice(&seq.to_le_bytes());
    out[12..16].copy_from_slice(&ts_ms.to_le_bytes());
    out[HDR_LEN..HDR_LEN + payload.len()].copy_from_slice(payload);

    let crc = crc16(&out[..HDR_LEN + payload.len()], CRC_SEED);
    out[HDR_LEN + payload.len()..total].copy_from_slice(&crc.to_le_bytes());
    Some(total)
}

/// Validates the fixed header prefix alone and returns the total frame
/// length it declares. Lets queue maintenance find frame boundaries
/// without touching payload bytes or the CRC.
pub fn head_frame_len(head: &[u8]) -> Option<usize> {
    if head.len() < HDR_LEN {
        return None;
    }
    if u16::from_le_bytes([head[0], head[1]]) != MAGIC {
        return None;
    }
    if head[3] != PROTOCOL_VERSION {
        return None;
    }
    let len = u16::from_le_bytes([head[4], head[5]]) as usize;
    if len > MAX_PAYLOAD {
        return None;
    }
    Some(HDR_LEN + len + CRC_LEN)
}

/// Parses one frame from the start of `buf`.
///
/// * `Ok(None)` - `buf` holds a truncated candidate; retry with more bytes.
/// * `Err(_)` - the head of `buf` is structurally not a frame; the caller
///   should drop at least one byte and rescan.
/// * `Ok(Some(frame))` - `frame.consumed` bytes hold a CRC-valid frame.
pub fn parse_frame(buf: &[u8]) -> Result<Option<ParsedFrame<'_>>, FrameError> {
    if buf.len() < HDR_LEN + CRC_LEN {
        return Ok(None);
    }
    if u16::from_le_bytes([buf[0], buf[1]]) != MAGIC {
        return Err(FrameError::BadMagic);
    }
    if buf[3] != PROTOCOL_VERSION {
        return Err(FrameError::BadVersion);
    }
    let len = u16::from_le_bytes([buf[4], buf[5]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(FrameError::BadLength);
    }
    let total = HDR_LEN + len + CRC_LEN;
    if buf.len() < total {
        return Ok(None);
    }

    let wire_crc = u16::from_le_bytes([buf[total - 2], buf[total - 1]]);
    if crc16(&buf[..HDR_LEN + len], CRC_SEED) != wire_crc {
        return Err(FrameError::BadCrc);
    }
    let frame_type = FrameType::from_u8(buf[2]).ok_or(FrameError::BadType)?;

    Ok(Some(ParsedFrame {
        header: FrameHeader {
            frame_type,
            cmd_id: buf[6],
            seq: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            ts_ms: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        },
        payload: &buf[HDR_LEN..HDR_LEN + len],
        consumed: total,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(payload: &[u8]) -> ([u8; FRAME_MAX_BYTES], usize) {
        let mut buf = [0u8; FRAME_MAX_BYTES];
        let written = write_frame(
            &mut buf,
            FrameType::Cmd,
            0x42,
            payload,
            0xdeadbeef,
            12345,
        )
        .unwrap();
        (buf, written)
    }

    #[test]
    fn roundtrip_empty_payload() {
        let (buf, written) = roundtrip(&[]);
        assert_eq!(written, HDR_LEN + CRC_LEN);
        let parsed = parse_frame(&buf[..written]).unwrap().unwrap();
        assert_eq!(parsed.consumed, written);
        assert_eq!(parsed.header.frame_type, FrameType::Cmd);
        assert_eq!(parsed.header.cmd_id, 0x42);
        assert_eq!(parsed.header.seq, 0xdeadbeef);
        assert_eq!(parsed.header.ts_ms, 12345);
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn roundtrip_max_payload() {
        let payload: Vec<u8> = (0..MAX_PAYLOAD as u8).collect();
        let (buf, written) = roundtrip(&payload);
        assert_eq!(written, FRAME_MAX_BYTES);
        let parsed = parse_frame(&buf[..written]).unwrap().unwrap();
        assert_eq!(parsed.payload, &payload[..]);
    }

    #[test]
    fn oversize_payload_refused() {
        let mut buf = [0u8; 128];
        let payload = [0u8; MAX_PAYLOAD + 1];
        assert!(write_frame(&mut buf, FrameType::Stream, 0, &payload, 0, 0).is_none());
    }

    #[test]
    fn short_output_refused() {
        let mut buf = [0u8; HDR_LEN + CRC_LEN];
        assert!(write_frame(&mut buf, FrameType::Stream, 0, &[1], 0, 0).is_none());
    }

    #[test]
    fn truncated_is_not_an_error() {
        let (buf, written) = roundtrip(&[1, 2, 3]);
        assert!(parse_frame(&buf[..HDR_LEN + CRC_LEN - 1]).unwrap().is_none());
        assert!(parse_frame(&buf[..written - 1]).unwrap().is_none());
    }

    #[test]
    fn bad_magic_rejected() {
        let (mut buf, written) = roundtrip(&[]);
        buf[0] = 0x00;
        assert_eq!(parse_frame(&buf[..written]), Err(FrameError::BadMagic));
    }

    #[test]
    fn bad_version_rejected() {
        let (mut buf, written) = roundtrip(&[]);
        buf[3] = 1;
        assert_eq!(parse_frame(&buf[..written]), Err(FrameError::BadVersion));
    }

    #[test]
    fn oversize_declared_length_rejected() {
        let (mut buf, _) = roundtrip(&[]);
        buf[4] = (MAX_PAYLOAD + 1) as u8;
        assert_eq!(
            parse_frame(&buf[..FRAME_MAX_BYTES]),
            Err(FrameError::BadLength)
        );
    }

    #[test]
    fn corrupt_crc_rejected() {
        let (mut buf, written) = roundtrip(&[9, 9, 9]);
        buf[written - 1] ^= 0xff;
        assert_eq!(parse_frame(&buf[..written]), Err(FrameError::BadCrc));
    }

    #[test]
    fn corrupt_payload_rejected() {
        let (mut buf, written) = roundtrip(&[9, 9, 9]);
        buf[HDR_LEN] ^= 0x01;
        assert_eq!(parse_frame(&buf[..written]), Err(FrameError::BadCrc));
    }

    #[test]
    fn head_frame_len_matches_parse() {
        let (buf, written) = roundtrip(&[1, 2, 3, 4]);
        assert_eq!(head_frame_len(&buf[..HDR_LEN]), Some(written));
        assert_eq!(head_frame_len(&buf[..HDR_LEN - 1]), None);
        let mut bad = buf;
        bad[1] = 0;
        assert_eq!(head_frame_len(&bad[..HDR_LEN]), None);
    }
}

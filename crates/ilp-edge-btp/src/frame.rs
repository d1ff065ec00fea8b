//! C1: the bilateral wire frame codec.
//!
//! Wire format (big-endian, all lengths unsigned), per spec.md §4.1:
//!
//! ```text
//! Frame            := kind:u8  request_id:u32  payload
//! DataPayload      := count:u8  SubProtocolEntry{count}  ilp_len:u32  ilp_bytes{ilp_len}
//! SubProtocolEntry := name_len:u8 name{name_len} content_type:u16 data_len:u32 data{data_len}
//! ErrorPayload     := code_len:u8 code{code_len}
//!                     name_len:u8 name{name_len}
//!                     ts_len:u8   triggered_at{ts_len}
//!                     data_len:u32 data{data_len}
//! ```
//!
//! Grounded on the teacher's `BtpPacket`/`ProtocolData` wire shape
//! (`interledger-btp/src/client.rs`, and the `parse_ilp_packet`/
//! `ilp_packet_to_ws_message` pair in the retrieved BTP `service.rs`).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Bytes, BytesMut};

const KIND_RESPONSE: u8 = 1;
const KIND_ERROR: u8 = 2;
const KIND_MESSAGE: u8 = 6;

quick_error::quick_error! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MalformedFrame {
        BufferTooShort(len: usize) {
            display("BTP message too short: {} bytes", len)
        }
        LengthPrefixOverrun(field: &'static str, declared: usize, remaining: usize) {
            display(
                "BTP frame field '{}' declared length {} but only {} bytes remained",
                field, declared, remaining
            )
        }
        MissingPayload {
            display("BTP frame is missing its payload")
        }
        InvalidUtf8(field: &'static str) {
            display("BTP frame field '{}' was not valid UTF-8", field)
        }
    }
}

/// The kind of frame, per spec.md §3. Kinds outside the three this
/// implementation produces are preserved as `Unknown` so ingress can
/// tolerate and discard them rather than fail to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Response,
    Error,
    Message,
    Unknown(u8),
}

impl FrameKind {
    fn to_byte(self) -> u8 {
        match self {
            FrameKind::Response => KIND_RESPONSE,
            FrameKind::Error => KIND_ERROR,
            FrameKind::Message => KIND_MESSAGE,
            FrameKind::Unknown(b) => b,
        }
    }

    fn from_byte(b: u8) -> FrameKind {
        match b {
            KIND_RESPONSE => FrameKind::Response,
            KIND_ERROR => FrameKind::Error,
            KIND_MESSAGE => FrameKind::Message,
            other => FrameKind::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubProtocolEntry {
    pub name: String,
    pub content_type: u16,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataPayload {
    pub sub_protocols: Vec<SubProtocolEntry>,
    /// Empty means absent, per spec.md §3.
    pub ilp_packet: Bytes,
}

impl DataPayload {
    pub fn find(&self, name: &str) -> Option<&SubProtocolEntry> {
        self.sub_protocols.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: String,
    pub name: String,
    pub triggered_at: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Data(DataPayload),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub request_id: u32,
    pub payload: Payload,
}

impl Frame {
    pub fn message(request_id: u32, payload: DataPayload) -> Frame {
        Frame {
            kind: FrameKind::Message,
            request_id,
            payload: Payload::Data(payload),
        }
    }

    pub fn response(request_id: u32, payload: DataPayload) -> Frame {
        Frame {
            kind: FrameKind::Response,
            request_id,
            payload: Payload::Data(payload),
        }
    }

    pub fn error(request_id: u32, payload: ErrorPayload) -> Frame {
        Frame {
            kind: FrameKind::Error,
            request_id,
            payload: Payload::Error(payload),
        }
    }
}

fn write_data_payload(out: &mut BytesMut, payload: &DataPayload) {
    out.extend_from_slice(&[payload.sub_protocols.len() as u8]);
    for entry in &payload.sub_protocols {
        let name_bytes = entry.name.as_bytes();
        out.extend_from_slice(&[name_bytes.len() as u8]);
        out.extend_from_slice(name_bytes);
        let mut buf = [0u8; 2];
        (&mut buf[..]).write_u16::<BigEndian>(entry.content_type).unwrap();
        out.extend_from_slice(&buf);
        let mut len_buf = [0u8; 4];
        (&mut len_buf[..])
            .write_u32::<BigEndian>(entry.data.len() as u32)
            .unwrap();
        out.extend_from_slice(&len_buf);
        out.extend_from_slice(&entry.data);
    }
    let mut len_buf = [0u8; 4];
    (&mut len_buf[..])
        .write_u32::<BigEndian>(payload.ilp_packet.len() as u32)
        .unwrap();
    out.extend_from_slice(&len_buf);
    out.extend_from_slice(&payload.ilp_packet);
}

fn write_error_payload(out: &mut BytesMut, payload: &ErrorPayload) {
    let code_bytes = payload.code.as_bytes();
    out.extend_from_slice(&[code_bytes.len() as u8]);
    out.extend_from_slice(code_bytes);
    let name_bytes = payload.name.as_bytes();
    out.extend_from_slice(&[name_bytes.len() as u8]);
    out.extend_from_slice(name_bytes);
    let ts_bytes = payload.triggered_at.as_bytes();
    out.extend_from_slice(&[ts_bytes.len() as u8]);
    out.extend_from_slice(ts_bytes);
    let mut len_buf = [0u8; 4];
    (&mut len_buf[..])
        .write_u32::<BigEndian>(payload.data.len() as u32)
        .unwrap();
    out.extend_from_slice(&len_buf);
    out.extend_from_slice(&payload.data);
}

/// Serialize a frame to its wire representation. The inverse of [`parse`].
pub fn serialize(frame: &Frame) -> Bytes {
    let mut out = BytesMut::new();
    out.extend_from_slice(&[frame.kind.to_byte()]);
    let mut id_buf = [0u8; 4];
    (&mut id_buf[..]).write_u32::<BigEndian>(frame.request_id).unwrap();
    out.extend_from_slice(&id_buf);
    match &frame.payload {
        Payload::Data(payload) => write_data_payload(&mut out, payload),
        Payload::Error(payload) => write_error_payload(&mut out, payload),
    }
    out.freeze()
}

fn read_len_prefixed_bytes<'a>(
    buf: &mut &'a [u8],
    field: &'static str,
    len: usize,
) -> Result<&'a [u8], MalformedFrame> {
    if buf.len() < len {
        return Err(MalformedFrame::LengthPrefixOverrun(field, len, buf.len()));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn read_u8_len_str(buf: &mut &[u8], field: &'static str) -> Result<String, MalformedFrame> {
    if buf.is_empty() {
        return Err(MalformedFrame::LengthPrefixOverrun(field, 1, 0));
    }
    let len = buf[0] as usize;
    *buf = &buf[1..];
    let raw = read_len_prefixed_bytes(buf, field, len)?;
    std::str::from_utf8(raw)
        .map(|s| s.to_string())
        .map_err(|_| MalformedFrame::InvalidUtf8(field))
}

fn parse_data_payload(buf: &mut &[u8]) -> Result<DataPayload, MalformedFrame> {
    if buf.is_empty() {
        return Err(MalformedFrame::LengthPrefixOverrun("sub_protocol_count", 1, 0));
    }
    let count = buf[0] as usize;
    *buf = &buf[1..];

    let mut sub_protocols = Vec::with_capacity(count);
    for _ in 0..count {
        let name = read_u8_len_str(buf, "sub_protocol.name")?;
        let content_type = buf
            .read_u16::<BigEndian>()
            .map_err(|_| MalformedFrame::LengthPrefixOverrun("sub_protocol.content_type", 2, buf.len()))?;
        let data_len = buf
            .read_u32::<BigEndian>()
            .map_err(|_| MalformedFrame::LengthPrefixOverrun("sub_protocol.data_len", 4, buf.len()))?
            as usize;
        let data = Bytes::copy_from_slice(read_len_prefixed_bytes(buf, "sub_protocol.data", data_len)?);
        sub_protocols.push(SubProtocolEntry {
            name,
            content_type,
            data,
        });
    }

    let ilp_len = buf
        .read_u32::<BigEndian>()
        .map_err(|_| MalformedFrame::LengthPrefixOverrun("ilp_len", 4, buf.len()))? as usize;
    let ilp_packet = Bytes::copy_from_slice(read_len_prefixed_bytes(buf, "ilp_packet", ilp_len)?);

    Ok(DataPayload {
        sub_protocols,
        ilp_packet,
    })
}

fn parse_error_payload(buf: &mut &[u8]) -> Result<ErrorPayload, MalformedFrame> {
    let code = read_u8_len_str(buf, "error.code")?;
    let name = read_u8_len_str(buf, "error.name")?;
    let triggered_at = read_u8_len_str(buf, "error.triggered_at")?;
    let data_len = buf
        .read_u32::<BigEndian>()
        .map_err(|_| MalformedFrame::LengthPrefixOverrun("error.data_len", 4, buf.len()))? as usize;
    let data = Bytes::copy_from_slice(read_len_prefixed_bytes(buf, "error.data", data_len)?);
    Ok(ErrorPayload {
        code,
        name,
        triggered_at,
        data,
    })
}

/// Parse a frame off the wire. Performs strict bounds checking on every
/// length-prefixed read and never interprets trailing bytes (spec.md §4.1).
pub fn parse(bytes: &[u8]) -> Result<Frame, MalformedFrame> {
    if bytes.len() < 5 {
        return Err(MalformedFrame::BufferTooShort(bytes.len()));
    }
    let kind = FrameKind::from_byte(bytes[0]);
    let mut rest = &bytes[1..];
    let request_id = rest
        .read_u32::<BigEndian>()
        .map_err(|_| MalformedFrame::BufferTooShort(bytes.len()))?;

    let payload = match kind {
        FrameKind::Error => Payload::Error(parse_error_payload(&mut rest)?),
        FrameKind::Response | FrameKind::Message | FrameKind::Unknown(_) => {
            Payload::Data(parse_data_payload(&mut rest)?)
        }
    };

    Ok(Frame {
        kind,
        request_id,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message_frame() -> Frame {
        Frame::message(
            42,
            DataPayload {
                sub_protocols: vec![SubProtocolEntry {
                    name: "auth".to_string(),
                    content_type: 0,
                    data: Bytes::from_static(b"{\"peerId\":\"a\"}"),
                }],
                ilp_packet: Bytes::from_static(b"prepare-bytes"),
            },
        )
    }

    #[test]
    fn round_trips_message_frame() {
        let frame = sample_message_frame();
        let bytes = serialize(&frame);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn round_trips_absent_ilp_packet() {
        let frame = Frame::response(
            7,
            DataPayload {
                sub_protocols: vec![],
                ilp_packet: Bytes::new(),
            },
        );
        let bytes = serialize(&frame);
        assert_eq!(bytes[bytes.len() - 4..], [0, 0, 0, 0][..]);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn round_trips_error_frame() {
        let frame = Frame::error(
            9,
            ErrorPayload {
                code: "F00".to_string(),
                name: "NotAcceptedError".to_string(),
                triggered_at: "2024-01-01T00:00:00Z".to_string(),
                data: Bytes::from_static(b"details"),
            },
        );
        let bytes = serialize(&frame);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn serialize_parse_is_idempotent_on_bytes() {
        let frame = sample_message_frame();
        let once = serialize(&frame);
        let twice = serialize(&parse(&once).unwrap());
        assert_eq!(once, twice);
    }

    #[test]
    fn tolerates_unknown_kind_on_ingress() {
        let frame = Frame {
            kind: FrameKind::Unknown(99),
            request_id: 1,
            payload: Payload::Data(DataPayload::default()),
        };
        let bytes = serialize(&frame);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.kind, FrameKind::Unknown(99));
    }

    #[test]
    fn rejects_buffer_shorter_than_five_bytes() {
        assert_eq!(parse(&[0, 0, 0, 0]), Err(MalformedFrame::BufferTooShort(4)));
        assert_eq!(parse(&[]), Err(MalformedFrame::BufferTooShort(0)));
    }

    #[test]
    fn rejects_length_prefix_exceeding_remaining_buffer() {
        // MESSAGE frame, request_id = 0, count = 1 sub-protocol, but no bytes follow
        let bytes = [KIND_MESSAGE, 0, 0, 0, 0, 1];
        assert!(matches!(
            parse(&bytes),
            Err(MalformedFrame::LengthPrefixOverrun("sub_protocol.name", _, _))
        ));
    }

    #[test]
    fn does_not_interpret_trailing_bytes() {
        let frame = Frame::response(
            1,
            DataPayload {
                sub_protocols: vec![],
                ilp_packet: Bytes::new(),
            },
        );
        let mut bytes = serialize(&frame).to_vec();
        bytes.extend_from_slice(b"trailing-garbage");
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, frame);
    }
}

//! ILP Prepare/Fulfill/Reject packet types.
//!
//! These packets travel as the opaque `ilp_packet` payload of a BTP frame
//! (see `ilp_edge_btp::frame`). Encoding here is a simplified, length-prefixed
//! binary format rather than full ILP-OER (ASN.1) — spec.md explicitly calls
//! out OER exactness as a non-goal, only requiring that the two ends of this
//! implementation agree with each other.

use std::convert::TryFrom;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Bytes, BytesMut};

use crate::address::Address;
use crate::error_code::ErrorCode;

const TYPE_PREPARE: u8 = 1;
const TYPE_FULFILL: u8 = 2;
const TYPE_REJECT: u8 = 3;

quick_error::quick_error! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum PacketParseError {
        TooShort {
            display("packet buffer too short")
        }
        UnknownType(byte: u8) {
            display("unknown ILP packet type byte: {}", byte)
        }
        InvalidAddress {
            display("packet contained an invalid ILP address")
        }
        InvalidErrorCode {
            display("packet contained an invalid ILP error code")
        }
        InvalidUtf8 {
            display("packet field was not valid UTF-8")
        }
        LengthOverrun {
            display("a length-prefixed field overran the buffer")
        }
    }
}

fn system_time_to_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}

fn millis_to_system_time(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepare {
    amount: u64,
    expires_at: SystemTime,
    execution_condition: [u8; 32],
    destination: Address,
    data: Bytes,
}

impl Prepare {
    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    pub fn execution_condition(&self) -> &[u8; 32] {
        &self.execution_condition
    }

    pub fn destination(&self) -> &Address {
        &self.destination
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    fn write(&self, out: &mut BytesMut) {
        out.extend_from_slice(&[TYPE_PREPARE]);
        let mut buf = Vec::with_capacity(8);
        buf.write_u64::<BigEndian>(self.amount).unwrap();
        out.extend_from_slice(&buf);
        buf.clear();
        buf.write_u64::<BigEndian>(system_time_to_millis(self.expires_at))
            .unwrap();
        out.extend_from_slice(&buf);
        out.extend_from_slice(&self.execution_condition);
        let dest_bytes = self.destination.as_str().as_bytes();
        buf.clear();
        buf.write_u16::<BigEndian>(dest_bytes.len() as u16).unwrap();
        out.extend_from_slice(&buf);
        out.extend_from_slice(dest_bytes);
        buf.clear();
        buf.write_u32::<BigEndian>(self.data.len() as u32).unwrap();
        out.extend_from_slice(&buf);
        out.extend_from_slice(&self.data);
    }

    fn read(mut buf: &[u8]) -> Result<Self, PacketParseError> {
        if buf.len() < 8 + 8 + 32 + 2 {
            return Err(PacketParseError::TooShort);
        }
        let amount = buf.read_u64::<BigEndian>().map_err(|_| PacketParseError::TooShort)?;
        let expires_millis = buf.read_u64::<BigEndian>().map_err(|_| PacketParseError::TooShort)?;
        if buf.len() < 32 {
            return Err(PacketParseError::TooShort);
        }
        let mut execution_condition = [0u8; 32];
        execution_condition.copy_from_slice(&buf[..32]);
        buf = &buf[32..];
        let dest_len = buf.read_u16::<BigEndian>().map_err(|_| PacketParseError::TooShort)? as usize;
        if buf.len() < dest_len {
            return Err(PacketParseError::LengthOverrun);
        }
        let dest_str =
            std::str::from_utf8(&buf[..dest_len]).map_err(|_| PacketParseError::InvalidUtf8)?;
        let destination =
            Address::from_str_relaxed(dest_str).ok_or(PacketParseError::InvalidAddress)?;
        buf = &buf[dest_len..];
        if buf.len() < 4 {
            return Err(PacketParseError::TooShort);
        }
        let data_len = buf.read_u32::<BigEndian>().map_err(|_| PacketParseError::TooShort)? as usize;
        if buf.len() < data_len {
            return Err(PacketParseError::LengthOverrun);
        }
        let data = Bytes::copy_from_slice(&buf[..data_len]);
        Ok(Prepare {
            amount,
            expires_at: millis_to_system_time(expires_millis),
            execution_condition,
            destination,
            data,
        })
    }
}

/// Builds a [`Prepare`] packet, mirroring the teacher's `PrepareBuilder` shape.
pub struct PrepareBuilder<'a> {
    pub amount: u64,
    pub expires_at: SystemTime,
    pub execution_condition: &'a [u8; 32],
    pub destination: Address,
    pub data: &'a [u8],
}

impl<'a> PrepareBuilder<'a> {
    pub fn build(self) -> Prepare {
        Prepare {
            amount: self.amount,
            expires_at: self.expires_at,
            execution_condition: *self.execution_condition,
            destination: self.destination,
            data: Bytes::copy_from_slice(self.data),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fulfill {
    fulfillment: [u8; 32],
    data: Bytes,
}

impl Fulfill {
    pub fn fulfillment(&self) -> &[u8; 32] {
        &self.fulfillment
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn write(&self, out: &mut BytesMut) {
        out.extend_from_slice(&[TYPE_FULFILL]);
        out.extend_from_slice(&self.fulfillment);
        let mut buf = Vec::with_capacity(4);
        buf.write_u32::<BigEndian>(self.data.len() as u32).unwrap();
        out.extend_from_slice(&buf);
        out.extend_from_slice(&self.data);
    }

    fn read(mut buf: &[u8]) -> Result<Self, PacketParseError> {
        if buf.len() < 32 + 4 {
            return Err(PacketParseError::TooShort);
        }
        let mut fulfillment = [0u8; 32];
        fulfillment.copy_from_slice(&buf[..32]);
        buf = &buf[32..];
        let data_len = buf.read_u32::<BigEndian>().map_err(|_| PacketParseError::TooShort)? as usize;
        if buf.len() < data_len {
            return Err(PacketParseError::LengthOverrun);
        }
        let data = Bytes::copy_from_slice(&buf[..data_len]);
        Ok(Fulfill { fulfillment, data })
    }
}

pub struct FulfillBuilder<'a> {
    pub fulfillment: &'a [u8; 32],
    pub data: &'a [u8],
}

impl<'a> FulfillBuilder<'a> {
    pub fn build(self) -> Fulfill {
        Fulfill {
            fulfillment: *self.fulfillment,
            data: Bytes::copy_from_slice(self.data),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    code: ErrorCode,
    triggered_by: Option<Address>,
    message: String,
    data: Bytes,
}

impl Reject {
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn triggered_by(&self) -> Option<&Address> {
        self.triggered_by.as_ref()
    }

    pub fn message(&self) -> &[u8] {
        self.message.as_bytes()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn write(&self, out: &mut BytesMut) {
        out.extend_from_slice(&[TYPE_REJECT]);
        out.extend_from_slice(self.code.code().as_bytes());
        let triggered_by_bytes = self
            .triggered_by
            .as_ref()
            .map(|a| a.as_str().as_bytes())
            .unwrap_or(&[]);
        out.extend_from_slice(&[triggered_by_bytes.len() as u8]);
        out.extend_from_slice(triggered_by_bytes);
        let mut buf = Vec::with_capacity(4);
        buf.write_u16::<BigEndian>(self.message.len() as u16).unwrap();
        out.extend_from_slice(&buf);
        out.extend_from_slice(self.message.as_bytes());
        buf.clear();
        buf.write_u32::<BigEndian>(self.data.len() as u32).unwrap();
        out.extend_from_slice(&buf);
        out.extend_from_slice(&self.data);
    }

    fn read(mut buf: &[u8]) -> Result<Self, PacketParseError> {
        if buf.len() < 3 + 1 {
            return Err(PacketParseError::TooShort);
        }
        let code_str = std::str::from_utf8(&buf[..3]).map_err(|_| PacketParseError::InvalidUtf8)?;
        let code = code_str.parse().map_err(|_| PacketParseError::InvalidErrorCode)?;
        buf = &buf[3..];
        let triggered_by_len = buf[0] as usize;
        buf = &buf[1..];
        if buf.len() < triggered_by_len {
            return Err(PacketParseError::LengthOverrun);
        }
        let triggered_by = if triggered_by_len > 0 {
            let s = std::str::from_utf8(&buf[..triggered_by_len])
                .map_err(|_| PacketParseError::InvalidUtf8)?;
            Some(Address::from_str_relaxed(s).ok_or(PacketParseError::InvalidAddress)?)
        } else {
            None
        };
        buf = &buf[triggered_by_len..];
        if buf.len() < 2 {
            return Err(PacketParseError::TooShort);
        }
        let message_len = buf.read_u16::<BigEndian>().map_err(|_| PacketParseError::TooShort)? as usize;
        if buf.len() < message_len {
            return Err(PacketParseError::LengthOverrun);
        }
        let message =
            std::str::from_utf8(&buf[..message_len]).map_err(|_| PacketParseError::InvalidUtf8)?.to_string();
        buf = &buf[message_len..];
        if buf.len() < 4 {
            return Err(PacketParseError::TooShort);
        }
        let data_len = buf.read_u32::<BigEndian>().map_err(|_| PacketParseError::TooShort)? as usize;
        if buf.len() < data_len {
            return Err(PacketParseError::LengthOverrun);
        }
        let data = Bytes::copy_from_slice(&buf[..data_len]);
        Ok(Reject {
            code,
            triggered_by,
            message,
            data,
        })
    }
}

pub struct RejectBuilder<'a> {
    pub code: ErrorCode,
    pub message: &'a [u8],
    pub triggered_by: Option<&'a Address>,
    pub data: &'a [u8],
}

impl<'a> RejectBuilder<'a> {
    pub fn build(self) -> Reject {
        Reject {
            code: self.code,
            triggered_by: self.triggered_by.cloned(),
            message: String::from_utf8_lossy(self.message).into_owned(),
            data: Bytes::copy_from_slice(self.data),
        }
    }
}

/// Any of the three ILP packet kinds, as carried in a BTP frame's `ilp_packet`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Prepare(Prepare),
    Fulfill(Fulfill),
    Reject(Reject),
}

impl Packet {
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        match self {
            Packet::Prepare(p) => p.write(&mut out),
            Packet::Fulfill(f) => f.write(&mut out),
            Packet::Reject(r) => r.write(&mut out),
        }
        out.freeze()
    }
}

impl TryFrom<&[u8]> for Packet {
    type Error = PacketParseError;

    fn try_from(buf: &[u8]) -> Result<Self, Self::Error> {
        if buf.is_empty() {
            return Err(PacketParseError::TooShort);
        }
        let (type_byte, rest) = (buf[0], &buf[1..]);
        match type_byte {
            TYPE_PREPARE => Ok(Packet::Prepare(Prepare::read(rest)?)),
            TYPE_FULFILL => Ok(Packet::Fulfill(Fulfill::read(rest)?)),
            TYPE_REJECT => Ok(Packet::Reject(Reject::read(rest)?)),
            other => Err(PacketParseError::UnknownType(other)),
        }
    }
}

/// Either the result of delivering a packet: the recipient's preimage, or a
/// structured rejection. This is the `Result<Fulfill, Reject>` sum type
/// spec.md's design notes ask for in place of exceptions for control flow.
pub type IlpResult = Result<Fulfill, Reject>;

impl Address {
    /// Used internally by the packet codec, which only has a `&str` to work
    /// with and wants an `Option` rather than threading `AddressError`
    /// through every packet parse error variant.
    fn from_str_relaxed(s: &str) -> Option<Address> {
        use std::str::FromStr;
        Address::from_str(s).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn addr(s: &str) -> Address {
        Address::from_str(s).unwrap()
    }

    #[test]
    fn prepare_round_trips() {
        let prepare = PrepareBuilder {
            amount: 1500000,
            expires_at: millis_to_system_time(1_600_000_000_000),
            execution_condition: &[7u8; 32],
            destination: addr("g.connector.peer1"),
            data: b"Hello World",
        }
        .build();
        let packet = Packet::Prepare(prepare.clone());
        let bytes = packet.to_bytes();
        let parsed = Packet::try_from(&bytes[..]).unwrap();
        assert_eq!(parsed, Packet::Prepare(prepare));
    }

    #[test]
    fn fulfill_round_trips() {
        let fulfill = FulfillBuilder {
            fulfillment: &[3u8; 32],
            data: b"",
        }
        .build();
        let packet = Packet::Fulfill(fulfill.clone());
        let bytes = packet.to_bytes();
        assert_eq!(Packet::try_from(&bytes[..]).unwrap(), Packet::Fulfill(fulfill));
    }

    #[test]
    fn reject_round_trips_with_triggered_by() {
        let by = addr("g.connector");
        let reject = RejectBuilder {
            code: ErrorCode::F06_UNEXPECTED_PAYMENT,
            message: b"no such account",
            triggered_by: Some(&by),
            data: b"extra",
        }
        .build();
        let packet = Packet::Reject(reject.clone());
        let bytes = packet.to_bytes();
        assert_eq!(Packet::try_from(&bytes[..]).unwrap(), Packet::Reject(reject));
    }

    #[test]
    fn reject_round_trips_without_triggered_by() {
        let reject = RejectBuilder {
            code: ErrorCode::T00_INTERNAL_ERROR,
            message: b"",
            triggered_by: None,
            data: b"",
        }
        .build();
        let packet = Packet::Reject(reject.clone());
        let bytes = packet.to_bytes();
        assert_eq!(Packet::try_from(&bytes[..]).unwrap(), Packet::Reject(reject));
    }

    #[test]
    fn rejects_truncated_buffer() {
        assert_eq!(Packet::try_from(&[][..]), Err(PacketParseError::TooShort));
        assert_eq!(
            Packet::try_from(&[TYPE_PREPARE, 0, 0][..]),
            Err(PacketParseError::TooShort)
        );
    }

    #[test]
    fn rejects_unknown_type_byte() {
        assert_eq!(
            Packet::try_from(&[0xFF][..]),
            Err(PacketParseError::UnknownType(0xFF))
        );
    }

    #[test]
    fn is_expired_compares_against_now() {
        let prepare = PrepareBuilder {
            amount: 1,
            expires_at: UNIX_EPOCH + Duration::from_secs(100),
            execution_condition: &[0u8; 32],
            destination: addr("g.a.b"),
            data: &[],
        }
        .build();
        assert!(prepare.is_expired(UNIX_EPOCH + Duration::from_secs(200)));
        assert!(!prepare.is_expired(UNIX_EPOCH + Duration::from_secs(50)));
    }
}

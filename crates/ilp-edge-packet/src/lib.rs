//! ILP address and packet types shared by the BTP framing layer and the
//! inbound/outbound handlers.

mod address;
mod error_code;
mod packet;

pub use address::{Address, AddressError, MAX_ADDRESS_LENGTH};
pub use error_code::{ErrorClass, ErrorCode, RejectReason};
pub use packet::{
    Fulfill, FulfillBuilder, IlpResult, Packet, PacketParseError, Prepare, PrepareBuilder, Reject,
    RejectBuilder,
};

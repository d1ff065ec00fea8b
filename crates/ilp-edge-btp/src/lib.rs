//! Bilateral Transfer Protocol framing, fulfillment crypto, and the peer
//! session state machine — the three components that make up this edge
//! runtime's wire layer.

mod crypto;
mod frame;
mod session;

pub use crypto::{condition_from_data, condition_from_fulfillment, fulfillment_from_data, verify, Digest32, FulfillmentScheme};
pub use frame::{parse, serialize, DataPayload, ErrorPayload, Frame, FrameKind, MalformedFrame, Payload, SubProtocolEntry};
pub use session::{PeerSession, SessionConfig, SessionError, SessionState};

//! Business-logic handlers (C4/C5) and the thin HTTP surface that fronts
//! the bilateral BTP peer session.

pub mod business_client;
pub mod inbound;
pub mod outbound;
pub mod routes;

pub use business_client::{BusinessLogicClient, BusinessLogicError, PaymentDecision, PaymentRequest};
pub use inbound::{InboundHandler, PaymentOutcome};
pub use outbound::{OutboundHandler, SendError, SendOutcome, SendRequest};

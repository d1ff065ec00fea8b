//! The seam between the BTP peer session and the business-logic handlers.
//!
//! Mirrors the teacher's `interledger-service` crate: a small set of traits
//! any packet-handling middleware implements, so C3 (the session) and C4/C5
//! (the handlers) can be composed without either one owning the other.

use async_trait::async_trait;
use ilp_edge_packet::{IlpResult, Prepare};

/// An account this runtime can send to or receive from. In this bilateral
/// edge runtime there is exactly one peer account, but the trait is kept
/// separate from the session so the handler never needs to know that.
pub trait Account: Clone + Send + Sync {
    fn id(&self) -> &str;
}

/// A minimal `Account` for the single configured peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAccount {
    pub id: String,
}

impl Account for PeerAccount {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A Prepare packet arriving from `from`, awaiting a Fulfill or Reject.
pub struct IncomingRequest<A: Account> {
    pub from: A,
    pub prepare: Prepare,
}

/// A Prepare packet this node wants to send to `to`.
pub struct OutgoingRequest<A: Account> {
    pub to: A,
    pub prepare: Prepare,
}

/// Implemented by anything that can turn an inbound Prepare into a result.
/// The BTP session calls this for every MESSAGE frame carrying a Prepare.
#[async_trait]
pub trait IncomingService<A: Account>: Send {
    async fn handle_request(&mut self, request: IncomingRequest<A>) -> IlpResult;
}

/// Implemented by anything that can send a Prepare out over the wire and
/// return the peer's reply. The outbound send handler (C5) is the primary
/// caller; the BTP session is the primary implementor.
#[async_trait]
pub trait OutgoingService<A: Account>: Send {
    async fn send_request(&mut self, request: OutgoingRequest<A>) -> IlpResult;
}

/// Adapts a plain async closure into an [`IncomingService`], used heavily in
/// tests in place of a full handler stack (grounded on the teacher's
/// `incoming_service_fn` helper).
pub fn incoming_service_fn<A, F>(f: F) -> IncomingServiceFn<F>
where
    A: Account,
    F: FnMut(IncomingRequest<A>) -> IlpResult + Send,
{
    IncomingServiceFn(f)
}

pub struct IncomingServiceFn<F>(F);

#[async_trait]
impl<A, F> IncomingService<A> for IncomingServiceFn<F>
where
    A: Account,
    F: FnMut(IncomingRequest<A>) -> IlpResult + Send,
{
    async fn handle_request(&mut self, request: IncomingRequest<A>) -> IlpResult {
        (self.0)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilp_edge_packet::{FulfillBuilder, PrepareBuilder};
    use std::str::FromStr;
    use std::time::SystemTime;

    fn test_prepare() -> Prepare {
        PrepareBuilder {
            amount: 100,
            expires_at: SystemTime::now(),
            execution_condition: &[0u8; 32],
            destination: ilp_edge_packet::Address::from_str("g.receiver").unwrap(),
            data: b"hi",
        }
        .build()
    }

    #[tokio::test]
    async fn incoming_service_fn_invokes_closure() {
        let mut service = incoming_service_fn(|_req: IncomingRequest<PeerAccount>| {
            Ok(FulfillBuilder {
                fulfillment: &[1u8; 32],
                data: b"",
            }
            .build())
        });
        let result = service
            .handle_request(IncomingRequest {
                from: PeerAccount { id: "peer1".into() },
                prepare: test_prepare(),
            })
            .await;
        assert!(result.is_ok());
    }
}

//! C5: accepts `{destination, amount, data, timeout_ms?}`, builds a Prepare,
//! and awaits the peer's reply through the C3 session.
//!
//! Grounded on `interledger-api::http_retry::Client`'s plain-client shape
//! (no retry here — §4.5 is a single request/response round trip bounded by
//! a caller-supplied deadline, not a collaborator worth retrying) and on the
//! teacher's validate-then-build pattern in `interledger-api::routes::accounts`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ilp_edge_btp::{condition_from_data, FulfillmentScheme, PeerSession};
use ilp_edge_packet::{Address, AddressError, PrepareBuilder};
use ilp_edge_service::{OutgoingRequest, OutgoingService, PeerAccount};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const MAX_OUTBOUND_DATA_BYTES: usize = 65_536;

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Validation(String),
    NotConnected,
    Timeout,
    Internal(String),
}

pub enum SendOutcome {
    Fulfilled { fulfillment: [u8; 32], data: Vec<u8> },
    Rejected { code: String, message: String, data: Vec<u8> },
}

/// The raw, still-unvalidated shape of a `/ilp/send` request body.
pub struct SendRequest {
    pub destination: String,
    pub amount: String,
    pub data: String,
    pub timeout_ms: Option<u64>,
}

struct ValidatedSend {
    destination: Address,
    amount: u64,
    data: Vec<u8>,
    timeout: Duration,
}

fn validate(request: SendRequest) -> Result<ValidatedSend, SendError> {
    let destination = Address::from_str(&request.destination)
        .map_err(|err: AddressError| SendError::Validation(format!("invalid destination: {}", err)))?;

    if request.amount.is_empty() || !request.amount.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SendError::Validation("amount must match ^\\d+$".to_string()));
    }
    let amount = request
        .amount
        .parse::<u64>()
        .map_err(|_| SendError::Validation("amount overflowed u64".to_string()))?;

    let data = base64::decode(&request.data)
        .map_err(|_| SendError::Validation("data must be valid base64".to_string()))?;
    if base64::encode(&data) != request.data {
        return Err(SendError::Validation("data must be valid base64".to_string()));
    }
    if data.len() > MAX_OUTBOUND_DATA_BYTES {
        return Err(SendError::Validation(format!(
            "Data exceeds maximum size of {} bytes",
            MAX_OUTBOUND_DATA_BYTES
        )));
    }

    let timeout_ms = match request.timeout_ms {
        Some(ms) if ms > 0 => ms,
        Some(_) => return Err(SendError::Validation("timeout_ms must be a positive integer".to_string())),
        None => DEFAULT_TIMEOUT_MS,
    };

    Ok(ValidatedSend {
        destination,
        amount,
        data,
        timeout: Duration::from_millis(timeout_ms),
    })
}

pub struct OutboundHandler {
    session: Arc<PeerSession>,
    scheme: FulfillmentScheme,
    shared_secret: Option<Vec<u8>>,
}

impl OutboundHandler {
    pub fn new(session: Arc<PeerSession>, scheme: FulfillmentScheme, shared_secret: Option<Vec<u8>>) -> Self {
        OutboundHandler {
            session,
            scheme,
            shared_secret,
        }
    }

    pub async fn send(&self, request: SendRequest) -> Result<SendOutcome, SendError> {
        let validated = validate(request)?;

        if !self.session.is_connected() {
            return Err(SendError::NotConnected);
        }

        let condition = condition_from_data(self.scheme, self.shared_secret.as_deref(), &validated.data);
        let prepare = PrepareBuilder {
            amount: validated.amount,
            expires_at: SystemTime::now() + validated.timeout,
            execution_condition: &condition,
            destination: validated.destination,
            data: &validated.data,
        }
        .build();

        let mut session = SessionSender(self.session.clone());
        let result = tokio::time::timeout(
            validated.timeout,
            session.send_request(OutgoingRequest {
                to: PeerAccount { id: String::new() },
                prepare,
            }),
        )
        .await;

        match result {
            Ok(Ok(fulfill)) => Ok(SendOutcome::Fulfilled {
                fulfillment: *fulfill.fulfillment(),
                data: fulfill.data().to_vec(),
            }),
            Ok(Err(reject)) => Ok(SendOutcome::Rejected {
                code: reject.code().to_string(),
                message: String::from_utf8_lossy(reject.message()).into_owned(),
                data: reject.data().to_vec(),
            }),
            Err(_) => Err(SendError::Timeout),
        }
    }
}

/// `PeerSession` only implements `OutgoingService` on `&mut self`; this
/// newtype lets `send` hold a shared `Arc<PeerSession>` while still using
/// that trait impl (the session's internal send path is already serialized,
/// see spec §5).
struct SessionSender(Arc<PeerSession>);

#[async_trait::async_trait]
impl OutgoingService<PeerAccount> for SessionSender {
    async fn send_request(&mut self, request: OutgoingRequest<PeerAccount>) -> ilp_edge_packet::IlpResult {
        self.0.send_packet(request.prepare).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(destination: &str, amount: &str, data: &str, timeout_ms: Option<u64>) -> SendRequest {
        SendRequest {
            destination: destination.to_string(),
            amount: amount.to_string(),
            data: data.to_string(),
            timeout_ms,
        }
    }

    #[test]
    fn rejects_invalid_destination() {
        let err = validate(request("not valid", "100", "", None)).unwrap_err();
        assert!(matches!(err, SendError::Validation(_)));
    }

    #[test]
    fn rejects_non_numeric_amount() {
        let err = validate(request("g.receiver", "12.5", "", None)).unwrap_err();
        assert!(matches!(err, SendError::Validation(_)));
    }

    #[test]
    fn rejects_malformed_base64_data() {
        let err = validate(request("g.receiver", "100", "not base64!!", None)).unwrap_err();
        assert!(matches!(err, SendError::Validation(_)));
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = validate(request("g.receiver", "100", "", Some(0))).unwrap_err();
        assert!(matches!(err, SendError::Validation(_)));
    }

    #[test]
    fn accepts_well_formed_request_with_default_timeout() {
        let validated = validate(request("g.receiver", "100", "", None)).unwrap();
        assert_eq!(validated.amount, 100);
        assert_eq!(validated.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }
}

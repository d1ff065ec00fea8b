//! C4: turns an inbound Prepare into a Fulfill or Reject by delegating to
//! the business-logic collaborator.
//!
//! Grounded on `interledger-settlement::api::message_service`'s shape for an
//! `IncomingService` that calls out over HTTP and builds a `RejectBuilder`
//! on failure, adapted to this runtime's single-peer `PeerAccount`.

use std::time::SystemTime;

use async_trait::async_trait;
use ilp_edge_btp::{fulfillment_from_data, FulfillmentScheme};
use ilp_edge_packet::{Address, ErrorCode, FulfillBuilder, IlpResult, RejectBuilder, RejectReason};
use ilp_edge_service::{IncomingRequest, IncomingService, PeerAccount};
use log::warn;
use rand::Rng;

use crate::business_client::{BusinessLogicClient, PaymentRequest};

/// Outbound `data` fields longer than this are dropped rather than embedded
/// in the outgoing ILP packet (spec §4.4).
const MAX_OUTBOUND_DATA_BYTES: usize = 32_768;

#[derive(Clone)]
pub struct InboundHandler {
    business_client: BusinessLogicClient,
    scheme: FulfillmentScheme,
    shared_secret: Option<Vec<u8>>,
}

impl InboundHandler {
    pub fn new(
        business_client: BusinessLogicClient,
        scheme: FulfillmentScheme,
        shared_secret: Option<Vec<u8>>,
    ) -> Self {
        InboundHandler {
            business_client,
            scheme,
            shared_secret,
        }
    }

    /// The core algorithm (spec §4.4), independent of whether the Prepare
    /// arrived over BTP or the `/ilp/packets` HTTP surface.
    pub async fn decide(
        &self,
        destination: &Address,
        amount: u64,
        expires_at: SystemTime,
        data: &[u8],
    ) -> PaymentOutcome {
        if SystemTime::now() >= expires_at {
            return PaymentOutcome::rejected(ErrorCode::R00_TRANSFER_TIMED_OUT, "Payment has expired", b"");
        }

        let payment_id = generate_payment_id();
        let request = PaymentRequest {
            payment_id,
            destination: destination.as_str().to_string(),
            amount,
            expires_at: chrono::DateTime::<chrono::Utc>::from(expires_at).to_rfc3339(),
            data: non_empty_base64(data),
        };

        match self.business_client.handle_payment(&request).await {
            Ok(decision) if decision.accept => {
                let out_data = decision
                    .data
                    .as_deref()
                    .map(|d| validate_outbound_data(d))
                    .unwrap_or_default();
                let fulfillment =
                    fulfillment_from_data(self.scheme, self.shared_secret.as_deref(), data);
                PaymentOutcome::Fulfilled {
                    fulfillment,
                    data: out_data,
                }
            }
            Ok(decision) => {
                let reason = decision
                    .reject_reason
                    .map(|r| (r.code, r.message))
                    .unwrap_or_else(|| ("".to_string(), "rejected by business logic".to_string()));
                let code = reason.0.parse::<RejectReason>().unwrap_or(RejectReason::Unknown).to_error_code();
                PaymentOutcome::rejected(code, &reason.1, b"")
            }
            Err(err) => {
                warn!("business logic collaborator failed: {}", err);
                PaymentOutcome::rejected(ErrorCode::T00_INTERNAL_ERROR, "Internal error processing payment", b"")
            }
        }
    }
}

#[async_trait]
impl IncomingService<PeerAccount> for InboundHandler {
    async fn handle_request(&mut self, request: IncomingRequest<PeerAccount>) -> IlpResult {
        let prepare = &request.prepare;
        let outcome = self
            .decide(
                prepare.destination(),
                prepare.amount(),
                prepare.expires_at(),
                prepare.data(),
            )
            .await;
        outcome.into_ilp_result()
    }
}

/// Either half of the C4 algorithm's result, shared between the BTP ingress
/// path and the `/ilp/packets` HTTP response shape.
pub enum PaymentOutcome {
    Fulfilled { fulfillment: [u8; 32], data: Vec<u8> },
    Rejected { code: ErrorCode, message: String, data: Vec<u8> },
}

impl PaymentOutcome {
    fn rejected(code: ErrorCode, message: &str, data: &[u8]) -> Self {
        PaymentOutcome::Rejected {
            code,
            message: message.to_string(),
            data: data.to_vec(),
        }
    }

    pub fn into_ilp_result(self) -> IlpResult {
        match self {
            PaymentOutcome::Fulfilled { fulfillment, data } => Ok(FulfillBuilder {
                fulfillment: &fulfillment,
                data: &data,
            }
            .build()),
            PaymentOutcome::Rejected { code, message, data } => Err(RejectBuilder {
                code,
                message: message.as_bytes(),
                triggered_by: None,
                data: &data,
            }
            .build()),
        }
    }
}

fn generate_payment_id() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut rng = rand::thread_rng();
    (0..22).map(|_| ALPHABET[rng.gen_range(0, ALPHABET.len())] as char).collect()
}

fn non_empty_base64(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        None
    } else {
        Some(base64::encode(data))
    }
}

/// Drops a handler-supplied `data` field that isn't valid base64 or decodes
/// past the outbound size limit, logging at warn rather than failing the
/// whole payment (spec §4.4).
fn validate_outbound_data(encoded: &str) -> Vec<u8> {
    match base64::decode(encoded) {
        Ok(bytes) if bytes.len() <= MAX_OUTBOUND_DATA_BYTES => bytes,
        Ok(bytes) => {
            warn!(
                "business logic returned {} bytes of outbound data, exceeding the {}-byte limit; dropping",
                bytes.len(),
                MAX_OUTBOUND_DATA_BYTES
            );
            Vec::new()
        }
        Err(_) => {
            warn!("business logic returned non-base64 outbound data; dropping");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::time::Duration;

    fn handler_against(mock_body: &str, status: usize) -> InboundHandler {
        let _m = mockito::mock("POST", "/handle-payment")
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(mock_body)
            .create();
        InboundHandler::new(
            crate::business_client::BusinessLogicClient::new(
                url::Url::parse(&mockito::server_url()).unwrap(),
                Duration::from_secs(5),
            ),
            FulfillmentScheme::Sha256,
            None,
        )
    }

    #[tokio::test]
    async fn fulfills_when_business_logic_accepts() {
        let handler = handler_against(r#"{"accept":true}"#, 200);
        let outcome = handler
            .decide(
                &Address::from_str("g.receiver").unwrap(),
                100,
                SystemTime::now() + Duration::from_secs(30),
                b"payload",
            )
            .await;
        match outcome {
            PaymentOutcome::Fulfilled { fulfillment, .. } => {
                assert_eq!(&fulfillment[..], &ilp_edge_btp::fulfillment_from_data(FulfillmentScheme::Sha256, None, b"payload")[..]);
            }
            PaymentOutcome::Rejected { .. } => panic!("expected fulfillment"),
        }
    }

    #[tokio::test]
    async fn rejects_expired_prepare_without_calling_business_logic() {
        let handler = handler_against(r#"{"accept":true}"#, 200);
        let outcome = handler
            .decide(
                &Address::from_str("g.receiver").unwrap(),
                100,
                SystemTime::now() - Duration::from_secs(5),
                b"",
            )
            .await;
        match outcome {
            PaymentOutcome::Rejected { code, .. } => assert_eq!(code, ErrorCode::R00_TRANSFER_TIMED_OUT),
            PaymentOutcome::Fulfilled { .. } => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn maps_business_logic_rejection_reason() {
        let handler = handler_against(
            r#"{"accept":false,"rejectReason":{"code":"insufficient_funds","message":"no balance"}}"#,
            200,
        );
        let outcome = handler
            .decide(
                &Address::from_str("g.receiver").unwrap(),
                100,
                SystemTime::now() + Duration::from_secs(30),
                b"payload",
            )
            .await;
        match outcome {
            PaymentOutcome::Rejected { code, message, .. } => {
                assert_eq!(code, ErrorCode::T04_INSUFFICIENT_LIQUIDITY);
                assert_eq!(message, "no balance");
            }
            PaymentOutcome::Fulfilled { .. } => panic!("expected rejection"),
        }
    }

    #[test]
    fn validate_outbound_data_drops_oversized_payload() {
        let huge = base64::encode(vec![0u8; MAX_OUTBOUND_DATA_BYTES + 1]);
        assert!(validate_outbound_data(&huge).is_empty());
    }

    #[test]
    fn validate_outbound_data_drops_invalid_base64() {
        assert!(validate_outbound_data("not-valid-base64!!").is_empty());
    }
}

//! HTTP client for the business-logic collaborator (spec §6), built the way
//! the teacher's `interledger-settlement::api::message_service` talks to its
//! settlement engine collaborator: a plain `reqwest::Client`, retried with
//! `tokio-retry`'s `ExponentialBackoff` for transient I/O failures only.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use url::Url;

const HANDLE_PAYMENT_PATH: &str = "handle-payment";
const RETRY_BASE_MS: u64 = 10;
const RETRY_ATTEMPTS: usize = 3;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub payment_id: String,
    pub destination: String,
    pub amount: u64,
    pub expires_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectReasonPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDecision {
    pub accept: bool,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub reject_reason: Option<RejectReasonPayload>,
}

impl PaymentDecision {
    fn allow_by_default() -> Self {
        PaymentDecision {
            accept: true,
            data: None,
            reject_reason: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusinessLogicError {
    #[error("business logic collaborator unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("business logic collaborator returned an unparseable response")]
    Decode,
}

#[derive(Clone)]
pub struct BusinessLogicClient {
    base_url: Url,
    http: reqwest::Client,
}

impl BusinessLogicClient {
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        BusinessLogicClient {
            base_url,
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build business-logic HTTP client"),
        }
    }

    pub async fn handle_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentDecision, BusinessLogicError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("business logic base URL cannot be a base")
            .push(HANDLE_PAYMENT_PATH);

        let http = self.http.clone();
        let response = Retry::spawn(retry_strategy(), || {
            let http = http.clone();
            let url = url.clone();
            let body = request;
            async move { http.post(url).json(body).send().await }
        })
        .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            log::debug!("business logic collaborator has no handle-payment hook, allowing");
            return Ok(PaymentDecision::allow_by_default());
        }

        response
            .json::<PaymentDecision>()
            .await
            .map_err(|_| BusinessLogicError::Decode)
    }
}

fn retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(RETRY_BASE_MS).take(RETRY_ATTEMPTS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_payment_on_200_response() {
        let mock_server = mockito::mock("POST", "/handle-payment")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accept":true}"#)
            .create();
        let client = BusinessLogicClient::new(Url::parse(&mockito::server_url()).unwrap(), Duration::from_secs(5));
        let decision = client
            .handle_payment(&PaymentRequest {
                payment_id: "p1".into(),
                destination: "g.receiver".into(),
                amount: 100,
                expires_at: "2024-01-01T00:00:00Z".into(),
                data: None,
            })
            .await
            .unwrap();
        assert!(decision.accept);
        mock_server.assert();
    }

    #[tokio::test]
    async fn treats_missing_hook_as_allow() {
        let mock_server = mockito::mock("POST", "/handle-payment").with_status(404).create();
        let client = BusinessLogicClient::new(Url::parse(&mockito::server_url()).unwrap(), Duration::from_secs(5));
        let decision = client
            .handle_payment(&PaymentRequest {
                payment_id: "p2".into(),
                destination: "g.receiver".into(),
                amount: 100,
                expires_at: "2024-01-01T00:00:00Z".into(),
                data: None,
            })
            .await
            .unwrap();
        assert!(decision.accept);
        mock_server.assert();
    }

    #[tokio::test]
    async fn surfaces_rejection_from_business_logic() {
        let mock_server = mockito::mock("POST", "/handle-payment")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accept":false,"rejectReason":{"code":"insufficient_funds","message":"no balance"}}"#)
            .create();
        let client = BusinessLogicClient::new(Url::parse(&mockito::server_url()).unwrap(), Duration::from_secs(5));
        let decision = client
            .handle_payment(&PaymentRequest {
                payment_id: "p3".into(),
                destination: "g.receiver".into(),
                amount: 100,
                expires_at: "2024-01-01T00:00:00Z".into(),
                data: None,
            })
            .await
            .unwrap();
        assert!(!decision.accept);
        assert_eq!(decision.reject_reason.unwrap().code, "insufficient_funds");
        mock_server.assert();
    }
}

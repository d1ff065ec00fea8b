use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use ilp_edge_packet::Address;
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::Filter;

use crate::inbound::{InboundHandler, PaymentOutcome};
use crate::outbound::{OutboundHandler, SendError, SendOutcome, SendRequest};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDeliveryRequest {
    pub destination: String,
    pub amount: u64,
    #[serde(default)]
    pub execution_condition: Option<String>,
    pub expires_at: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub source_peer: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FulfillPayload {
    pub fulfillment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RejectPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LocalDeliveryResponse {
    Fulfill { fulfill: FulfillPayload },
    Reject { reject: RejectPayload },
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn bad_request(message: impl Into<String>) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&ErrorBody { error: message.into() }),
        StatusCode::BAD_REQUEST,
    )
}

pub fn ilp_packets_filter(
    handler: Arc<InboundHandler>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("ilp" / "packets")
        .and(warp::post())
        .and(warp::body::json())
        .and(warp::any().map(move || handler.clone()))
        .and_then(handle_ilp_packets)
}

async fn handle_ilp_packets(
    request: LocalDeliveryRequest,
    handler: Arc<InboundHandler>,
) -> Result<impl warp::Reply, Infallible> {
    let destination = match Address::from_str(&request.destination) {
        Ok(addr) => addr,
        Err(err) => return Ok(bad_request(format!("invalid destination: {}", err))),
    };
    let expires_at: SystemTime = match chrono::DateTime::parse_from_rfc3339(&request.expires_at) {
        Ok(dt) => dt.into(),
        Err(_) => return Ok(bad_request("expiresAt must be an ISO-8601 timestamp")),
    };
    let data = match request.data.as_deref().map(base64::decode) {
        Some(Ok(bytes)) => bytes,
        Some(Err(_)) => return Ok(bad_request("data must be valid base64")),
        None => Vec::new(),
    };

    let outcome = handler.decide(&destination, request.amount, expires_at, &data).await;
    let body = match outcome {
        PaymentOutcome::Fulfilled { fulfillment, data } => LocalDeliveryResponse::Fulfill {
            fulfill: FulfillPayload {
                fulfillment: base64::encode(&fulfillment),
                data: non_empty_base64(&data),
            },
        },
        PaymentOutcome::Rejected { code, message, data } => LocalDeliveryResponse::Reject {
            reject: RejectPayload {
                code: code.to_string(),
                message,
                data: non_empty_base64(&data),
            },
        },
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), StatusCode::OK))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    accepted: bool,
    fulfilled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    fulfillment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

pub fn ilp_send_filter(
    handler: Arc<OutboundHandler>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("ilp" / "send")
        .and(warp::post())
        .and(warp::body::json())
        .and(warp::any().map(move || handler.clone()))
        .and_then(handle_ilp_send)
}

#[derive(Debug, Deserialize)]
struct SendRequestBody {
    destination: String,
    amount: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

async fn handle_ilp_send(
    body: SendRequestBody,
    handler: Arc<OutboundHandler>,
) -> Result<impl warp::Reply, Infallible> {
    let request = SendRequest {
        destination: body.destination,
        amount: body.amount,
        data: body.data.unwrap_or_default(),
        timeout_ms: body.timeout_ms,
    };

    match handler.send(request).await {
        Ok(SendOutcome::Fulfilled { fulfillment, data }) => Ok(warp::reply::with_status(
            warp::reply::json(&SendResponse {
                accepted: true,
                fulfilled: true,
                fulfillment: Some(base64::encode(&fulfillment)),
                code: None,
                message: None,
                data: non_empty_base64(&data),
            }),
            StatusCode::OK,
        )),
        Ok(SendOutcome::Rejected { code, message, data }) => Ok(warp::reply::with_status(
            warp::reply::json(&SendResponse {
                accepted: false,
                fulfilled: false,
                fulfillment: None,
                code: Some(code),
                message: Some(message),
                data: non_empty_base64(&data),
            }),
            StatusCode::OK,
        )),
        Err(SendError::Validation(message)) => Ok(bad_request(message)),
        Err(SendError::NotConnected) => Ok(warp::reply::with_status(
            warp::reply::json(&ErrorBody {
                error: "no BTP session is connected".to_string(),
            }),
            StatusCode::SERVICE_UNAVAILABLE,
        )),
        Err(SendError::Timeout) => Ok(warp::reply::with_status(
            warp::reply::json(&ErrorBody {
                error: "timed out waiting for peer response".to_string(),
            }),
            StatusCode::REQUEST_TIMEOUT,
        )),
        Err(SendError::Internal(message)) => Ok(warp::reply::with_status(
            warp::reply::json(&ErrorBody { error: message }),
            StatusCode::INTERNAL_SERVER_ERROR,
        )),
    }
}

fn non_empty_base64(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        None
    } else {
        Some(base64::encode(data))
    }
}

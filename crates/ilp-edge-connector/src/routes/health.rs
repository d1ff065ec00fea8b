use std::sync::Arc;

use ilp_edge_btp::PeerSession;
use serde::Serialize;
use warp::Filter;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthState {
    pub status: &'static str,
    pub node_id: String,
    pub active_sessions: u32,
    pub btp_connected: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ReadyState {
    pub ready: bool,
}

pub fn health_filter(
    node_id: String,
    session: Arc<PeerSession>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("health").and(warp::get()).map(move || {
        let connected = session.is_connected();
        warp::reply::json(&HealthState {
            status: "ok",
            node_id: node_id.clone(),
            active_sessions: if connected { 1 } else { 0 },
            btp_connected: connected,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    })
}

/// `/ready` reports process readiness, independent of whether the BTP peer
/// happens to be connected right now — that distinction belongs to
/// `/health`'s `btpConnected` field.
pub fn ready_filter() -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("ready")
        .and(warp::get())
        .map(|| warp::reply::json(&ReadyState { ready: true }))
}

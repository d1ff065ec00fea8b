//! The thin warp HTTP surface (spec §6): `/health`, `/ready`, `/ilp/packets`,
//! `/ilp/send`. None of this is the hard core — it exists so the runtime is
//! reachable from outside the bilateral wire protocol.
//!
//! Grounded on `interledger-api::routes::accounts::accounts_api`'s
//! filter-combinator style: small `warp::path!` filters composed with
//! `and_then` handlers returning `Result<impl Reply, Rejection>`, wrapped in
//! `warp::log`.

mod health;
mod ilp;

pub use health::{HealthState, ReadyState};
pub use ilp::{ilp_packets_filter, ilp_send_filter};

use std::sync::Arc;

use ilp_edge_btp::PeerSession;
use warp::Filter;

use crate::inbound::InboundHandler;
use crate::outbound::OutboundHandler;

/// Assembles the full `/health`, `/ready`, `/ilp/packets`, `/ilp/send`
/// filter tree, logged at debug level per request (supplemented feature 4).
pub fn api(
    node_id: String,
    session: Arc<PeerSession>,
    inbound: Arc<InboundHandler>,
    outbound: Arc<OutboundHandler>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let health = health::health_filter(node_id.clone(), session.clone());
    let ready = health::ready_filter();
    let packets = ilp_packets_filter(inbound);
    let send = ilp_send_filter(outbound);

    health
        .or(ready)
        .or(packets)
        .or(send)
        .with(warp::log("ilp_edge_connector::http"))
}

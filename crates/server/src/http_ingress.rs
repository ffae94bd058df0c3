//! HTTP ingress for clients without a persistent channel.
//!
//! The browser extension cannot hold a socket open, so it POSTs its signals
//! here. Both routes are thin relays: they broadcast the payload to every
//! connected observer and answer success immediately. Neither creates a
//! session record — the receiving dashboard treats the broadcast as the run
//! signal. Bodies come from the operator's own extension and are not
//! schema-validated beyond JSON parsing.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use applywatch_protocol::ServerMessage;

use crate::state::SessionRegistry;

#[derive(Debug, Deserialize)]
pub struct StartAgentRequest {
    pub job_url: String,
}

#[derive(Debug, Serialize)]
pub struct IngressReply {
    pub success: bool,
    pub message: String,
}

/// HTTP POST handler for `/start-agent`.
pub async fn start_agent_handler(
    State(state): State<Arc<SessionRegistry>>,
    Json(req): Json<StartAgentRequest>,
) -> Json<IngressReply> {
    info!(
        component = "http_ingress",
        event = "http.start_agent",
        job_url = %req.job_url,
        "Start signal relayed"
    );
    state.broadcast(ServerMessage::StartAgent {
        job_url: req.job_url,
    });
    Json(IngressReply {
        success: true,
        message: "Agent start signal relayed".to_string(),
    })
}

/// HTTP POST handler for `/progress`. The payload is relayed verbatim.
pub async fn progress_handler(
    State(state): State<Arc<SessionRegistry>>,
    Json(payload): Json<Value>,
) -> Json<IngressReply> {
    info!(
        component = "http_ingress",
        event = "http.progress",
        "Progress update relayed"
    );
    state.broadcast(ServerMessage::ProgressUpdate { payload });
    Json(IngressReply {
        success: true,
        message: "Progress update relayed".to_string(),
    })
}

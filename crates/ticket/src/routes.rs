//! The `/ticketGeneration` proxy: schema in, mechanical transform, one
//! load-balanced upstream attempt, schema out.

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use hotline_protocol::Source;

use crate::error::TicketError;
use crate::lb::LoadBalancer;

#[derive(Clone)]
pub struct TicketState {
    pub lb: Arc<LoadBalancer>,
    pub client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
pub struct ConversationTurn {
    pub source: Source,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct TicketRequest {
    pub unique_key: String,
    pub conversation: Vec<ConversationTurn>,
}

/// The structured ticket; exactly these four fields reach the caller.
#[derive(Debug, Serialize, Deserialize)]
pub struct TicketResponse {
    pub ticket_type: String,
    pub ticket_zone: String,
    pub ticket_title: String,
    pub ticket_content: String,
}

/// `{unique_key: [{source: text}, ...]}`, the summarizer's expected shape.
pub fn upstream_body(request: &TicketRequest) -> serde_json::Value {
    let turns: Vec<serde_json::Value> = request
        .conversation
        .iter()
        .map(|turn| serde_json::json!({ turn.source.to_string(): turn.text }))
        .collect();
    serde_json::json!({ request.unique_key.clone(): turns })
}

pub async fn ticket_generation(
    State(state): State<TicketState>,
    Json(request): Json<TicketRequest>,
) -> Result<Json<TicketResponse>, TicketError> {
    info!(
        unique_key = %request.unique_key,
        turns = request.conversation.len(),
        "ticket request received"
    );

    let body = upstream_body(&request);
    let (node_idx, url) = state.lb.next();

    let started = Instant::now();
    let response = match state.client.post(&url).json(&body).send().await {
        Ok(response) => response,
        Err(e) => {
            state.lb.mark_unhealthy(node_idx);
            warn!(upstream = %url, error = %e, "upstream request failed");
            return Err(e.into());
        }
    };

    let status = response.status();
    if !status.is_success() {
        state.lb.mark_unhealthy(node_idx);
        warn!(upstream = %url, %status, "upstream returned an error status");
        return Err(TicketError::UpstreamHttp(status.as_u16()));
    }
    state.lb.mark_healthy(node_idx);

    let ticket: TicketResponse = response.json().await.map_err(|e| {
        warn!(upstream = %url, error = %e, "upstream response failed validation");
        TicketError::UpstreamInvalid(e.to_string())
    })?;

    info!(
        upstream = %url,
        unique_key = %request.unique_key,
        elapsed_ms = started.elapsed().as_millis() as u64,
        ticket_type = %ticket.ticket_type,
        zone = %ticket.ticket_zone,
        title = %ticket.ticket_title,
        "ticket generated"
    );
    Ok(Json(ticket))
}

pub async fn health(State(state): State<TicketState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "load_balancer": state.lb.stats(),
        "ts": hotline_protocol::iso_now(),
    }))
}

pub async fn lb_stats(State(state): State<TicketState>) -> Json<crate::lb::LbStats> {
    Json(state.lb.stats())
}

use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub sessions: usize,
    pub connections: u64,
    pub max_connections: u64,
    pub limitations: usize,
}

#[derive(Serialize)]
pub struct SessionStatus {
    pub id: String,
    pub principal: Option<String>,
    pub state: String,
    pub version: Option<String>,
    pub subscriptions: usize,
    pub transactions: usize,
    pub pending_acks: usize,
}

#[derive(Serialize)]
pub struct DestinationStatus {
    pub destination: String,
    pub subscribers: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        sessions: state.relay.sessions().len(),
        connections: state.connections.active_count(),
        max_connections: state.connections.max(),
        limitations: state.relay.security().len(),
    })
}

pub async fn get_sessions(State(state): State<AppState>) -> Json<Vec<SessionStatus>> {
    let mut sessions = Vec::new();
    for id in state.relay.sessions().session_ids() {
        let Some(connection) = state.relay.connection(&id) else {
            sessions.push(SessionStatus {
                id: id.to_string(),
                principal: None,
                state: "awaiting-connect".to_string(),
                version: None,
                subscriptions: 0,
                transactions: 0,
                pending_acks: 0,
            });
            continue;
        };
        sessions.push(SessionStatus {
            id: id.to_string(),
            principal: connection.principal().map(|p| p.name().to_string()),
            state: format!("{:?}", connection.state()).to_lowercase(),
            version: connection.version().map(|v| v.to_string()),
            subscriptions: connection.subscription_count(),
            transactions: connection.transaction_count(),
            pending_acks: connection.pending_ack_count(),
        });
    }
    sessions.sort_by(|a, b| a.id.cmp(&b.id));
    Json(sessions)
}

pub async fn get_destinations(State(state): State<AppState>) -> Json<Vec<DestinationStatus>> {
    let events = state.relay.events();
    let destinations = events
        .active_destinations()
        .into_iter()
        .map(|destination| DestinationStatus {
            subscribers: events.subscriber_count(&destination),
            destination,
        })
        .collect();
    Json(destinations)
}

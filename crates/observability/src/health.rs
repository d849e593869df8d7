//! Health-Check-Endpunkt fuer das Relay
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Auslastung

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::RelayMetrics;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Relay laeuft, nimmt aber keine neuen Peers mehr an
    Degraded,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub connected_peers: i64,
    pub active_rooms: i64,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    metriken: RelayMetrics,
    max_peers: usize,
}

impl HealthState {
    pub fn neu(metriken: RelayMetrics, max_peers: usize) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            metriken,
            max_peers,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Erstellt die aktuelle Antwort
    pub fn antwort(&self) -> HealthResponse {
        let connected_peers = self.metriken.connected_peers.get();
        let voll = connected_peers >= 0 && connected_peers as usize >= self.max_peers;
        HealthResponse {
            status: if voll {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            connected_peers,
            active_rooms: self.metriken.active_rooms.get(),
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Relay-Status zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    // 200 auch bei degraded (Probe soll nicht failen)
    (StatusCode::OK, Json(state.antwort()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frischer_zustand_ist_healthy() {
        let state = HealthState::neu(RelayMetrics::neu().unwrap(), 10);
        let antwort = state.antwort();
        assert_eq!(antwort.status, HealthStatus::Healthy);
        assert_eq!(antwort.connected_peers, 0);
        assert!(antwort.uptime_seconds < 5);
    }

    #[test]
    fn volles_relay_ist_degraded() {
        let metriken = RelayMetrics::neu().unwrap();
        let state = HealthState::neu(metriken.clone(), 2);
        metriken.connected_peers.set(2);
        metriken.active_rooms.set(1);

        let antwort = state.antwort();
        assert_eq!(antwort.status, HealthStatus::Degraded);
        assert_eq!(antwort.active_rooms, 1);
    }

    #[test]
    fn health_response_serialisierung() {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            version: "0.1.0".to_string(),
            uptime_seconds: 3600,
            connected_peers: 4,
            active_rooms: 2,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"uptime_seconds\":3600"));
        assert!(json.contains("\"connected_peers\":4"));
    }
}

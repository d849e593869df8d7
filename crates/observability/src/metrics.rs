//! Prometheus-kompatible Metriken fuer das Relay
//!
//! Registrierte Metriken:
//! - `hushlink_connected_peers` – Gauge: Aktuell verbundene Peers
//! - `hushlink_active_rooms` – Gauge: Raeume mit mindestens einem Mitglied
//! - `hushlink_room_joins_total` – Counter: Raum-Beitritte
//! - `hushlink_envelopes_forwarded_total` – Counter: Zugestellte Envelopes
//! - `hushlink_envelopes_dropped_total` – Counter: Verworfene Envelopes
//!   (Ziel unbekannt oder Send-Queue voll)
//! - `hushlink_connections_rejected_total` – Counter: Abgelehnte Verbindungen

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Relay-Metriken
///
/// Clone teilt Registry und Zaehler.
#[derive(Clone)]
pub struct RelayMetrics {
    pub registry: Arc<Registry>,

    pub connected_peers: IntGauge,
    pub active_rooms: IntGauge,
    pub room_joins_total: IntCounter,
    pub envelopes_forwarded_total: IntCounter,
    pub envelopes_dropped_total: IntCounter,
    pub connections_rejected_total: IntCounter,
}

impl RelayMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connected_peers = IntGauge::with_opts(Opts::new(
            "hushlink_connected_peers",
            "Anzahl aktuell verbundener Peers",
        ))?;
        registry.register(Box::new(connected_peers.clone()))?;

        let active_rooms = IntGauge::with_opts(Opts::new(
            "hushlink_active_rooms",
            "Anzahl nicht-leerer Raeume",
        ))?;
        registry.register(Box::new(active_rooms.clone()))?;

        let room_joins_total = IntCounter::with_opts(Opts::new(
            "hushlink_room_joins_total",
            "Gesamtanzahl Raum-Beitritte",
        ))?;
        registry.register(Box::new(room_joins_total.clone()))?;

        let envelopes_forwarded_total = IntCounter::with_opts(Opts::new(
            "hushlink_envelopes_forwarded_total",
            "Gesamtanzahl zugestellter Envelopes",
        ))?;
        registry.register(Box::new(envelopes_forwarded_total.clone()))?;

        let envelopes_dropped_total = IntCounter::with_opts(Opts::new(
            "hushlink_envelopes_dropped_total",
            "Gesamtanzahl verworfener Envelopes",
        ))?;
        registry.register(Box::new(envelopes_dropped_total.clone()))?;

        let connections_rejected_total = IntCounter::with_opts(Opts::new(
            "hushlink_connections_rejected_total",
            "Abgelehnte Verbindungen (Relay voll)",
        ))?;
        registry.register(Box::new(connections_rejected_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_peers,
            active_rooms,
            room_joins_total,
            envelopes_forwarded_total,
            envelopes_dropped_total,
            connections_rejected_total,
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl std::fmt::Debug for RelayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayMetrics")
            .field("connected_peers", &self.connected_peers.get())
            .field("active_rooms", &self.active_rooms.get())
            .finish_non_exhaustive()
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: RelayMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<RelayMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = RelayMetrics::neu().unwrap();
        assert_eq!(metriken.registry.gather().len(), 6);
    }

    #[test]
    fn gauges_und_counter() {
        let metriken = RelayMetrics::neu().unwrap();
        metriken.connected_peers.inc();
        metriken.connected_peers.inc();
        metriken.connected_peers.dec();
        metriken.envelopes_dropped_total.inc_by(3);

        assert_eq!(metriken.connected_peers.get(), 1);
        assert_eq!(metriken.envelopes_dropped_total.get(), 3);
    }

    #[test]
    fn klon_teilt_zaehler() {
        let a = RelayMetrics::neu().unwrap();
        let b = a.clone();
        b.room_joins_total.inc();
        assert_eq!(a.room_joins_total.get(), 1);
    }

    #[test]
    fn export_prometheus_format() {
        let metriken = RelayMetrics::neu().unwrap();
        metriken.active_rooms.set(2);

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("hushlink_active_rooms 2"));
        assert!(output.contains("hushlink_envelopes_forwarded_total 0"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}

//! Laufzeit-Konfiguration des Relays

use hushlink_protocol::wire::DEFAULT_MAX_FRAME_SIZE;
use std::time::Duration;

/// Groesse der Send-Queue pro Peer
pub const STANDARD_SEND_QUEUE_GROESSE: usize = 64;

/// Einstellungen fuer Hub, Verbindungen und Listener
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximale Anzahl gleichzeitig verbundener Peers
    pub max_peers: usize,
    pub max_frame_size: usize,
    pub send_queue_size: usize,
    /// Abstand zwischen Keepalive-Pings
    pub keepalive: Duration,
    /// Verbindungen ohne eingehenden Frame werden danach getrennt
    pub idle_timeout: Duration,
    /// Verbleibende Raum-Mitglieder ueber `peer-left` informieren
    pub notify_departure: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_peers: 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            send_queue_size: STANDARD_SEND_QUEUE_GROESSE,
            keepalive: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            notify_departure: false,
        }
    }
}

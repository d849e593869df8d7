//! Einstellungen der Peer-Seite

use hushlink_protocol::wire::DEFAULT_MAX_FRAME_SIZE;
use std::time::Duration;

/// Konfiguration fuer Negotiator und Relay-Client
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sitzungen die bis dahin nicht aufgebaut sind werden beendet
    pub negotiation_timeout: Duration,
    /// Abstand der Zeitlimit-Pruefung
    pub timeout_check_interval: Duration,
    /// Kapazitaet der Ereignis-Queue zur Anwendung
    pub event_queue_size: usize,
    /// Kapazitaet der ausgehenden Relay-Queue
    pub relay_queue_size: usize,
    pub max_frame_size: usize,
    /// Zeitlimit fuer TCP-Verbindung und Welcome-Frame
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_secs(30),
            timeout_check_interval: Duration::from_secs(1),
            event_queue_size: 64,
            relay_queue_size: 64,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

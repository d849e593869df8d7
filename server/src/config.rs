//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass das Relay ohne Konfigurationsdatei
//! lauffaehig ist.

use hushlink_observability::logging::{log_format_gueltig, log_level_gueltig};
use hushlink_protocol::wire::DEFAULT_MAX_FRAME_SIZE;
use hushlink_signaling::RelayConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Relay-Verhalten (Frames, Queues, Keepalive)
    pub relay: RelayEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Relays (nur fuer Logs)
    pub name: String,
    /// Maximale Anzahl gleichzeitig verbundener Peers
    pub max_peers: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Hushlink Relay".into(),
            max_peers: 1024,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer Relay und Observability
    pub bind_adresse: String,
    /// Port des TCP-Relays
    pub tcp_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            tcp_port: 9987,
        }
    }
}

/// Relay-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayEinstellungen {
    /// Maximale Frame-Groesse in Bytes
    pub max_frame_size: usize,
    /// Ausgehende Queue pro Peer (volle Queue verwirft Frames)
    pub send_queue_size: usize,
    /// Abstand der Keepalive-Pings in Sekunden
    pub keepalive_secs: u64,
    /// Stille Verbindungen werden nach dieser Zeit getrennt
    pub idle_timeout_secs: u64,
    /// `peer-left` an verbleibende Raum-Mitglieder senden
    pub notify_departure: bool,
}

impl Default for RelayEinstellungen {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            send_queue_size: 64,
            keepalive_secs: 30,
            idle_timeout_secs: 90,
            notify_departure: false,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str::<Self>(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        config.validieren()?;
        Ok(config)
    }

    /// Prueft Werte die serde allein nicht abfangen kann
    pub fn validieren(&self) -> anyhow::Result<()> {
        if self.server.max_peers == 0 {
            anyhow::bail!("server.max_peers muss groesser als 0 sein");
        }
        if self.relay.send_queue_size == 0 {
            anyhow::bail!("relay.send_queue_size muss groesser als 0 sein");
        }
        if self.relay.max_frame_size < 1024 {
            anyhow::bail!(
                "relay.max_frame_size zu klein: {} (Minimum 1024)",
                self.relay.max_frame_size
            );
        }
        if self.relay.keepalive_secs == 0 {
            anyhow::bail!("relay.keepalive_secs muss groesser als 0 sein");
        }
        if self.relay.idle_timeout_secs <= self.relay.keepalive_secs {
            anyhow::bail!(
                "relay.idle_timeout_secs ({}) muss groesser als keepalive_secs ({}) sein",
                self.relay.idle_timeout_secs,
                self.relay.keepalive_secs
            );
        }
        if !log_level_gueltig(&self.logging.level) {
            anyhow::bail!("Unbekanntes Log-Level: {}", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            anyhow::bail!("Unbekanntes Log-Format: {}", self.logging.format);
        }
        Ok(())
    }

    /// Relay-Einstellungen fuer Hub und Verbindungen
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            max_peers: self.server.max_peers,
            max_frame_size: self.relay.max_frame_size,
            send_queue_size: self.relay.send_queue_size,
            keepalive: Duration::from_secs(self.relay.keepalive_secs),
            idle_timeout: Duration::from_secs(self.relay.idle_timeout_secs),
            notify_departure: self.relay.notify_departure,
        }
    }

    /// Gibt die vollstaendige Bind-Adresse fuer TCP zurueck
    pub fn tcp_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.tcp_port)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.observability.port)
    }
}

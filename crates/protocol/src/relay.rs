//! Relay-Protokoll (TCP)
//!
//! Definiert alle Frames die zwischen Peer und Relay ausgetauscht werden.
//!
//! ## Design
//! - JSON-Serialisierung via serde, getaggt ueber das Feld `"type"`
//! - Das Relay kennt nur Raeume, Peers und Envelopes; Signal-Inhalte und
//!   Schluessel bleiben fuer das Relay undurchsichtig
//! - `ping`/`pong` werden in beide Richtungen verwendet

use hushlink_core::PeerId;
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer `error`-Frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InternalError,
    InvalidRequest,
    InvalidRoom,
    NotJoined,
    ServerFull,
}

// ---------------------------------------------------------------------------
// Relay-Frame
// ---------------------------------------------------------------------------

/// Ein Frame auf der Relay-Verbindung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayFrame {
    // Client -> Relay
    /// Raum betreten (verlaesst einen vorherigen Raum implizit)
    Join { room_id: String },
    /// Envelope an einen anderen Peer weiterleiten
    Signal { envelope: Envelope },

    // Relay -> Client
    /// Erste Nachricht nach dem Verbindungsaufbau
    Welcome { peer_id: PeerId },
    /// Ein anderer Peer hat den eigenen Raum betreten
    PeerJoined { peer_id: PeerId },
    /// Ein anderer Peer hat den Raum verlassen (nur wenn aktiviert)
    PeerLeft { peer_id: PeerId },
    /// Zugestelltes Envelope, `sender` vom Relay gestempelt
    Deliver { envelope: Envelope },
    Error { code: ErrorCode, message: String },

    // Beide Richtungen
    Ping { timestamp_ms: u64 },
    Pong { timestamp_ms: u64 },
}

impl RelayFrame {
    /// Erstellt einen Join-Frame
    pub fn join(room_id: impl Into<String>) -> Self {
        Self::Join {
            room_id: room_id.into(),
        }
    }

    pub fn signal(envelope: Envelope) -> Self {
        Self::Signal { envelope }
    }

    pub fn deliver(envelope: Envelope) -> Self {
        Self::Deliver { envelope }
    }

    /// Erstellt eine Ping-Nachricht
    pub fn ping(timestamp_ms: u64) -> Self {
        Self::Ping { timestamp_ms }
    }

    /// Erstellt eine Pong-Antwort (spiegelt den Zeitstempel des Pings)
    pub fn pong(timestamp_ms: u64) -> Self {
        Self::Pong { timestamp_ms }
    }

    /// Erstellt eine Fehler-Antwort
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Kurzer Name des Frame-Typs fuer Logs
    pub fn typ_name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Signal { .. } => "signal",
            Self::Welcome { .. } => "welcome",
            Self::PeerJoined { .. } => "peer-joined",
            Self::PeerLeft { .. } => "peer-left",
            Self::Deliver { .. } => "deliver",
            Self::Error { .. } => "error",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
        }
    }

    /// Serialisiert den Frame als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert einen Frame aus JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

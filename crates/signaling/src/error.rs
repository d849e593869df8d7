//! Fehlertypen fuer das Relay

use thiserror::Error;

/// Fehlertyp fuer das Relay
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Verbindung wurde getrennt
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Protokollfehler (ungueltiger Frame, falsche Richtung)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Peer ist nicht (mehr) beim Relay registriert
    #[error("Peer nicht registriert: {0}")]
    NichtRegistriert(String),

    /// Relay hat die maximale Anzahl Peers erreicht
    #[error("Relay ist voll")]
    ServerVoll,

    /// Timeout (Keepalive)
    #[error("Timeout")]
    Timeout,
}

impl SignalingError {
    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }
}

/// Result-Typ fuer das Relay
pub type SignalingResult<T> = Result<T, SignalingError>;

//! Fehlertypen fuer die Peer-Seite

use hushlink_crypto::CryptoError;
use thiserror::Error;

/// Fehler bei Aushandlung, Transport und Relay-Verbindung
///
/// Alle Varianten betreffen ein Envelope, eine Nachricht oder eine Sitzung;
/// der Client laeuft danach weiter.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Unerwarteter Zustandsuebergang oder fehlerhaftes Envelope
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Aufruf der Transport-Capability fehlgeschlagen
    #[error("Transport-Fehler: {0}")]
    Transport(String),

    #[error(transparent)]
    Krypto(#[from] CryptoError),

    #[error("Relay-Fehler: {0}")]
    Relay(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Client-Task laeuft nicht mehr
    #[error("Client beendet")]
    Beendet,
}

impl SessionError {
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

//! Ereignisse an die Anwendung

use hushlink_core::PeerId;
use hushlink_protocol::{ChatContent, ErrorCode};
use tokio::sync::mpsc;

/// Was der Peer-Client der Anwendung meldet
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Ein weiterer Peer ist dem Raum beigetreten
    PeerJoined { peer_id: PeerId },
    /// Direkter Datenkanal steht
    SessionEstablished { peer_id: PeerId },
    /// Oeffentlicher Schluessel des Peers importiert, Senden ist moeglich
    PeerKeyReceived { peer_id: PeerId },
    MessageReceived {
        peer_id: PeerId,
        content: ChatContent,
    },
    /// Eingegangenes Paket konnte nicht geoeffnet werden
    MessageDropped { peer_id: PeerId, reason: String },
    /// Signalisierungs-Envelope wurde verworfen
    SignalRejected { peer_id: PeerId, reason: String },
    TransportFailure { peer_id: PeerId, reason: String },
    NegotiationTimeout { peer_id: PeerId },
    PeerLeft { peer_id: PeerId },
    RelayError { code: ErrorCode, message: String },
    /// Relay-Verbindung beendet, der Client laeuft nicht weiter
    Disconnected { reason: String },
}

/// Reicht ein Ereignis weiter ohne zu blockieren
pub(crate) fn melden(tx: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            tracing::warn!(?event, "Ereignis-Queue der Anwendung voll, Ereignis verworfen");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!("Anwendung hoert nicht mehr zu");
        }
    }
}

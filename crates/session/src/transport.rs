//! Transport-Capability
//!
//! Abstraktion ueber einen direkten Peer-zu-Peer Datenkanal. Der Negotiator
//! kennt nur diese Schnittstelle; die konkrete Umsetzung (WebRTC-Datachannel,
//! In-Memory fuer Tests) wird per [`TransportFactory`] eingesetzt.
//!
//! Asynchrone Ereignisse (lokale Kandidaten, Zustandswechsel, empfangene
//! Daten) meldet der Transport ueber einen [`TransportEventSender`] zurueck.

use async_trait::async_trait;
use hushlink_core::PeerId;
use hushlink_protocol::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::SessionResult;

/// Verbindungszustand eines Transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// Zustaende nach denen der Transport nicht mehr nutzbar ist
    pub fn ist_abbruch(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    /// Lokal gefundener Kandidat, muss zum Gegenueber signalisiert werden
    LocalCandidate(IceCandidate),
    StateChanged(TransportState),
    /// Auf dem Datenkanal empfangene Bytes (ein verschluesseltes Paket)
    DataReceived(Vec<u8>),
}

/// Ereignis eines Transports, gestempelt mit Peer und Sitzungsnummer
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub peer_id: PeerId,
    /// Nummer der Sitzung fuer die der Transport erzeugt wurde
    pub sitzung: u64,
    pub kind: TransportEventKind,
}

/// Rueckkanal vom Transport zum Negotiator
///
/// Stempelt jedes Ereignis mit Peer und Sitzungsnummer, damit Ereignisse
/// eines bereits ersetzten Transports erkannt werden.
#[derive(Debug, Clone)]
pub struct TransportEventSender {
    peer_id: PeerId,
    sitzung: u64,
    tx: mpsc::Sender<TransportEvent>,
}

impl TransportEventSender {
    pub fn neu(peer_id: PeerId, sitzung: u64, tx: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            peer_id,
            sitzung,
            tx,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn sitzung(&self) -> u64 {
        self.sitzung
    }

    /// Meldet ein Ereignis ohne zu blockieren
    ///
    /// Gibt false zurueck wenn die Queue voll oder der Empfaenger weg ist.
    pub fn melden(&self, kind: TransportEventKind) -> bool {
        let event = TransportEvent {
            peer_id: self.peer_id.clone(),
            sitzung: self.sitzung,
            kind,
        };
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    peer_id = %self.peer_id.kurz(),
                    "Transport-Ereignis-Queue voll, Ereignis verworfen"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Direkter Datenkanal zu genau einem Peer
#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_offer(&self) -> SessionResult<SessionDescription>;

    /// Nur nach `set_remote_description` mit einem Offer gueltig
    async fn create_answer(&self) -> SessionResult<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> SessionResult<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> SessionResult<()>;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> SessionResult<()>;

    /// Verschickt Bytes auf dem Datenkanal (nur im Zustand `Connected`)
    async fn send(&self, data: Vec<u8>) -> SessionResult<()>;

    /// Schliesst den Transport, mehrfacher Aufruf ist harmlos
    async fn close(&self);
}

/// Erzeugt Transports fuer neue Sitzungen
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        remote: &PeerId,
        events: TransportEventSender,
    ) -> SessionResult<Arc<dyn Transport>>;
}

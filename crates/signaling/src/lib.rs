//! hushlink-signaling – Relay fuer den Verbindungsaufbau
//!
//! Das Relay bringt zwei Peers zusammen: es fuehrt ein Raum-Verzeichnis und
//! leitet adressierte Envelopes (Offer, Answer, ICE-Kandidaten, oeffentliche
//! Schluessel) weiter. Es speichert keine Nachrichten und sieht nie Klartext.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (RelayServer)
//!     |
//!     v
//! PeerConnection (pro Verbindung ein Task)
//!     |  welcome -> join / signal / ping / pong
//!     |
//!     v
//! RelayHub
//!     +-- Verbindungsregister  (PeerId -> Send-Queue)
//!     +-- Raeume               (RoomId -> Mitglieder)
//!     +-- Weiterleitung        (Envelope -> target, sender gestempelt)
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod tcp;

// Bequeme Re-Exporte
pub use config::RelayConfig;
pub use connection::PeerConnection;
pub use error::{SignalingError, SignalingResult};
pub use hub::{PeerSender, RelayHub};
pub use tcp::RelayServer;

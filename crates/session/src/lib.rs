//! # hushlink-session
//!
//! Peer-Seite von Hushlink: handelt ueber das Relay eine direkte
//! Transport-Sitzung zu einem anderen Peer aus und verschickt darueber
//! Ende-zu-Ende verschluesselte Chat-Nachrichten.
//!
//! ## Module
//! - `transport` - Transport-Capability (Trait, Ereignisse)
//! - `memory` - In-Memory Transport fuer Tests und Demos
//! - `negotiator` - Zustandsmaschine pro entferntem Peer
//! - `client` - Relay-Verbindung, treibt den Negotiator
//! - `events` - Ereignisse an die Anwendung
//! - `config` - Einstellungen
//! - `error` - Fehlertypen
//!
//! ## Ablauf
//! ```text
//! A join ──> Relay ──peer-joined(B)──> A      (nur bestehende Mitglieder)
//! A offer ──────────> Relay ──deliver──> B
//! B answer ─────────> Relay ──deliver──> A
//! A/B candidates <──> Relay
//! Transport connected ──> key-exchange in beide Richtungen
//! Chat-Nachrichten direkt ueber den Transport, hybrid verschluesselt
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod memory;
pub mod negotiator;
pub mod transport;

pub use client::{ClientHandle, PeerClient, RelaySink};
pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use events::ClientEvent;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use negotiator::{Role, SessionInfo, SessionNegotiator, SessionPhase};
pub use transport::{
    Transport, TransportEvent, TransportEventKind, TransportEventSender, TransportFactory,
    TransportState,
};

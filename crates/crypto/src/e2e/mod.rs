//! E2E Verschluesselung (End-to-End)
//!
//! Peer <-> Peer Verschluesselung. Das Relay leitet nur den oeffentlichen
//! Schluessel weiter und sieht nie Klartext.
//!
//! ## Ablauf
//! 1. Jeder Peer erzeugt pro Chat-Sitzung ein asymmetrisches Schluessel-Paar
//! 2. Nach dem Verbindungsaufbau wird der oeffentliche Schluessel per
//!    `key-exchange`-Envelope an den Gegenueber geschickt
//! 3. Jede Nachricht erhaelt einen frischen symmetrischen Schluessel und IV
//! 4. Der symmetrische Schluessel wird mit dem oeffentlichen Schluessel des
//!    Empfaengers eingewickelt und mit dem Chiffrat verschickt

pub mod hybrid;
pub mod key_exchange;

pub use hybrid::HybridCipher;
pub use key_exchange::KeyExchangeManager;

//! Signaling-Envelope
//!
//! Ein Envelope ist die einzige Nachrichtenform die ein Peer ueber das
//! Relay an einen anderen Peer schicken kann. Das Relay liest nur `target`
//! und ueberschreibt `sender`; `kind` und `payload` bleiben fuer das Relay
//! undurchsichtig.

use hushlink_core::PeerId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Typen
// ---------------------------------------------------------------------------

/// Art eines Envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    Offer,
    Answer,
    IceCandidate,
    KeyExchange,
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::KeyExchange => "key-exchange",
        };
        f.write_str(name)
    }
}

/// Adressierte Nachricht zwischen zwei Peers
///
/// `sender` wird vom Relay gestempelt. Was der Client dort eintraegt wird
/// beim Weiterleiten verworfen, das Feld darf daher fehlen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub sender: PeerId,
    pub target: PeerId,
    /// Nutzdaten, auf der Leitung als Base64
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Erstellt ein neues Envelope
    pub fn new(kind: EnvelopeKind, sender: PeerId, target: PeerId, payload: Vec<u8>) -> Self {
        Self {
            kind,
            sender,
            target,
            payload,
        }
    }

    /// Gibt eine Kopie mit ueberschriebenem Absender zurueck
    pub fn mit_absender(mut self, sender: PeerId) -> Self {
        self.sender = sender;
        self
    }
}

// ---------------------------------------------------------------------------
// EnvelopeSink
// ---------------------------------------------------------------------------

/// Abgehender Kanal fuer Envelopes (Richtung Relay)
///
/// Wird vom Key-Exchange-Manager und vom Session-Negotiator benutzt, damit
/// beide ohne Kenntnis der Relay-Verbindung Envelopes verschicken koennen.
pub trait EnvelopeSink: Send + Sync {
    /// Reiht ein Envelope zum Versand ein
    ///
    /// Gibt `false` zurueck wenn die Verbindung geschlossen oder die
    /// Warteschlange voll ist.
    fn senden(&self, envelope: Envelope) -> bool;
}

// ---------------------------------------------------------------------------
// Base64-Serialisierung fuer Byte-Payloads
// ---------------------------------------------------------------------------

pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

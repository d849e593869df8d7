//! hushlink-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert alle Nachrichtentypen die zwischen Peer und
//! Relay ausgetauscht werden, sowie das Klartext-Format der Chat-Inhalte
//! die zwischen zwei Peers verschluesselt uebertragen werden.

pub mod envelope;
pub mod message;
pub mod relay;
pub mod signal;
pub mod wire;

pub use envelope::{Envelope, EnvelopeKind, EnvelopeSink};
pub use message::{ChatContent, ContentType};
pub use relay::{ErrorCode, RelayFrame};
pub use signal::{IceCandidate, SdpType, SessionDescription};
pub use wire::{FrameCodec, TolerantFrameCodec, UngueltigerFrame};

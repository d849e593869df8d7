//! # hushlink-crypto
//!
//! Hybride Ende-zu-Ende Verschluesselung fuer Hushlink.
//!
//! ## Module
//! - `capability` - Schnittstelle zu den kryptografischen Primitiven
//! - `standard` - X25519 / HKDF-SHA256 / AES-256-GCM Implementierung
//! - `e2e` - Schluesselaustausch und Hybrid-Cipher
//! - `types` - Gemeinsame Typen (KeyPair, Iv, EncryptedPackage, etc.)
//! - `error` - Fehlertypen

pub mod capability;
pub mod e2e;
pub mod error;
pub mod standard;
pub mod types;

// Bequeme Re-Exports
pub use capability::CryptoCapability;
pub use e2e::{HybridCipher, KeyExchangeManager};
pub use error::{CryptoError, CryptoResult};
pub use standard::{hkdf_derive, X25519AesGcm};
pub use types::{EncryptedPackage, Iv, KeyPair, PublicKey, SecretBytes, SymmetricKey};

//! Hybride Nachrichten-Verschluesselung
//!
//! `seal`: frischer symmetrischer Schluessel + frischer IV pro Nachricht,
//! AEAD-Verschluesselung, Einwickeln des Schluessels mit dem aktuellen
//! oeffentlichen Schluessel des Empfaengers.
//!
//! `open`: Entpacken mit dem lokalen privaten Schluessel, AEAD-Entschluesselung.
//! Liefert entweder den vollstaendigen Klartext oder einen Fehler.

use hushlink_core::PeerId;
use hushlink_protocol::ChatContent;
use std::sync::Arc;

use crate::capability::CryptoCapability;
use crate::e2e::key_exchange::KeyExchangeManager;
use crate::error::{CryptoError, CryptoResult};
use crate::types::EncryptedPackage;

/// Verschluesselt und entschluesselt Nachrichten zwischen zwei Peers
#[derive(Clone)]
pub struct HybridCipher {
    krypto: Arc<dyn CryptoCapability>,
    schluessel: Arc<KeyExchangeManager>,
}

impl HybridCipher {
    pub fn new(krypto: Arc<dyn CryptoCapability>, schluessel: Arc<KeyExchangeManager>) -> Self {
        Self { krypto, schluessel }
    }

    /// Verschluesselt `plaintext` fuer `peer`
    ///
    /// Der Schluessel des Empfaengers wird bei jedem Aufruf neu
    /// nachgeschlagen. Fehlt er, wird keine Krypto-Operation ausgefuehrt.
    pub fn seal(&self, peer: &PeerId, plaintext: &[u8]) -> CryptoResult<EncryptedPackage> {
        let empfaenger =
            self.schluessel
                .lookup(peer)
                .ok_or_else(|| CryptoError::KeinPeerSchluessel {
                    peer_id: peer.to_string(),
                })?;

        let key = self.krypto.generate_symmetric_key()?;
        let iv = self.krypto.generate_iv()?;
        let ciphertext = self.krypto.aead_encrypt(&key, &iv, plaintext)?;
        let wrapped_key = self.krypto.asymmetric_wrap(&empfaenger, key.raw())?;

        Ok(EncryptedPackage {
            wrapped_key,
            iv,
            ciphertext,
        })
    }

    /// Entschluesselt ein an die lokale Seite gerichtetes Paket
    pub fn open(&self, package: &EncryptedPackage) -> CryptoResult<Vec<u8>> {
        let paar = self
            .schluessel
            .local_key_pair()
            .ok_or(CryptoError::KeinLokalesSchluesselpaar)?;

        let raw = self
            .krypto
            .asymmetric_unwrap(&paar, &package.wrapped_key)
            .map_err(als_entpacken)?;
        let key = self
            .krypto
            .import_symmetric_key(raw.as_bytes())
            .map_err(als_entpacken)?;

        self.krypto
            .aead_decrypt(&key, &package.iv, &package.ciphertext)
            .map_err(|e| match e {
                e @ CryptoError::Entschluesselung(_) => e,
                andere => CryptoError::Entschluesselung(andere.to_string()),
            })
    }

    /// Kodiert einen Chat-Inhalt und verschluesselt ihn fuer `peer`
    pub fn seal_content(&self, peer: &PeerId, content: &ChatContent) -> CryptoResult<EncryptedPackage> {
        let bytes = content
            .to_bytes()
            .map_err(|e| CryptoError::Protokoll(e.to_string()))?;
        self.seal(peer, &bytes)
    }

    /// Entschluesselt ein Paket und dekodiert den Chat-Inhalt
    pub fn open_content(&self, package: &EncryptedPackage) -> CryptoResult<ChatContent> {
        let klartext = self.open(package)?;
        ChatContent::from_bytes(&klartext)
            .map_err(|e| CryptoError::Protokoll(format!("Kein gueltiger Chat-Inhalt: {e}")))
    }
}

fn als_entpacken(e: CryptoError) -> CryptoError {
    match e {
        e @ CryptoError::SchluesselEntpacken(_) => e,
        andere => CryptoError::SchluesselEntpacken(andere.to_string()),
    }
}

impl std::fmt::Debug for HybridCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridCipher")
            .field("schluessel", &self.schluessel)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

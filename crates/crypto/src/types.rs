//! Gemeinsame Typen fuer das Kryptografie-Subsystem

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};

/// Laenge eines AEAD-IV in Bytes (96 Bit fuer AES-GCM)
pub const IV_LAENGE: usize = 12;

/// Sicherer Schluessel-Container (wird beim Drop genullt)
#[derive(Clone)]
pub struct SecretBytes(Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED] {} bytes)", self.0.len())
    }
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Oeffentlicher Schluessel eines Peers (bereits validiert)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Uebernimmt die Bytes ohne Pruefung
    ///
    /// Nur fuer Capability-Implementierungen gedacht; Peers importieren
    /// Schluessel ueber `CryptoCapability::import_public_key`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Asymmetrisches Schluessel-Paar der lokalen Seite
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: SecretBytes,
    pub public_key: PublicKey,
}

/// Symmetrischer Nachrichten-Schluessel (einmal pro Nachricht)
#[derive(Debug, Clone)]
pub struct SymmetricKey(SecretBytes);

impl SymmetricKey {
    pub fn new(bytes: SecretBytes) -> Self {
        Self(bytes)
    }

    /// Rohe Schluessel-Bytes (werden asymmetrisch eingewickelt)
    pub fn raw(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Initialisierungsvektor fuer die AEAD-Verschluesselung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iv(pub [u8; IV_LAENGE]);

impl Iv {
    pub fn as_bytes(&self) -> &[u8; IV_LAENGE] {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// EncryptedPackage
// ---------------------------------------------------------------------------

/// Hybrid verschluesselte Nachricht
///
/// ```text
/// [wrapped_len u16 BE] [wrapped_key] [iv(12)] [ciphertext + auth_tag(16)]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPackage {
    /// Mit dem oeffentlichen Schluessel des Empfaengers eingewickelter
    /// symmetrischer Schluessel
    pub wrapped_key: Vec<u8>,
    pub iv: Iv,
    /// Verschluesselter Inhalt inkl. Auth-Tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedPackage {
    /// Serialisiert das Paket in das Binaerformat
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        let wrapped_len = u16::try_from(self.wrapped_key.len()).map_err(|_| {
            CryptoError::Protokoll(format!(
                "Eingewickelter Schluessel zu lang: {} Bytes",
                self.wrapped_key.len()
            ))
        })?;

        let mut out =
            Vec::with_capacity(2 + self.wrapped_key.len() + IV_LAENGE + self.ciphertext.len());
        out.extend_from_slice(&wrapped_len.to_be_bytes());
        out.extend_from_slice(&self.wrapped_key);
        out.extend_from_slice(&self.iv.0);
        out.extend_from_slice(&self.ciphertext);
        Ok(out)
    }

    /// Liest ein Paket aus dem Binaerformat
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let zu_kurz = || CryptoError::Protokoll(format!("Paket zu kurz: {} Bytes", bytes.len()));

        if bytes.len() < 2 {
            return Err(zu_kurz());
        }
        let wrapped_len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        let iv_start = 2 + wrapped_len;
        let ct_start = iv_start + IV_LAENGE;
        if bytes.len() < ct_start {
            return Err(zu_kurz());
        }

        let mut iv = [0u8; IV_LAENGE];
        iv.copy_from_slice(&bytes[iv_start..ct_start]);

        Ok(Self {
            wrapped_key: bytes[2..iv_start].to_vec(),
            iv: Iv(iv),
            ciphertext: bytes[ct_start..].to_vec(),
        })
    }
}

//! Standard-Implementierung der Kryptografie-Capability
//!
//! - Asymmetrisch: X25519 (statisches Schluessel-Paar pro Chat-Sitzung)
//! - Symmetrisch: AES-256-GCM mit 96-Bit-IV
//! - Einwickeln: ECIES-aehnlich
//!   1. Ephemeres X25519-Schluessel-Paar generieren
//!   2. DH mit Empfaenger-Public-Key
//!   3. HKDF-SHA256 -> Wrapping Key
//!   4. AES-256-GCM verschluesseln
//!
//! Eingewickelter Schluessel:
//! ```text
//! [ephemeral_public(32)] [nonce(12)] [ciphertext + auth_tag(16)]
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};

use crate::capability::CryptoCapability;
use crate::error::{CryptoError, CryptoResult};
use crate::types::{Iv, KeyPair, PublicKey, SecretBytes, SymmetricKey, IV_LAENGE};

/// Laenge eines X25519-Schluessels in Bytes
pub const X25519_LAENGE: usize = 32;

/// Laenge eines AES-256-Schluessels in Bytes
pub const AES_SCHLUESSEL_LAENGE: usize = 32;

const TAG_LAENGE: usize = 16;
const WRAP_INFO: &[u8] = b"hushlink-key-wrap-v1";

/// HKDF-basierte Key Derivation
pub fn hkdf_derive(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> CryptoResult<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

fn als_array(bytes: &[u8]) -> Option<[u8; X25519_LAENGE]> {
    <[u8; X25519_LAENGE]>::try_from(bytes).ok()
}

/// Wrapping Key aus DH-Ergebnis, gebunden an beide oeffentlichen Schluessel
fn wrapping_key(
    dh: &[u8],
    ephemeral_public: &[u8; X25519_LAENGE],
    recipient_public: &[u8; X25519_LAENGE],
) -> CryptoResult<Vec<u8>> {
    let mut salt = [0u8; 2 * X25519_LAENGE];
    salt[..X25519_LAENGE].copy_from_slice(ephemeral_public);
    salt[X25519_LAENGE..].copy_from_slice(recipient_public);
    hkdf_derive(dh, &salt, WRAP_INFO, AES_SCHLUESSEL_LAENGE)
}

/// X25519 + HKDF-SHA256 + AES-256-GCM
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519AesGcm;

impl X25519AesGcm {
    pub fn new() -> Self {
        Self
    }
}

impl CryptoCapability for X25519AesGcm {
    fn generate_asymmetric_key_pair(&self) -> CryptoResult<KeyPair> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Ok(KeyPair {
            private_key: SecretBytes::new(secret.to_bytes().to_vec()),
            public_key: PublicKey::new(public.as_bytes().to_vec()),
        })
    }

    fn export_public_key(&self, key: &PublicKey) -> CryptoResult<Vec<u8>> {
        Ok(key.as_bytes().to_vec())
    }

    fn import_public_key(&self, bytes: &[u8]) -> CryptoResult<PublicKey> {
        let arr = als_array(bytes).ok_or_else(|| {
            CryptoError::SchluesselImport(format!(
                "X25519-Schluessel muss {X25519_LAENGE} Bytes lang sein, erhalten {}",
                bytes.len()
            ))
        })?;
        if arr.iter().all(|b| *b == 0) {
            return Err(CryptoError::SchluesselImport(
                "Null-Schluessel abgelehnt".to_string(),
            ));
        }
        Ok(PublicKey::new(arr.to_vec()))
    }

    fn generate_symmetric_key(&self) -> CryptoResult<SymmetricKey> {
        let mut key = vec![0u8; AES_SCHLUESSEL_LAENGE];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| CryptoError::SchluesselGenerierung(e.to_string()))?;
        Ok(SymmetricKey::new(SecretBytes::new(key)))
    }

    fn import_symmetric_key(&self, raw: &[u8]) -> CryptoResult<SymmetricKey> {
        if raw.len() != AES_SCHLUESSEL_LAENGE {
            return Err(CryptoError::UngueltigeSchluesselLaenge {
                erwartet: AES_SCHLUESSEL_LAENGE,
                erhalten: raw.len(),
            });
        }
        Ok(SymmetricKey::new(SecretBytes::new(raw.to_vec())))
    }

    fn generate_iv(&self) -> CryptoResult<Iv> {
        let mut iv = [0u8; IV_LAENGE];
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|e| CryptoError::SchluesselGenerierung(e.to_string()))?;
        Ok(Iv(iv))
    }

    fn aead_encrypt(&self, key: &SymmetricKey, iv: &Iv, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.raw())
            .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;
        cipher
            .encrypt(Nonce::from_slice(iv.as_bytes()), plaintext)
            .map_err(|e| CryptoError::Verschluesselung(e.to_string()))
    }

    fn aead_decrypt(
        &self,
        key: &SymmetricKey,
        iv: &Iv,
        ciphertext: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.raw())
            .map_err(|e| CryptoError::Entschluesselung(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(iv.as_bytes()), ciphertext)
            .map_err(|_| {
                CryptoError::Entschluesselung(
                    "Authentifizierung fehlgeschlagen (manipuliert oder falscher Schluessel)"
                        .to_string(),
                )
            })
    }

    fn asymmetric_wrap(&self, recipient: &PublicKey, raw: &[u8]) -> CryptoResult<Vec<u8>> {
        let recipient_bytes = als_array(recipient.as_bytes()).ok_or_else(|| {
            CryptoError::Verschluesselung("Ungueltiger Empfaenger-Schluessel".to_string())
        })?;

        let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);

        let dh_output = ephemeral_secret.diffie_hellman(&X25519PublicKey::from(recipient_bytes));
        if !dh_output.was_contributory() {
            return Err(CryptoError::Verschluesselung(
                "Empfaenger-Schluessel liefert kein gueltiges DH-Ergebnis".to_string(),
            ));
        }

        let key = wrapping_key(
            dh_output.as_bytes(),
            ephemeral_public.as_bytes(),
            &recipient_bytes,
        )?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;

        let mut nonce_bytes = [0u8; IV_LAENGE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), raw)
            .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;

        let mut out = Vec::with_capacity(X25519_LAENGE + IV_LAENGE + ciphertext.len());
        out.extend_from_slice(ephemeral_public.as_bytes());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn asymmetric_unwrap(&self, own: &KeyPair, wrapped: &[u8]) -> CryptoResult<SecretBytes> {
        if wrapped.len() < X25519_LAENGE + IV_LAENGE + TAG_LAENGE {
            return Err(CryptoError::SchluesselEntpacken(format!(
                "Eingewickelter Schluessel zu kurz: {} Bytes",
                wrapped.len()
            )));
        }

        let (ephemeral_bytes, rest) = wrapped.split_at(X25519_LAENGE);
        let (nonce_bytes, ciphertext) = rest.split_at(IV_LAENGE);

        let ungueltig = || CryptoError::SchluesselEntpacken("Ungueltiges Schluessel-Paar".into());
        let private = als_array(own.private_key.as_bytes()).ok_or_else(ungueltig)?;
        let own_public = als_array(own.public_key.as_bytes()).ok_or_else(ungueltig)?;
        let ephemeral_public = als_array(ephemeral_bytes).ok_or_else(ungueltig)?;

        let secret = StaticSecret::from(private);
        let dh_output = secret.diffie_hellman(&X25519PublicKey::from(ephemeral_public));
        if !dh_output.was_contributory() {
            return Err(CryptoError::SchluesselEntpacken(
                "Ephemerer Schluessel liefert kein gueltiges DH-Ergebnis".to_string(),
            ));
        }

        let key = wrapping_key(dh_output.as_bytes(), &ephemeral_public, &own_public)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CryptoError::SchluesselEntpacken(e.to_string()))?;

        let raw = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                CryptoError::SchluesselEntpacken(
                    "Schluessel ist nicht fuer dieses Schluessel-Paar bestimmt".to_string(),
                )
            })?;
        Ok(SecretBytes::new(raw))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hkdf_deterministisch() {
        let a = hkdf_derive(b"ikm", b"salt", b"info", 32).unwrap();
        let b = hkdf_derive(b"ikm", b"salt", b"info", 32).unwrap();
        let c = hkdf_derive(b"ikm", b"salt", b"anders", 32).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn schluessel_paar_export_import() {
        let krypto = X25519AesGcm::new();
        let paar = krypto.generate_asymmetric_key_pair().unwrap();
        assert_eq!(paar.private_key.len(), X25519_LAENGE);

        let exportiert = krypto.export_public_key(&paar.public_key).unwrap();
        let importiert = krypto.import_public_key(&exportiert).unwrap();
        assert_eq!(importiert, paar.public_key);
    }

    #[test]
    fn import_falscher_laenge_abgelehnt() {
        let krypto = X25519AesGcm::new();
        assert!(matches!(
            krypto.import_public_key(&[1u8; 31]),
            Err(CryptoError::SchluesselImport(_))
        ));
        assert!(matches!(
            krypto.import_public_key(&[0u8; 32]),
            Err(CryptoError::SchluesselImport(_))
        ));
    }

    #[test]
    fn wrap_unwrap_round_trip() {
        let krypto = X25519AesGcm::new();
        let paar = krypto.generate_asymmetric_key_pair().unwrap();
        let sym = krypto.generate_symmetric_key().unwrap();

        let wrapped = krypto.asymmetric_wrap(&paar.public_key, sym.raw()).unwrap();
        assert_eq!(
            wrapped.len(),
            X25519_LAENGE + IV_LAENGE + AES_SCHLUESSEL_LAENGE + TAG_LAENGE
        );

        let raw = krypto.asymmetric_unwrap(&paar, &wrapped).unwrap();
        assert_eq!(raw.as_bytes(), sym.raw());
    }

    #[test]
    fn unwrap_mit_fremdem_schluessel_schlaegt_fehl() {
        let krypto = X25519AesGcm::new();
        let empfaenger = krypto.generate_asymmetric_key_pair().unwrap();
        let fremder = krypto.generate_asymmetric_key_pair().unwrap();

        let wrapped = krypto.asymmetric_wrap(&empfaenger.public_key, &[7u8; 32]).unwrap();
        assert!(matches!(
            krypto.asymmetric_unwrap(&fremder, &wrapped),
            Err(CryptoError::SchluesselEntpacken(_))
        ));
        assert!(matches!(
            krypto.asymmetric_unwrap(&empfaenger, &wrapped[..40]),
            Err(CryptoError::SchluesselEntpacken(_))
        ));
    }

    #[test]
    fn aead_erkennt_manipulation() {
        let krypto = X25519AesGcm::new();
        let key = krypto.generate_symmetric_key().unwrap();
        let iv = krypto.generate_iv().unwrap();

        let mut ct = krypto.aead_encrypt(&key, &iv, b"geheim").unwrap();
        assert_eq!(krypto.aead_decrypt(&key, &iv, &ct).unwrap(), b"geheim");

        ct[0] ^= 0x01;
        assert!(matches!(
            krypto.aead_decrypt(&key, &iv, &ct),
            Err(CryptoError::Entschluesselung(_))
        ));
    }

    #[test]
    fn symmetrischer_import_prueft_laenge() {
        let krypto = X25519AesGcm::new();
        assert!(krypto.import_symmetric_key(&[0u8; 16]).is_err());
        assert!(krypto.import_symmetric_key(&[0u8; 32]).is_ok());
    }
}

//! Kryptografie-Capability
//!
//! Abstraktion ueber die konkreten Primitive. Schluesselaustausch und
//! Hybrid-Cipher rufen ausschliesslich diese Schnittstelle auf; die
//! Standard-Implementierung liegt in [`crate::standard`].
//!
//! Fehlervertrag:
//! - `import_public_key` meldet ungueltige Schluessel als `SchluesselImport`
//! - `asymmetric_unwrap` meldet jeden Fehlschlag als `SchluesselEntpacken`
//! - `aead_decrypt` meldet Manipulation oder falsche Schluessel als
//!   `Entschluesselung` und liefert nie Teil-Klartext

use crate::error::CryptoResult;
use crate::types::{Iv, KeyPair, PublicKey, SecretBytes, SymmetricKey};

pub trait CryptoCapability: Send + Sync {
    /// Erzeugt ein neues asymmetrisches Schluessel-Paar
    fn generate_asymmetric_key_pair(&self) -> CryptoResult<KeyPair>;

    /// Exportiert einen oeffentlichen Schluessel in sein Austauschformat
    fn export_public_key(&self, key: &PublicKey) -> CryptoResult<Vec<u8>>;

    /// Validiert und importiert einen oeffentlichen Schluessel
    fn import_public_key(&self, bytes: &[u8]) -> CryptoResult<PublicKey>;

    fn generate_symmetric_key(&self) -> CryptoResult<SymmetricKey>;

    /// Importiert einen rohen symmetrischen Schluessel
    fn import_symmetric_key(&self, raw: &[u8]) -> CryptoResult<SymmetricKey>;

    fn generate_iv(&self) -> CryptoResult<Iv>;

    fn aead_encrypt(&self, key: &SymmetricKey, iv: &Iv, plaintext: &[u8]) -> CryptoResult<Vec<u8>>;

    fn aead_decrypt(&self, key: &SymmetricKey, iv: &Iv, ciphertext: &[u8])
        -> CryptoResult<Vec<u8>>;

    /// Wickelt rohe Schluessel-Bytes fuer den Inhaber von `recipient` ein
    fn asymmetric_wrap(&self, recipient: &PublicKey, raw: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Entpackt mit dem eigenen privaten Schluessel
    fn asymmetric_unwrap(&self, own: &KeyPair, wrapped: &[u8]) -> CryptoResult<SecretBytes>;
}

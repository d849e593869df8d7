//! Fehlertypen fuer das Kryptografie-Subsystem

use thiserror::Error;

/// Fehler im Kryptografie-Subsystem
///
/// Alle Fehler betreffen genau eine Nachricht oder einen Schluessel und
/// sind nie fatal fuer den Prozess.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Schluessel-Generierung fehlgeschlagen: {0}")]
    SchluesselGenerierung(String),

    /// Oeffentlicher Schluessel eines Peers konnte nicht importiert werden
    #[error("Schluessel-Import fehlgeschlagen: {0}")]
    SchluesselImport(String),

    /// Symmetrischer Schluessel konnte nicht entpackt werden
    #[error("Schluessel-Entpacken fehlgeschlagen: {0}")]
    SchluesselEntpacken(String),

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("Entschluesselung fehlgeschlagen: {0}")]
    Entschluesselung(String),

    /// Fuer den Peer liegt noch kein oeffentlicher Schluessel vor
    #[error("Kein oeffentlicher Schluessel fuer Peer {peer_id}")]
    KeinPeerSchluessel { peer_id: String },

    #[error("Kein lokales Schluessel-Paar vorhanden")]
    KeinLokalesSchluesselpaar,

    #[error("Ungueltige Schluessel-Laenge: erwartet {erwartet}, erhalten {erhalten}")]
    UngueltigeSchluesselLaenge { erwartet: usize, erhalten: usize },

    #[error("Key Derivation fehlgeschlagen: {0}")]
    KeyDerivation(String),

    /// Fehlerhaftes Paket oder Klartext der kein gueltiger Chat-Inhalt ist
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    #[error("Envelope an {peer_id} konnte nicht versendet werden")]
    Versand { peer_id: String },
}

impl CryptoError {
    /// Gibt true zurueck wenn ein spaeterer Versuch gelingen kann
    /// (z.B. nach abgeschlossenem Schluesselaustausch)
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::KeinPeerSchluessel { .. } | Self::Versand { .. })
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;

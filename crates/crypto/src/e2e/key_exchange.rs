//! Schluesselaustausch-Verwaltung
//!
//! Haelt das lokale Schluessel-Paar und die oeffentlichen Schluessel der
//! Peers:
//! - Lokales Paar wird einmal pro Chat-Sitzung erzeugt
//! - Importierte Schluessel ueberschreiben vorherige Eintraege
//! - Entfernt wird nur bei Verlassen oder Trennung des Peers

use dashmap::DashMap;
use hushlink_core::PeerId;
use hushlink_protocol::{Envelope, EnvelopeKind, EnvelopeSink};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::capability::CryptoCapability;
use crate::error::{CryptoError, CryptoResult};
use crate::types::{KeyPair, PublicKey};

/// Verwaltet lokale und entfernte Schluessel einer Chat-Sitzung
pub struct KeyExchangeManager {
    lokale_id: PeerId,
    krypto: Arc<dyn CryptoCapability>,
    sink: Arc<dyn EnvelopeSink>,
    lokal: RwLock<Option<Arc<KeyPair>>>,
    peers: DashMap<PeerId, PublicKey>,
}

impl KeyExchangeManager {
    pub fn new(
        lokale_id: PeerId,
        krypto: Arc<dyn CryptoCapability>,
        sink: Arc<dyn EnvelopeSink>,
    ) -> Self {
        Self {
            lokale_id,
            krypto,
            sink,
            lokal: RwLock::new(None),
            peers: DashMap::new(),
        }
    }

    /// Stellt sicher, dass ein lokales Schluessel-Paar existiert
    ///
    /// Idempotent: ein vorhandenes Paar wird nie ersetzt.
    pub fn ensure_local_key_pair(&self) -> CryptoResult<Arc<KeyPair>> {
        if let Some(paar) = self.lokal.read().as_ref() {
            return Ok(Arc::clone(paar));
        }

        let mut lokal = self.lokal.write();
        // Zwischen read() und write() kann ein anderer Aufrufer erzeugt haben
        if let Some(paar) = lokal.as_ref() {
            return Ok(Arc::clone(paar));
        }
        let paar = Arc::new(self.krypto.generate_asymmetric_key_pair()?);
        *lokal = Some(Arc::clone(&paar));
        tracing::debug!(peer_id = %self.lokale_id.kurz(), "Lokales Schluessel-Paar erzeugt");
        Ok(paar)
    }

    /// Gibt das lokale Schluessel-Paar zurueck, falls bereits erzeugt
    pub fn local_key_pair(&self) -> Option<Arc<KeyPair>> {
        self.lokal.read().clone()
    }

    /// Exportierter lokaler oeffentlicher Schluessel
    pub fn local_public_key(&self) -> CryptoResult<Option<Vec<u8>>> {
        match self.local_key_pair() {
            Some(paar) => self.krypto.export_public_key(&paar.public_key).map(Some),
            None => Ok(None),
        }
    }

    /// Schickt den lokalen oeffentlichen Schluessel an `peer`
    ///
    /// Erzeugt das lokale Paar bei Bedarf, bevor das Envelope gebaut wird.
    pub fn publish_to(&self, peer: &PeerId) -> CryptoResult<()> {
        let paar = self.ensure_local_key_pair()?;
        let bytes = self.krypto.export_public_key(&paar.public_key)?;

        let envelope = Envelope::new(
            EnvelopeKind::KeyExchange,
            self.lokale_id.clone(),
            peer.clone(),
            bytes,
        );
        if !self.sink.senden(envelope) {
            return Err(CryptoError::Versand {
                peer_id: peer.to_string(),
            });
        }

        tracing::debug!(peer_id = %peer.kurz(), "Oeffentlicher Schluessel veroeffentlicht");
        Ok(())
    }

    /// Importiert den oeffentlichen Schluessel eines Peers
    ///
    /// Ein vorhandener Eintrag wird ueberschrieben. Schlaegt der Import fehl,
    /// bleibt die Tabelle unveraendert.
    pub fn import_from(&self, peer: &PeerId, bytes: &[u8]) -> CryptoResult<()> {
        let schluessel = self.krypto.import_public_key(bytes).map_err(|e| match e {
            e @ CryptoError::SchluesselImport(_) => e,
            andere => CryptoError::SchluesselImport(andere.to_string()),
        })?;

        let ersetzt = self.peers.insert(peer.clone(), schluessel).is_some();
        tracing::debug!(peer_id = %peer.kurz(), ersetzt, "Oeffentlicher Schluessel importiert");
        Ok(())
    }

    /// Aktueller oeffentlicher Schluessel eines Peers
    pub fn lookup(&self, peer: &PeerId) -> Option<PublicKey> {
        self.peers.get(peer).map(|eintrag| eintrag.value().clone())
    }

    /// Vergisst den Schluessel eines Peers (Verlassen/Trennung)
    pub fn remove(&self, peer: &PeerId) -> bool {
        self.peers.remove(peer).is_some()
    }

    /// Alle Peers mit bekanntem Schluessel
    pub fn known_peers(&self) -> Vec<PeerId> {
        self.peers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn lokale_id(&self) -> &PeerId {
        &self.lokale_id
    }
}

impl std::fmt::Debug for KeyExchangeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchangeManager")
            .field("lokale_id", &self.lokale_id)
            .field("lokales_paar", &self.lokal.read().is_some())
            .field("peers", &self.peers.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

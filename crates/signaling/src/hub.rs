//! Relay-Hub – Verbindungsregister, Raeume und Weiterleitung
//!
//! Der Hub kennt drei Dinge:
//! - die Send-Queue jedes verbundenen Peers
//! - die Mitglieder jedes Raums
//! - den aktuellen Raum jedes Peers
//!
//! Envelopes werden nur anhand von `target` zugestellt. Art und Inhalt
//! eines Envelopes liest der Hub nie.
//!
//! ## Sperren
//! Die Mitgliedschaft eines Raums wird unter dessen DashMap-Eintrag
//! geaendert; verschiedene Raeume blockieren sich nicht gegenseitig.
//! Benachrichtigungen werden erst nach Freigabe des Eintrags verschickt.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hushlink_core::{PeerId, RoomId};
use hushlink_observability::RelayMetrics;
use hushlink_protocol::{Envelope, RelayFrame};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::error::{SignalingError, SignalingResult};

// ---------------------------------------------------------------------------
// PeerSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue eines verbundenen Peers
#[derive(Clone, Debug)]
pub struct PeerSender {
    pub peer_id: PeerId,
    pub tx: mpsc::Sender<RelayFrame>,
}

impl PeerSender {
    /// Reiht einen Frame nicht-blockierend ein
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, frame: RelayFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                tracing::warn!(
                    peer_id = %self.peer_id.kurz(),
                    frame = frame.typ_name(),
                    "Send-Queue voll – Frame verworfen"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(peer_id = %self.peer_id.kurz(), "Send-Queue geschlossen (Peer getrennt)");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RelayHub
// ---------------------------------------------------------------------------

/// Zentrales Register aller Peers und Raeume
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct RelayHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    verbindungen: DashMap<PeerId, PeerSender>,
    raeume: DashMap<RoomId, HashSet<PeerId>>,
    peer_raum: DashMap<PeerId, RoomId>,
    config: RelayConfig,
    metriken: Option<RelayMetrics>,
}

impl RelayHub {
    pub fn neu(config: RelayConfig) -> Self {
        Self::erstellen(config, None)
    }

    /// Erstellt einen Hub der seine Zaehler in `metriken` fuehrt
    pub fn mit_metriken(config: RelayConfig, metriken: RelayMetrics) -> Self {
        Self::erstellen(config, Some(metriken))
    }

    fn erstellen(config: RelayConfig, metriken: Option<RelayMetrics>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                verbindungen: DashMap::new(),
                raeume: DashMap::new(),
                peer_raum: DashMap::new(),
                config,
                metriken,
            }),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Registriert eine neue Verbindung und gibt ihre Empfangs-Queue zurueck
    pub fn register(&self, peer: PeerId) -> mpsc::Receiver<RelayFrame> {
        let (tx, rx) = mpsc::channel(self.inner.config.send_queue_size.max(1));
        let sender = PeerSender {
            peer_id: peer.clone(),
            tx,
        };
        if self.inner.verbindungen.insert(peer.clone(), sender).is_none() {
            if let Some(m) = &self.inner.metriken {
                m.connected_peers.inc();
            }
        }
        tracing::debug!(peer_id = %peer.kurz(), "Peer registriert");
        rx
    }

    /// Nimmt `peer` in `raum` auf und benachrichtigt die uebrigen Mitglieder
    ///
    /// Ein vorheriger Raum wird zuerst verlassen. Der Beitretende selbst
    /// erfaehrt nichts ueber bereits anwesende Mitglieder.
    /// Gibt die Anzahl benachrichtigter Peers zurueck.
    pub fn join(&self, peer: &PeerId, raum: RoomId) -> SignalingResult<usize> {
        if !self.inner.verbindungen.contains_key(peer) {
            return Err(SignalingError::NichtRegistriert(peer.to_string()));
        }

        let vorher = self.inner.peer_raum.get(peer).map(|r| r.value().clone());
        if let Some(alter_raum) = vorher.filter(|r| *r != raum) {
            self.raum_verlassen(peer, &alter_raum);
        }

        let mut neu_angelegt = false;
        let andere: Vec<PeerId> = {
            let mut mitglieder = self.inner.raeume.entry(raum.clone()).or_insert_with(|| {
                neu_angelegt = true;
                HashSet::new()
            });
            mitglieder.insert(peer.clone());
            mitglieder.iter().filter(|p| *p != peer).cloned().collect()
        };
        self.inner.peer_raum.insert(peer.clone(), raum.clone());

        if let Some(m) = &self.inner.metriken {
            m.room_joins_total.inc();
            if neu_angelegt {
                m.active_rooms.inc();
            }
        }

        let mut benachrichtigt = 0;
        for anderer in &andere {
            let frame = RelayFrame::PeerJoined {
                peer_id: peer.clone(),
            };
            if self.an_peer_senden(anderer, frame) {
                benachrichtigt += 1;
            }
        }

        tracing::info!(
            peer_id = %peer.kurz(),
            room = %raum,
            mitglieder = andere.len() + 1,
            "Peer hat Raum betreten"
        );
        Ok(benachrichtigt)
    }

    /// Stellt ein Envelope an `envelope.target` zu
    ///
    /// `sender` wird durch die tatsaechliche Identitaet ersetzt. Ist das
    /// Ziel nicht verbunden, wird das Envelope still verworfen.
    pub fn forward(&self, absender: &PeerId, envelope: Envelope) -> bool {
        let envelope = envelope.mit_absender(absender.clone());
        let ziel = envelope.target.clone();
        let kind = envelope.kind;

        let zugestellt = match self.inner.verbindungen.get(&ziel) {
            Some(sender) => sender.senden(RelayFrame::deliver(envelope)),
            None => {
                tracing::debug!(
                    sender = %absender.kurz(),
                    target = %ziel.kurz(),
                    %kind,
                    "Ziel nicht verbunden – Envelope verworfen"
                );
                false
            }
        };

        if let Some(m) = &self.inner.metriken {
            if zugestellt {
                m.envelopes_forwarded_total.inc();
            } else {
                m.envelopes_dropped_total.inc();
            }
        }
        zugestellt
    }

    /// Entfernt einen getrennten Peer aus Raum und Register
    pub fn on_disconnect(&self, peer: &PeerId) {
        if self.inner.verbindungen.remove(peer).is_some() {
            if let Some(m) = &self.inner.metriken {
                m.connected_peers.dec();
            }
        }

        if let Some((_, raum)) = self.inner.peer_raum.remove(peer) {
            let verbleibend = self.raum_verlassen(peer, &raum);
            if self.inner.config.notify_departure {
                for anderer in &verbleibend {
                    self.an_peer_senden(
                        anderer,
                        RelayFrame::PeerLeft {
                            peer_id: peer.clone(),
                        },
                    );
                }
            }
        }

        tracing::debug!(peer_id = %peer.kurz(), "Peer aus Hub entfernt");
    }

    /// Entfernt `peer` aus der Mitgliederliste von `raum`
    ///
    /// Ein leerer Raum wird geloescht. Gibt die verbleibenden Mitglieder zurueck.
    fn raum_verlassen(&self, peer: &PeerId, raum: &RoomId) -> Vec<PeerId> {
        let verbleibend: Vec<PeerId> = match self.inner.raeume.entry(raum.clone()) {
            Entry::Occupied(mut eintrag) => {
                eintrag.get_mut().remove(peer);
                eintrag.get().iter().cloned().collect()
            }
            Entry::Vacant(_) => Vec::new(),
        };

        if self
            .inner
            .raeume
            .remove_if(raum, |_, mitglieder| mitglieder.is_empty())
            .is_some()
        {
            if let Some(m) = &self.inner.metriken {
                m.active_rooms.dec();
            }
            tracing::debug!(room = %raum, "Leerer Raum entfernt");
        }
        verbleibend
    }

    fn an_peer_senden(&self, peer: &PeerId, frame: RelayFrame) -> bool {
        match self.inner.verbindungen.get(peer) {
            Some(sender) => sender.senden(frame),
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn ist_verbunden(&self, peer: &PeerId) -> bool {
        self.inner.verbindungen.contains_key(peer)
    }

    /// Aktueller Raum eines Peers
    pub fn raum_von(&self, peer: &PeerId) -> Option<RoomId> {
        self.inner.peer_raum.get(peer).map(|r| r.value().clone())
    }

    /// Mitglieder eines Raums (leer wenn der Raum nicht existiert)
    pub fn mitglieder(&self, raum: &RoomId) -> Vec<PeerId> {
        self.inner
            .raeume
            .get(raum)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn peer_anzahl(&self) -> usize {
        self.inner.verbindungen.len()
    }

    pub fn raum_anzahl(&self) -> usize {
        self.inner.raeume.len()
    }
}

impl std::fmt::Debug for RelayHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHub")
            .field("peers", &self.peer_anzahl())
            .field("raeume", &self.raum_anzahl())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

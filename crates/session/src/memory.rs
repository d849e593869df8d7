//! In-Memory Transport
//!
//! Verbindet Transports innerhalb eines Prozesses ueber ein gemeinsames
//! [`MemoryNetwork`]. Offer/Answer tragen die Endpunkt-Kennung, ein Kandidat
//! bestaetigt sie. Sobald beide Seiten Beschreibung und Kandidat der jeweils
//! anderen kennen, melden beide `Connected`.
//!
//! Gedacht fuer Tests und lokale Demos ohne echten NAT-Durchgang.

use async_trait::async_trait;
use hushlink_core::PeerId;
use hushlink_protocol::{IceCandidate, SdpType, SessionDescription};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{SessionError, SessionResult};
use crate::transport::{
    Transport, TransportEventKind, TransportEventSender, TransportFactory, TransportState,
};

const SDP_PREFIX: &str = "hushlink-memory ";
const KANDIDAT_PREFIX: &str = "candidate:memory ";

struct Endpunkt {
    events: TransportEventSender,
    /// Kennung aus der Remote-Beschreibung
    gegenstelle: Option<String>,
    /// Kennung aus dem zuletzt hinzugefuegten Remote-Kandidaten
    kandidat: Option<String>,
    hat_remote_beschreibung: bool,
    bereit: bool,
    verbunden: bool,
}

/// Gemeinsames Netz fuer In-Memory Transports
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpunkte: Arc<Mutex<HashMap<String, Endpunkt>>>,
}

impl MemoryNetwork {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Anzahl offener (nicht geschlossener) Endpunkte
    pub fn endpunkt_anzahl(&self) -> usize {
        self.endpunkte.lock().len()
    }

    /// Anzahl verbundener Endpunkte
    pub fn verbunden_anzahl(&self) -> usize {
        self.endpunkte.lock().values().filter(|e| e.verbunden).count()
    }

    /// Bricht alle bestehenden Verbindungen ab, beide Seiten melden `Failed`
    pub fn verbindungen_abbrechen(&self) -> usize {
        let betroffen: Vec<TransportEventSender> = {
            let mut endpunkte = self.endpunkte.lock();
            endpunkte
                .values_mut()
                .filter(|e| e.verbunden)
                .map(|e| {
                    e.verbunden = false;
                    e.events.clone()
                })
                .collect()
        };

        for events in &betroffen {
            events.melden(TransportEventKind::StateChanged(TransportState::Failed));
        }
        betroffen.len()
    }
}

#[async_trait]
impl TransportFactory for MemoryNetwork {
    async fn create(
        &self,
        remote: &PeerId,
        events: TransportEventSender,
    ) -> SessionResult<Arc<dyn Transport>> {
        let token = Uuid::new_v4().simple().to_string();
        self.endpunkte.lock().insert(
            token.clone(),
            Endpunkt {
                events,
                gegenstelle: None,
                kandidat: None,
                hat_remote_beschreibung: false,
                bereit: false,
                verbunden: false,
            },
        );
        tracing::debug!(remote = %remote.kurz(), token = %token, "Memory-Transport erzeugt");

        Ok(Arc::new(MemoryTransport {
            token,
            netz: self.clone(),
        }))
    }
}

/// Ein Endpunkt im [`MemoryNetwork`]
pub struct MemoryTransport {
    token: String,
    netz: MemoryNetwork,
}

impl MemoryTransport {
    pub fn token(&self) -> &str {
        &self.token
    }

    fn geschlossen() -> SessionError {
        SessionError::transport("Memory-Transport ist geschlossen")
    }

    /// Verbindet beide Seiten, sobald jede die andere vollstaendig kennt
    fn verbinden_versuchen(&self) {
        let gemeldet: Vec<TransportEventSender> = {
            let mut endpunkte = self.netz.endpunkte.lock();

            let gegenstelle = match endpunkte.get_mut(&self.token) {
                Some(ich) if !ich.verbunden => {
                    let passt = ich.hat_remote_beschreibung
                        && ich.gegenstelle.is_some()
                        && ich.kandidat == ich.gegenstelle;
                    if !passt {
                        return;
                    }
                    ich.bereit = true;
                    ich.gegenstelle.clone()
                }
                _ => return,
            };
            let Some(gegenstelle) = gegenstelle else {
                return;
            };

            let andere_bereit = endpunkte
                .get(&gegenstelle)
                .map(|e| e.bereit && e.gegenstelle.as_deref() == Some(self.token.as_str()))
                .unwrap_or(false);
            if !andere_bereit {
                return;
            }

            let mut senders = Vec::with_capacity(2);
            for token in [&self.token, &gegenstelle] {
                if let Some(e) = endpunkte.get_mut(token) {
                    e.verbunden = true;
                    senders.push(e.events.clone());
                }
            }
            senders
        };

        for events in &gemeldet {
            events.melden(TransportEventKind::StateChanged(TransportState::Connected));
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn create_offer(&self) -> SessionResult<SessionDescription> {
        if !self.netz.endpunkte.lock().contains_key(&self.token) {
            return Err(Self::geschlossen());
        }
        Ok(SessionDescription::offer(format!("{SDP_PREFIX}{}", self.token)))
    }

    async fn create_answer(&self) -> SessionResult<SessionDescription> {
        let endpunkte = self.netz.endpunkte.lock();
        let ich = endpunkte.get(&self.token).ok_or_else(Self::geschlossen)?;
        if !ich.hat_remote_beschreibung {
            return Err(SessionError::transport(
                "Answer ohne vorheriges Remote-Offer",
            ));
        }
        Ok(SessionDescription::answer(format!("{SDP_PREFIX}{}", self.token)))
    }

    async fn set_local_description(&self, _desc: SessionDescription) -> SessionResult<()> {
        let events = {
            let endpunkte = self.netz.endpunkte.lock();
            let ich = endpunkte.get(&self.token).ok_or_else(Self::geschlossen)?;
            ich.events.clone()
        };

        events.melden(TransportEventKind::StateChanged(TransportState::Connecting));
        events.melden(TransportEventKind::LocalCandidate(IceCandidate {
            candidate: format!("{KANDIDAT_PREFIX}{}", self.token),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        }));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> SessionResult<()> {
        let gegenstelle = desc
            .sdp
            .strip_prefix(SDP_PREFIX)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                SessionError::transport(format!("Unbekanntes SDP-Format ({:?})", desc.sdp_type))
            })?
            .to_string();

        {
            let mut endpunkte = self.netz.endpunkte.lock();
            let ich = endpunkte
                .get_mut(&self.token)
                .ok_or_else(Self::geschlossen)?;
            if desc.sdp_type == SdpType::Offer && ich.hat_remote_beschreibung {
                return Err(SessionError::transport("Remote-Offer bereits gesetzt"));
            }
            ich.gegenstelle = Some(gegenstelle);
            ich.hat_remote_beschreibung = true;
        }

        self.verbinden_versuchen();
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> SessionResult<()> {
        let token = candidate
            .candidate
            .strip_prefix(KANDIDAT_PREFIX)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SessionError::transport("Unbekanntes Kandidaten-Format"))?
            .to_string();

        {
            let mut endpunkte = self.netz.endpunkte.lock();
            let ich = endpunkte
                .get_mut(&self.token)
                .ok_or_else(Self::geschlossen)?;
            ich.kandidat = Some(token);
        }

        self.verbinden_versuchen();
        Ok(())
    }

    async fn send(&self, data: Vec<u8>) -> SessionResult<()> {
        let ziel = {
            let endpunkte = self.netz.endpunkte.lock();
            let ich = endpunkte.get(&self.token).ok_or_else(Self::geschlossen)?;
            if !ich.verbunden {
                return Err(SessionError::transport("Datenkanal nicht verbunden"));
            }
            ich.gegenstelle
                .as_ref()
                .and_then(|g| endpunkte.get(g))
                .filter(|e| e.verbunden)
                .map(|e| e.events.clone())
                .ok_or_else(|| SessionError::transport("Gegenstelle nicht erreichbar"))?
        };

        if !ziel.melden(TransportEventKind::DataReceived(data)) {
            return Err(SessionError::transport("Datenkanal ueberlastet"));
        }
        Ok(())
    }

    async fn close(&self) {
        let gegenstelle = {
            let mut endpunkte = self.netz.endpunkte.lock();
            let Some(ich) = endpunkte.remove(&self.token) else {
                return;
            };
            if !ich.verbunden {
                None
            } else {
                ich.gegenstelle
                    .as_ref()
                    .and_then(|g| endpunkte.get_mut(g))
                    .filter(|e| e.verbunden)
                    .map(|e| {
                        e.verbunden = false;
                        e.events.clone()
                    })
            }
        };

        if let Some(events) = gegenstelle {
            events.melden(TransportEventKind::StateChanged(TransportState::Disconnected));
        }
        tracing::debug!(token = %self.token, "Memory-Transport geschlossen");
    }
}

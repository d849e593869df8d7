//! Session-Aushandlung zwischen zwei Peers
//!
//! Pro entferntem Peer existiert hoechstens eine [`PeerSession`]. Die Rolle
//! wird beim Anlegen festgelegt und aendert sich danach nicht mehr.
//!
//! ## Zustandsuebergaenge
//! ```text
//! peer-joined        -> Offerer,  Offer erzeugen       -> LocalOfferCreated
//! offer (keine/tote) -> Answerer, Answer erzeugen      -> LocalAnswerCreated
//! answer             -> nur in LocalOfferCreated, genau einmal
//! connected          -> Established, Schluessel einmal veroeffentlichen
//! failed/disconnect  -> Terminated
//! Zeitlimit          -> Terminated
//! ```
//!
//! Der Negotiator gehoert genau einem Task (dem Peer-Client) und wird ueber
//! `&mut self` getrieben. Ereignisse an die Anwendung gehen ueber einen
//! mpsc-Kanal.

use hushlink_core::PeerId;
use hushlink_crypto::{CryptoCapability, EncryptedPackage, HybridCipher, KeyExchangeManager};
use hushlink_protocol::{
    ChatContent, Envelope, EnvelopeKind, EnvelopeSink, IceCandidate, SdpType,
    SessionDescription,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::events::{melden, ClientEvent};
use crate::transport::{
    Transport, TransportEvent, TransportEventKind, TransportEventSender, TransportFactory,
    TransportState,
};

// ---------------------------------------------------------------------------
// Rolle und Phase
// ---------------------------------------------------------------------------

/// Rolle der lokalen Seite in einer Sitzung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Noch keine Sitzung mit diesem Peer
    Undetermined,
    Offerer,
    Answerer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    LocalOfferCreated,
    LocalAnswerCreated,
    Established,
    Terminated,
}

impl SessionPhase {
    /// Phasen in denen die Aushandlung noch laeuft
    pub fn verhandelt(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::LocalOfferCreated | Self::LocalAnswerCreated
        )
    }
}

/// Momentaufnahme einer Sitzung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub role: Role,
    pub phase: SessionPhase,
    /// Fortlaufende Nummer, neu bei jedem Ersetzen
    pub sitzung: u64,
    pub schluessel_veroeffentlicht: bool,
}

/// Aushandlungszustand zu genau einem entfernten Peer
struct PeerSession {
    sitzung: u64,
    role: Role,
    phase: SessionPhase,
    transport: Arc<dyn Transport>,
    gestartet: Instant,
    answer_erhalten: bool,
    schluessel_veroeffentlicht: bool,
}

impl PeerSession {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            role: self.role,
            phase: self.phase,
            sitzung: self.sitzung,
            schluessel_veroeffentlicht: self.schluessel_veroeffentlicht,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionNegotiator
// ---------------------------------------------------------------------------

pub struct SessionNegotiator {
    lokale_id: PeerId,
    config: SessionConfig,
    factory: Arc<dyn TransportFactory>,
    sink: Arc<dyn EnvelopeSink>,
    schluessel: Arc<KeyExchangeManager>,
    cipher: HybridCipher,
    transport_tx: mpsc::Sender<TransportEvent>,
    ereignisse: mpsc::Sender<ClientEvent>,
    sitzungen: HashMap<PeerId, PeerSession>,
    naechste_sitzung: u64,
}

impl SessionNegotiator {
    /// Erstellt einen Negotiator fuer die lokale Seite von `schluessel`
    ///
    /// Transports melden ihre Ereignisse an `transport_tx`; der Besitzer
    /// leitet sie an [`SessionNegotiator::on_transport_event`] weiter.
    pub fn neu(
        config: SessionConfig,
        factory: Arc<dyn TransportFactory>,
        sink: Arc<dyn EnvelopeSink>,
        krypto: Arc<dyn CryptoCapability>,
        schluessel: Arc<KeyExchangeManager>,
        transport_tx: mpsc::Sender<TransportEvent>,
        ereignisse: mpsc::Sender<ClientEvent>,
    ) -> Self {
        Self {
            lokale_id: schluessel.lokale_id().clone(),
            config,
            factory,
            sink,
            cipher: HybridCipher::new(krypto, Arc::clone(&schluessel)),
            schluessel,
            transport_tx,
            ereignisse,
            sitzungen: HashMap::new(),
            naechste_sitzung: 1,
        }
    }

    pub fn lokale_id(&self) -> &PeerId {
        &self.lokale_id
    }

    pub fn schluessel(&self) -> &Arc<KeyExchangeManager> {
        &self.schluessel
    }

    /// Zustand der Sitzung mit `peer`
    pub fn sitzung(&self, peer: &PeerId) -> Option<SessionInfo> {
        self.sitzungen.get(peer).map(PeerSession::info)
    }

    /// Rolle der lokalen Seite gegenueber `peer`
    pub fn role(&self, peer: &PeerId) -> Role {
        self.sitzungen
            .get(peer)
            .map(|s| s.role)
            .unwrap_or(Role::Undetermined)
    }

    pub fn sitzungen(&self) -> Vec<(PeerId, SessionInfo)> {
        self.sitzungen
            .iter()
            .map(|(peer, s)| (peer.clone(), s.info()))
            .collect()
    }

    // --- Relay-Ereignisse ---

    /// Ein neuer Peer ist dem Raum beigetreten: lokale Seite bietet an
    ///
    /// Eine bestehende Sitzung mit demselben Peer wird geschlossen und ersetzt.
    pub async fn on_peer_joined(&mut self, peer: PeerId) -> SessionResult<()> {
        if peer == self.lokale_id {
            return Err(SessionError::protokoll("peer-joined mit eigener PeerId"));
        }
        melden(
            &self.ereignisse,
            ClientEvent::PeerJoined {
                peer_id: peer.clone(),
            },
        );

        if let Some(alt) = self.sitzungen.remove(&peer) {
            tracing::info!(
                peer_id = %peer.kurz(),
                phase = ?alt.phase,
                "Peer erneut beigetreten, Sitzung wird ersetzt"
            );
            alt.transport.close().await;
        }
        self.mehrere_gegenstellen_warnen(&peer);

        let (sitzung, transport) = self.transport_erzeugen(&peer).await?;
        if let Err(e) = self.offer_senden(&peer, transport.as_ref()).await {
            transport.close().await;
            return Err(e);
        }

        tracing::info!(peer_id = %peer.kurz(), sitzung, "Offer an neuen Peer gesendet");
        self.sitzungen.insert(
            peer,
            PeerSession {
                sitzung,
                role: Role::Offerer,
                phase: SessionPhase::LocalOfferCreated,
                transport,
                gestartet: Instant::now(),
                answer_erhalten: false,
                schluessel_veroeffentlicht: false,
            },
        );
        Ok(())
    }

    /// Ein Peer hat den Raum verlassen oder die Verbindung verloren
    ///
    /// Gibt true zurueck wenn eine Sitzung bestand.
    pub async fn on_peer_left(&mut self, peer: &PeerId) -> bool {
        let bestand = match self.sitzungen.remove(peer) {
            Some(sitzung) => {
                sitzung.transport.close().await;
                true
            }
            None => false,
        };
        self.schluessel.remove(peer);

        tracing::info!(peer_id = %peer.kurz(), bestand, "Peer gegangen, Sitzung entfernt");
        melden(
            &self.ereignisse,
            ClientEvent::PeerLeft {
                peer_id: peer.clone(),
            },
        );
        bestand
    }

    /// Verarbeitet ein zugestelltes Envelope
    ///
    /// Fehler betreffen nur dieses Envelope; die Sitzung bleibt bestehen.
    pub async fn on_envelope(&mut self, envelope: Envelope) -> SessionResult<()> {
        if envelope.target != self.lokale_id {
            return Err(SessionError::protokoll(format!(
                "Envelope fuer fremden Empfaenger {}",
                envelope.target.kurz()
            )));
        }
        if envelope.sender == self.lokale_id {
            return Err(SessionError::protokoll("Envelope vom eigenen Absender"));
        }

        tracing::debug!(
            von = %envelope.sender.kurz(),
            kind = %envelope.kind,
            bytes = envelope.payload.len(),
            "Envelope empfangen"
        );

        match envelope.kind {
            EnvelopeKind::Offer => self.offer_empfangen(envelope.sender, &envelope.payload).await,
            EnvelopeKind::Answer => self.answer_empfangen(&envelope.sender, &envelope.payload).await,
            EnvelopeKind::IceCandidate => {
                self.kandidat_empfangen(&envelope.sender, &envelope.payload)
                    .await
            }
            EnvelopeKind::KeyExchange => self.schluessel_empfangen(envelope.sender, &envelope.payload),
        }
    }

    async fn offer_empfangen(&mut self, peer: PeerId, payload: &[u8]) -> SessionResult<()> {
        let offer = beschreibung_lesen(payload, SdpType::Offer)?;

        match self.sitzungen.get(&peer) {
            Some(s) if s.phase != SessionPhase::Terminated => {
                return Err(SessionError::protokoll(format!(
                    "Offer von {} trotz laufender Sitzung ({:?})",
                    peer.kurz(),
                    s.phase
                )));
            }
            Some(_) => {
                if let Some(alt) = self.sitzungen.remove(&peer) {
                    alt.transport.close().await;
                }
            }
            None => {}
        }
        self.mehrere_gegenstellen_warnen(&peer);

        let (sitzung, transport) = self.transport_erzeugen(&peer).await?;
        if let Err(e) = self.answer_senden(&peer, transport.as_ref(), offer).await {
            transport.close().await;
            return Err(e);
        }

        tracing::info!(peer_id = %peer.kurz(), sitzung, "Offer beantwortet");
        self.sitzungen.insert(
            peer,
            PeerSession {
                sitzung,
                role: Role::Answerer,
                phase: SessionPhase::LocalAnswerCreated,
                transport,
                gestartet: Instant::now(),
                answer_erhalten: false,
                schluessel_veroeffentlicht: false,
            },
        );
        Ok(())
    }

    async fn answer_empfangen(&mut self, peer: &PeerId, payload: &[u8]) -> SessionResult<()> {
        let answer = beschreibung_lesen(payload, SdpType::Answer)?;

        let sitzung = self.sitzungen.get_mut(peer).ok_or_else(|| {
            SessionError::protokoll(format!("Answer von {} ohne Sitzung", peer.kurz()))
        })?;
        if sitzung.phase != SessionPhase::LocalOfferCreated || sitzung.answer_erhalten {
            return Err(SessionError::protokoll(format!(
                "Unerwartetes Answer von {} ({:?})",
                peer.kurz(),
                sitzung.phase
            )));
        }

        sitzung.transport.set_remote_description(answer).await?;
        sitzung.answer_erhalten = true;
        tracing::debug!(peer_id = %peer.kurz(), "Answer uebernommen");
        Ok(())
    }

    async fn kandidat_empfangen(&mut self, peer: &PeerId, payload: &[u8]) -> SessionResult<()> {
        let kandidat = IceCandidate::from_bytes(payload)
            .map_err(|e| SessionError::protokoll(format!("Ungueltiger Kandidat: {e}")))?;

        let sitzung = self
            .sitzungen
            .get(peer)
            .filter(|s| s.phase != SessionPhase::Terminated)
            .ok_or_else(|| {
                SessionError::protokoll(format!("Kandidat von {} ohne Transport", peer.kurz()))
            })?;

        sitzung.transport.add_remote_candidate(kandidat).await
    }

    fn schluessel_empfangen(&mut self, peer: PeerId, payload: &[u8]) -> SessionResult<()> {
        self.schluessel.import_from(&peer, payload)?;
        melden(&self.ereignisse, ClientEvent::PeerKeyReceived { peer_id: peer });
        Ok(())
    }

    // --- Transport-Ereignisse ---

    /// Verarbeitet ein Ereignis eines Transports
    ///
    /// Ereignisse eines bereits ersetzten Transports werden ignoriert.
    pub async fn on_transport_event(&mut self, event: TransportEvent) -> SessionResult<()> {
        let TransportEvent {
            peer_id: peer,
            sitzung: nummer,
            kind,
        } = event;

        let Some(sitzung) = self.sitzungen.get_mut(&peer) else {
            tracing::debug!(peer_id = %peer.kurz(), "Transport-Ereignis ohne Sitzung ignoriert");
            return Ok(());
        };
        if sitzung.sitzung != nummer {
            tracing::debug!(
                peer_id = %peer.kurz(),
                nummer,
                aktuell = sitzung.sitzung,
                "Veraltetes Transport-Ereignis ignoriert"
            );
            return Ok(());
        }

        match kind {
            TransportEventKind::LocalCandidate(kandidat) => {
                if sitzung.phase == SessionPhase::Terminated {
                    return Ok(());
                }
                let payload = kandidat
                    .to_bytes()
                    .map_err(|e| SessionError::protokoll(e.to_string()))?;
                self.envelope_senden(EnvelopeKind::IceCandidate, &peer, payload)
            }

            TransportEventKind::StateChanged(TransportState::Connected) => {
                if sitzung.phase.verhandelt() {
                    sitzung.phase = SessionPhase::Established;
                    let dauer_ms = sitzung.gestartet.elapsed().as_millis() as u64;
                    tracing::info!(
                        peer_id = %peer.kurz(),
                        role = ?sitzung.role,
                        dauer_ms,
                        "Sitzung aufgebaut"
                    );
                    melden(
                        &self.ereignisse,
                        ClientEvent::SessionEstablished {
                            peer_id: peer.clone(),
                        },
                    );
                } else if sitzung.phase != SessionPhase::Established {
                    return Ok(());
                }

                if sitzung.schluessel_veroeffentlicht {
                    return Ok(());
                }
                self.schluessel_veroeffentlichen(&peer)
            }

            TransportEventKind::StateChanged(zustand) if zustand.ist_abbruch() => {
                if sitzung.phase == SessionPhase::Terminated {
                    return Ok(());
                }
                sitzung.phase = SessionPhase::Terminated;
                let transport = Arc::clone(&sitzung.transport);
                transport.close().await;

                let grund = format!("Transport-Zustand {zustand}");
                tracing::warn!(peer_id = %peer.kurz(), %zustand, "Transport ausgefallen, Sitzung beendet");
                melden(
                    &self.ereignisse,
                    ClientEvent::TransportFailure {
                        peer_id: peer,
                        reason: grund,
                    },
                );
                Ok(())
            }

            TransportEventKind::StateChanged(zustand) => {
                tracing::debug!(peer_id = %peer.kurz(), %zustand, "Transport-Zustand");
                Ok(())
            }

            TransportEventKind::DataReceived(bytes) => {
                if sitzung.phase != SessionPhase::Established {
                    return Err(SessionError::protokoll(format!(
                        "Daten von {} ausserhalb einer aufgebauten Sitzung",
                        peer.kurz()
                    )));
                }
                self.paket_oeffnen(peer, &bytes);
                Ok(())
            }
        }
    }

    /// Entschluesselt ein empfangenes Paket und meldet Ergebnis oder Verwurf
    fn paket_oeffnen(&self, peer: PeerId, bytes: &[u8]) {
        let ergebnis =
            EncryptedPackage::from_bytes(bytes).and_then(|paket| self.cipher.open_content(&paket));

        match ergebnis {
            Ok(content) => {
                tracing::debug!(peer_id = %peer.kurz(), typ = ?content.content_type, "Nachricht entschluesselt");
                melden(
                    &self.ereignisse,
                    ClientEvent::MessageReceived {
                        peer_id: peer,
                        content,
                    },
                );
            }
            Err(e) => {
                tracing::warn!(peer_id = %peer.kurz(), fehler = %e, "Nachricht verworfen");
                melden(
                    &self.ereignisse,
                    ClientEvent::MessageDropped {
                        peer_id: peer,
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    // --- Anwendung ---

    /// Verschluesselt `content` fuer `peer` und schickt es ueber den Transport
    pub async fn send_message(&self, peer: &PeerId, content: &ChatContent) -> SessionResult<()> {
        let sitzung = self
            .sitzungen
            .get(peer)
            .filter(|s| s.phase == SessionPhase::Established)
            .ok_or_else(|| {
                SessionError::protokoll(format!("Keine aufgebaute Sitzung mit {}", peer.kurz()))
            })?;

        let paket = self.cipher.seal_content(peer, content)?;
        let bytes = paket.to_bytes()?;
        sitzung.transport.send(bytes).await
    }

    /// Beendet Sitzungen deren Aushandlung das Zeitlimit ueberschritten hat
    ///
    /// Gibt die Anzahl beendeter Sitzungen zurueck.
    pub async fn check_timeouts(&mut self, jetzt: Instant) -> usize {
        let limit = self.config.negotiation_timeout;
        let abgelaufen: Vec<PeerId> = self
            .sitzungen
            .iter()
            .filter(|(_, s)| s.phase.verhandelt())
            .filter(|(_, s)| jetzt.saturating_duration_since(s.gestartet) >= limit)
            .map(|(peer, _)| peer.clone())
            .collect();

        for peer in &abgelaufen {
            if let Some(sitzung) = self.sitzungen.get_mut(peer) {
                sitzung.phase = SessionPhase::Terminated;
                sitzung.transport.close().await;
            }
            tracing::warn!(
                peer_id = %peer.kurz(),
                limit_s = limit.as_secs(),
                "Aushandlung abgebrochen: Zeitlimit"
            );
            melden(
                &self.ereignisse,
                ClientEvent::NegotiationTimeout {
                    peer_id: peer.clone(),
                },
            );
        }
        abgelaufen.len()
    }

    /// Holt fehlgeschlagene Schluessel-Veroeffentlichungen nach
    ///
    /// Betrifft aufgebaute Sitzungen, deren `publish_to` beim Verbindungsaufbau
    /// gescheitert ist (z.B. volle Relay-Queue). Gibt die Anzahl erfolgreich
    /// nachgeholter Veroeffentlichungen zurueck.
    pub fn ausstehende_schluessel_veroeffentlichen(&mut self) -> usize {
        let ausstehend: Vec<PeerId> = self
            .sitzungen
            .iter()
            .filter(|(_, s)| s.phase == SessionPhase::Established && !s.schluessel_veroeffentlicht)
            .map(|(peer, _)| peer.clone())
            .collect();

        let mut nachgeholt = 0;
        for peer in &ausstehend {
            match self.schluessel_veroeffentlichen(peer) {
                Ok(()) => nachgeholt += 1,
                Err(e) => {
                    tracing::debug!(peer_id = %peer.kurz(), fehler = %e, "Schluessel weiter ausstehend");
                }
            }
        }
        nachgeholt
    }

    /// Schliesst alle Transports (Client wird beendet)
    pub async fn schliessen(&mut self) {
        for (_, sitzung) in self.sitzungen.drain() {
            sitzung.transport.close().await;
        }
    }

    // --- Hilfsfunktionen ---

    /// Schickt den lokalen Schluessel und setzt das Flag erst nach Erfolg
    fn schluessel_veroeffentlichen(&mut self, peer: &PeerId) -> SessionResult<()> {
        self.schluessel.publish_to(peer)?;
        if let Some(s) = self.sitzungen.get_mut(peer) {
            s.schluessel_veroeffentlicht = true;
        }
        Ok(())
    }

    async fn transport_erzeugen(
        &mut self,
        peer: &PeerId,
    ) -> SessionResult<(u64, Arc<dyn Transport>)> {
        let nummer = self.naechste_sitzung;
        self.naechste_sitzung += 1;

        let events = TransportEventSender::neu(peer.clone(), nummer, self.transport_tx.clone());
        let transport = self.factory.create(peer, events).await?;
        Ok((nummer, transport))
    }

    async fn offer_senden(&self, peer: &PeerId, transport: &dyn Transport) -> SessionResult<()> {
        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;
        let payload = offer
            .to_bytes()
            .map_err(|e| SessionError::protokoll(e.to_string()))?;
        self.envelope_senden(EnvelopeKind::Offer, peer, payload)
    }

    async fn answer_senden(
        &self,
        peer: &PeerId,
        transport: &dyn Transport,
        offer: SessionDescription,
    ) -> SessionResult<()> {
        transport.set_remote_description(offer).await?;
        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;
        let payload = answer
            .to_bytes()
            .map_err(|e| SessionError::protokoll(e.to_string()))?;
        self.envelope_senden(EnvelopeKind::Answer, peer, payload)
    }

    fn envelope_senden(
        &self,
        kind: EnvelopeKind,
        peer: &PeerId,
        payload: Vec<u8>,
    ) -> SessionResult<()> {
        let envelope = Envelope::new(kind, self.lokale_id.clone(), peer.clone(), payload);
        if !self.sink.senden(envelope) {
            return Err(SessionError::Relay(format!(
                "{kind}-Envelope an {} nicht zustellbar",
                peer.kurz()
            )));
        }
        Ok(())
    }

    /// Chat ist fuer genau zwei Peers ausgelegt
    fn mehrere_gegenstellen_warnen(&self, neu: &PeerId) {
        let andere = self
            .sitzungen
            .iter()
            .filter(|(peer, s)| *peer != neu && s.phase != SessionPhase::Terminated)
            .count();
        if andere > 0 {
            tracing::warn!(
                peer_id = %neu.kurz(),
                andere,
                "Mehr als eine Gegenstelle im Raum"
            );
        }
    }
}

/// Liest eine Session-Beschreibung und prueft ihre Art
fn beschreibung_lesen(payload: &[u8], erwartet: SdpType) -> SessionResult<SessionDescription> {
    let desc = SessionDescription::from_bytes(payload)
        .map_err(|e| SessionError::protokoll(format!("Ungueltige Session-Beschreibung: {e}")))?;
    if desc.sdp_type != erwartet {
        return Err(SessionError::protokoll(format!(
            "Erwartet {erwartet:?}, erhalten {:?}",
            desc.sdp_type
        )));
    }
    Ok(desc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hushlink_crypto::X25519AesGcm;
    use parking_lot::Mutex;
    use std::time::Duration;

    // --- Test-Doubles ---

    /// Zeichnet alle Aufrufe auf und antwortet mit festen Beschreibungen
    #[derive(Default)]
    struct AufzeichnenderTransport {
        aufrufe: Mutex<Vec<String>>,
        gesendet: Mutex<Vec<Vec<u8>>>,
    }

    impl AufzeichnenderTransport {
        fn aufrufe(&self) -> Vec<String> {
            self.aufrufe.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for AufzeichnenderTransport {
        async fn create_offer(&self) -> SessionResult<SessionDescription> {
            self.aufrufe.lock().push("create_offer".into());
            Ok(SessionDescription::offer("sdp-offer"))
        }

        async fn create_answer(&self) -> SessionResult<SessionDescription> {
            self.aufrufe.lock().push("create_answer".into());
            Ok(SessionDescription::answer("sdp-answer"))
        }

        async fn set_local_description(&self, desc: SessionDescription) -> SessionResult<()> {
            self.aufrufe.lock().push(format!("local:{}", desc.sdp));
            Ok(())
        }

        async fn set_remote_description(&self, desc: SessionDescription) -> SessionResult<()> {
            self.aufrufe.lock().push(format!("remote:{}", desc.sdp));
            Ok(())
        }

        async fn add_remote_candidate(&self, candidate: IceCandidate) -> SessionResult<()> {
            self.aufrufe
                .lock()
                .push(format!("kandidat:{}", candidate.candidate));
            Ok(())
        }

        async fn send(&self, data: Vec<u8>) -> SessionResult<()> {
            self.gesendet.lock().push(data);
            Ok(())
        }

        async fn close(&self) {
            self.aufrufe.lock().push("close".into());
        }
    }

    #[derive(Default)]
    struct TestFactory {
        erzeugt: Mutex<Vec<Arc<AufzeichnenderTransport>>>,
    }

    impl TestFactory {
        fn anzahl(&self) -> usize {
            self.erzeugt.lock().len()
        }

        fn transport(&self, index: usize) -> Arc<AufzeichnenderTransport> {
            Arc::clone(&self.erzeugt.lock()[index])
        }
    }

    #[async_trait]
    impl TransportFactory for TestFactory {
        async fn create(
            &self,
            _remote: &PeerId,
            _events: TransportEventSender,
        ) -> SessionResult<Arc<dyn Transport>> {
            let transport = Arc::new(AufzeichnenderTransport::default());
            self.erzeugt.lock().push(Arc::clone(&transport));
            Ok(transport)
        }
    }

    #[derive(Default)]
    struct SammelSink {
        envelopes: Mutex<Vec<Envelope>>,
        /// So viele KeyExchange-Envelopes werden noch abgewiesen
        schluessel_ablehnen: Mutex<usize>,
    }

    impl SammelSink {
        fn arten(&self) -> Vec<EnvelopeKind> {
            self.envelopes.lock().iter().map(|e| e.kind).collect()
        }

        fn letztes(&self) -> Envelope {
            self.envelopes.lock().last().cloned().unwrap()
        }
    }

    impl EnvelopeSink for SammelSink {
        fn senden(&self, envelope: Envelope) -> bool {
            if envelope.kind == EnvelopeKind::KeyExchange {
                let mut rest = self.schluessel_ablehnen.lock();
                if *rest > 0 {
                    *rest -= 1;
                    return false;
                }
            }
            self.envelopes.lock().push(envelope);
            true
        }
    }

    struct Umgebung {
        neg: SessionNegotiator,
        factory: Arc<TestFactory>,
        sink: Arc<SammelSink>,
        ereignisse: mpsc::Receiver<ClientEvent>,
        _transport_rx: mpsc::Receiver<TransportEvent>,
    }

    fn lokal() -> PeerId {
        PeerId::from_string("lokal")
    }

    fn remote() -> PeerId {
        PeerId::from_string("remote")
    }

    fn aufbau() -> Umgebung {
        let factory = Arc::new(TestFactory::default());
        let sink = Arc::new(SammelSink::default());
        let krypto: Arc<dyn CryptoCapability> = Arc::new(X25519AesGcm);
        let schluessel = Arc::new(KeyExchangeManager::new(
            lokal(),
            Arc::clone(&krypto),
            sink.clone(),
        ));
        let (transport_tx, transport_rx) = mpsc::channel(16);
        let (ereignis_tx, ereignisse) = mpsc::channel(16);

        let neg = SessionNegotiator::neu(
            SessionConfig::default(),
            factory.clone(),
            sink.clone(),
            krypto,
            schluessel,
            transport_tx,
            ereignis_tx,
        );
        Umgebung {
            neg,
            factory,
            sink,
            ereignisse,
            _transport_rx: transport_rx,
        }
    }

    fn envelope(kind: EnvelopeKind, payload: Vec<u8>) -> Envelope {
        Envelope::new(kind, remote(), lokal(), payload)
    }

    fn offer_envelope() -> Envelope {
        envelope(
            EnvelopeKind::Offer,
            SessionDescription::offer("remote-offer").to_bytes().unwrap(),
        )
    }

    fn answer_envelope() -> Envelope {
        envelope(
            EnvelopeKind::Answer,
            SessionDescription::answer("remote-answer").to_bytes().unwrap(),
        )
    }

    fn event(sitzung: u64, kind: TransportEventKind) -> TransportEvent {
        TransportEvent {
            peer_id: remote(),
            sitzung,
            kind,
        }
    }

    fn zustand(sitzung: u64, zustand: TransportState) -> TransportEvent {
        event(sitzung, TransportEventKind::StateChanged(zustand))
    }

    fn alle_ereignisse(rx: &mut mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut alle = Vec::new();
        while let Ok(e) = rx.try_recv() {
            alle.push(e);
        }
        alle
    }

    /// Fuehrt die Sitzung als Offerer bis Established
    async fn aufgebaut(u: &mut Umgebung) -> u64 {
        u.neg.on_peer_joined(remote()).await.unwrap();
        u.neg.on_envelope(answer_envelope()).await.unwrap();
        let nummer = u.neg.sitzung(&remote()).unwrap().sitzung;
        u.neg
            .on_transport_event(zustand(nummer, TransportState::Connected))
            .await
            .unwrap();
        nummer
    }

    // --- Offerer ---

    #[tokio::test]
    async fn peer_joined_erzeugt_offer() {
        let mut u = aufbau();
        u.neg.on_peer_joined(remote()).await.unwrap();

        let info = u.neg.sitzung(&remote()).unwrap();
        assert_eq!(info.role, Role::Offerer);
        assert_eq!(info.phase, SessionPhase::LocalOfferCreated);
        assert_eq!(
            u.factory.transport(0).aufrufe(),
            vec!["create_offer", "local:sdp-offer"]
        );

        let gesendet = u.sink.letztes();
        assert_eq!(gesendet.kind, EnvelopeKind::Offer);
        assert_eq!(gesendet.sender, lokal());
        assert_eq!(gesendet.target, remote());
        let offer = SessionDescription::from_bytes(&gesendet.payload).unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);

        assert_eq!(
            alle_ereignisse(&mut u.ereignisse),
            vec![ClientEvent::PeerJoined { peer_id: remote() }]
        );
    }

    #[tokio::test]
    async fn answer_wird_genau_einmal_uebernommen() {
        let mut u = aufbau();
        u.neg.on_peer_joined(remote()).await.unwrap();

        u.neg.on_envelope(answer_envelope()).await.unwrap();
        assert!(u
            .factory
            .transport(0)
            .aufrufe()
            .contains(&"remote:remote-answer".to_string()));
        // Phase bleibt bis zur Transport-Meldung
        assert_eq!(
            u.neg.sitzung(&remote()).unwrap().phase,
            SessionPhase::LocalOfferCreated
        );

        let zweites = u.neg.on_envelope(answer_envelope()).await;
        assert!(matches!(zweites, Err(SessionError::Protokoll(_))));
    }

    #[tokio::test]
    async fn answer_ohne_offer_abgelehnt() {
        let mut u = aufbau();
        let err = u.neg.on_envelope(answer_envelope()).await.unwrap_err();
        assert!(matches!(err, SessionError::Protokoll(_)));
        assert!(u.neg.sitzung(&remote()).is_none());
    }

    #[tokio::test]
    async fn rejoin_ersetzt_sitzung() {
        let mut u = aufbau();
        u.neg.on_peer_joined(remote()).await.unwrap();
        let erste = u.neg.sitzung(&remote()).unwrap().sitzung;

        u.neg.on_peer_joined(remote()).await.unwrap();
        let zweite = u.neg.sitzung(&remote()).unwrap();
        assert_ne!(zweite.sitzung, erste);
        assert_eq!(zweite.phase, SessionPhase::LocalOfferCreated);
        assert_eq!(u.factory.anzahl(), 2);
        assert_eq!(u.factory.transport(0).aufrufe().last().unwrap(), "close");
    }

    // --- Answerer ---

    #[tokio::test]
    async fn offer_im_leerlauf_wird_beantwortet() {
        let mut u = aufbau();
        u.neg.on_envelope(offer_envelope()).await.unwrap();

        let info = u.neg.sitzung(&remote()).unwrap();
        assert_eq!(info.role, Role::Answerer);
        assert_eq!(info.phase, SessionPhase::LocalAnswerCreated);
        assert_eq!(
            u.factory.transport(0).aufrufe(),
            vec!["remote:remote-offer", "create_answer", "local:sdp-answer"]
        );
        assert_eq!(u.sink.arten(), vec![EnvelopeKind::Answer]);
    }

    #[tokio::test]
    async fn zweites_offer_bei_laufender_sitzung_abgelehnt() {
        let mut u = aufbau();
        u.neg.on_envelope(offer_envelope()).await.unwrap();

        let err = u.neg.on_envelope(offer_envelope()).await.unwrap_err();
        assert!(matches!(err, SessionError::Protokoll(_)));
        assert_eq!(u.factory.anzahl(), 1, "Transport darf nicht ersetzt werden");
        assert_eq!(u.neg.role(&remote()), Role::Answerer);
    }

    #[tokio::test]
    async fn offer_nach_beendeter_sitzung_startet_neu() {
        let mut u = aufbau();
        u.neg.on_envelope(offer_envelope()).await.unwrap();
        let nummer = u.neg.sitzung(&remote()).unwrap().sitzung;
        u.neg
            .on_transport_event(zustand(nummer, TransportState::Failed))
            .await
            .unwrap();

        u.neg.on_envelope(offer_envelope()).await.unwrap();
        let info = u.neg.sitzung(&remote()).unwrap();
        assert_eq!(info.phase, SessionPhase::LocalAnswerCreated);
        assert_ne!(info.sitzung, nummer);
        assert_eq!(u.factory.anzahl(), 2);
    }

    #[tokio::test]
    async fn answer_als_offer_verpackt_abgelehnt() {
        let mut u = aufbau();
        let falsch = envelope(
            EnvelopeKind::Offer,
            SessionDescription::answer("x").to_bytes().unwrap(),
        );
        assert!(matches!(
            u.neg.on_envelope(falsch).await,
            Err(SessionError::Protokoll(_))
        ));
        assert_eq!(u.factory.anzahl(), 0);
    }

    #[tokio::test]
    async fn role_ist_unbestimmt_ohne_sitzung() {
        let u = aufbau();
        assert_eq!(u.neg.role(&remote()), Role::Undetermined);
    }

    // --- Kandidaten ---

    #[tokio::test]
    async fn kandidat_ohne_transport_abgelehnt() {
        let mut u = aufbau();
        let kandidat = envelope(
            EnvelopeKind::IceCandidate,
            IceCandidate::new("candidate:1").to_bytes().unwrap(),
        );
        assert!(matches!(
            u.neg.on_envelope(kandidat).await,
            Err(SessionError::Protokoll(_))
        ));
    }

    #[tokio::test]
    async fn kandidat_wird_an_transport_gereicht() {
        let mut u = aufbau();
        u.neg.on_peer_joined(remote()).await.unwrap();
        let kandidat = envelope(
            EnvelopeKind::IceCandidate,
            IceCandidate::new("candidate:1").to_bytes().unwrap(),
        );
        u.neg.on_envelope(kandidat).await.unwrap();
        assert_eq!(
            u.factory.transport(0).aufrufe().last().unwrap(),
            "kandidat:candidate:1"
        );
    }

    #[tokio::test]
    async fn lokaler_kandidat_wird_signalisiert() {
        let mut u = aufbau();
        u.neg.on_peer_joined(remote()).await.unwrap();
        let nummer = u.neg.sitzung(&remote()).unwrap().sitzung;

        u.neg
            .on_transport_event(event(
                nummer,
                TransportEventKind::LocalCandidate(IceCandidate::new("candidate:lokal")),
            ))
            .await
            .unwrap();

        let gesendet = u.sink.letztes();
        assert_eq!(gesendet.kind, EnvelopeKind::IceCandidate);
        let kandidat = IceCandidate::from_bytes(&gesendet.payload).unwrap();
        assert_eq!(kandidat.candidate, "candidate:lokal");
    }

    // --- Transport-Zustaende ---

    #[tokio::test]
    async fn connected_veroeffentlicht_schluessel_einmal() {
        let mut u = aufbau();
        let nummer = aufgebaut(&mut u).await;

        let info = u.neg.sitzung(&remote()).unwrap();
        assert_eq!(info.phase, SessionPhase::Established);
        assert!(info.schluessel_veroeffentlicht);

        u.neg
            .on_transport_event(zustand(nummer, TransportState::Connected))
            .await
            .unwrap();

        let schluessel_envelopes = u
            .sink
            .arten()
            .into_iter()
            .filter(|k| *k == EnvelopeKind::KeyExchange)
            .count();
        assert_eq!(schluessel_envelopes, 1);
        assert!(alle_ereignisse(&mut u.ereignisse)
            .contains(&ClientEvent::SessionEstablished { peer_id: remote() }));
    }

    #[tokio::test]
    async fn abgewiesener_schluessel_wird_nachgeholt() {
        let mut u = aufbau();
        *u.sink.schluessel_ablehnen.lock() = 2;
        u.neg.on_peer_joined(remote()).await.unwrap();
        u.neg.on_envelope(answer_envelope()).await.unwrap();
        let nummer = u.neg.sitzung(&remote()).unwrap().sitzung;

        // Erster Versuch beim Verbindungsaufbau scheitert an der Queue
        assert!(u
            .neg
            .on_transport_event(zustand(nummer, TransportState::Connected))
            .await
            .is_err());
        let info = u.neg.sitzung(&remote()).unwrap();
        assert_eq!(info.phase, SessionPhase::Established);
        assert!(!info.schluessel_veroeffentlicht);

        // Wiederholtes Connected versucht es erneut
        assert!(u
            .neg
            .on_transport_event(zustand(nummer, TransportState::Connected))
            .await
            .is_err());

        // Der Pruef-Takt holt es nach, danach nie wieder
        assert_eq!(u.neg.ausstehende_schluessel_veroeffentlichen(), 1);
        assert_eq!(u.neg.ausstehende_schluessel_veroeffentlichen(), 0);
        u.neg
            .on_transport_event(zustand(nummer, TransportState::Connected))
            .await
            .unwrap();

        assert!(u.neg.sitzung(&remote()).unwrap().schluessel_veroeffentlicht);
        let schluessel_envelopes = u
            .sink
            .arten()
            .into_iter()
            .filter(|k| *k == EnvelopeKind::KeyExchange)
            .count();
        assert_eq!(schluessel_envelopes, 1);
        let established = alle_ereignisse(&mut u.ereignisse)
            .into_iter()
            .filter(|e| matches!(e, ClientEvent::SessionEstablished { .. }))
            .count();
        assert_eq!(established, 1);
    }

    #[tokio::test]
    async fn ausfall_beendet_sitzung() {
        let mut u = aufbau();
        let nummer = aufgebaut(&mut u).await;
        alle_ereignisse(&mut u.ereignisse);

        u.neg
            .on_transport_event(zustand(nummer, TransportState::Failed))
            .await
            .unwrap();

        assert_eq!(
            u.neg.sitzung(&remote()).unwrap().phase,
            SessionPhase::Terminated
        );
        let ereignisse = alle_ereignisse(&mut u.ereignisse);
        assert!(matches!(
            ereignisse.as_slice(),
            [ClientEvent::TransportFailure { .. }]
        ));

        // Senden auf beendeter Sitzung schlaegt fehl
        let err = u
            .neg
            .send_message(&remote(), &ChatContent::text("hallo"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Protokoll(_)));
    }

    #[tokio::test]
    async fn veraltetes_ereignis_ignoriert() {
        let mut u = aufbau();
        u.neg.on_peer_joined(remote()).await.unwrap();
        let alt = u.neg.sitzung(&remote()).unwrap().sitzung;
        u.neg.on_peer_joined(remote()).await.unwrap();

        u.neg
            .on_transport_event(zustand(alt, TransportState::Failed))
            .await
            .unwrap();
        assert_eq!(
            u.neg.sitzung(&remote()).unwrap().phase,
            SessionPhase::LocalOfferCreated
        );
    }

    // --- Zeitlimit ---

    #[tokio::test]
    async fn zeitlimit_beendet_nur_haengende_sitzungen() {
        let mut u = aufbau();
        u.neg.on_peer_joined(remote()).await.unwrap();
        let andere = PeerId::from_string("andere");
        u.neg
            .on_envelope(Envelope::new(
                EnvelopeKind::Offer,
                andere.clone(),
                lokal(),
                SessionDescription::offer("x").to_bytes().unwrap(),
            ))
            .await
            .unwrap();
        let nummer = u.neg.sitzung(&andere).unwrap().sitzung;
        u.neg
            .on_transport_event(TransportEvent {
                peer_id: andere.clone(),
                sitzung: nummer,
                kind: TransportEventKind::StateChanged(TransportState::Connected),
            })
            .await
            .unwrap();
        alle_ereignisse(&mut u.ereignisse);

        let vorher = Instant::now() + Duration::from_secs(5);
        assert_eq!(u.neg.check_timeouts(vorher).await, 0);

        let spaeter = Instant::now() + Duration::from_secs(31);
        assert_eq!(u.neg.check_timeouts(spaeter).await, 1);

        assert_eq!(
            u.neg.sitzung(&remote()).unwrap().phase,
            SessionPhase::Terminated
        );
        assert_eq!(
            u.neg.sitzung(&andere).unwrap().phase,
            SessionPhase::Established
        );
        assert_eq!(
            alle_ereignisse(&mut u.ereignisse),
            vec![ClientEvent::NegotiationTimeout { peer_id: remote() }]
        );

        // Beendete Sitzungen laufen nicht erneut ab
        assert_eq!(u.neg.check_timeouts(spaeter).await, 0);
    }

    // --- Schluessel und Nachrichten ---

    #[tokio::test]
    async fn key_exchange_wird_importiert() {
        let mut u = aufbau();
        let krypto = X25519AesGcm;
        let paar = krypto.generate_asymmetric_key_pair().unwrap();
        let bytes = krypto.export_public_key(&paar.public_key).unwrap();

        u.neg
            .on_envelope(envelope(EnvelopeKind::KeyExchange, bytes))
            .await
            .unwrap();
        assert!(u.neg.schluessel().lookup(&remote()).is_some());
        assert_eq!(
            alle_ereignisse(&mut u.ereignisse),
            vec![ClientEvent::PeerKeyReceived { peer_id: remote() }]
        );
    }

    #[tokio::test]
    async fn ungueltiger_schluessel_abgelehnt() {
        let mut u = aufbau();
        let err = u
            .neg
            .on_envelope(envelope(EnvelopeKind::KeyExchange, vec![1, 2, 3]))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Krypto(_)));
        assert!(u.neg.schluessel().lookup(&remote()).is_none());
    }

    #[tokio::test]
    async fn nachricht_ohne_peer_schluessel_scheitert() {
        let mut u = aufbau();
        aufgebaut(&mut u).await;

        let err = u
            .neg
            .send_message(&remote(), &ChatContent::text("hallo"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Krypto(hushlink_crypto::CryptoError::KeinPeerSchluessel { .. })
        ));
        assert!(u.factory.transport(0).gesendet.lock().is_empty());
    }

    #[tokio::test]
    async fn empfangene_nachricht_wird_entschluesselt() {
        let mut u = aufbau();
        let nummer = aufgebaut(&mut u).await;
        alle_ereignisse(&mut u.ereignisse);

        // Gegenseite importiert den veroeffentlichten Schluessel und verschluesselt
        let veroeffentlicht = u
            .sink
            .envelopes
            .lock()
            .iter()
            .find(|e| e.kind == EnvelopeKind::KeyExchange)
            .cloned()
            .unwrap();
        let krypto: Arc<dyn CryptoCapability> = Arc::new(X25519AesGcm);
        let gegenseite = Arc::new(KeyExchangeManager::new(
            remote(),
            Arc::clone(&krypto),
            Arc::new(SammelSink::default()),
        ));
        gegenseite
            .import_from(&lokal(), &veroeffentlicht.payload)
            .unwrap();
        let cipher = HybridCipher::new(krypto, gegenseite);
        let paket = cipher
            .seal_content(&lokal(), &ChatContent::text("hallo lokal"))
            .unwrap();

        u.neg
            .on_transport_event(event(
                nummer,
                TransportEventKind::DataReceived(paket.to_bytes().unwrap()),
            ))
            .await
            .unwrap();

        assert_eq!(
            alle_ereignisse(&mut u.ereignisse),
            vec![ClientEvent::MessageReceived {
                peer_id: remote(),
                content: ChatContent::text("hallo lokal"),
            }]
        );
    }

    #[tokio::test]
    async fn kaputtes_paket_wird_verworfen() {
        let mut u = aufbau();
        let nummer = aufgebaut(&mut u).await;
        alle_ereignisse(&mut u.ereignisse);

        u.neg
            .on_transport_event(event(nummer, TransportEventKind::DataReceived(vec![0; 8])))
            .await
            .unwrap();

        assert!(matches!(
            alle_ereignisse(&mut u.ereignisse).as_slice(),
            [ClientEvent::MessageDropped { .. }]
        ));
        assert_eq!(
            u.neg.sitzung(&remote()).unwrap().phase,
            SessionPhase::Established
        );
    }

    #[tokio::test]
    async fn nachricht_wird_verschluesselt_gesendet() {
        let mut u = aufbau();
        aufgebaut(&mut u).await;

        let krypto = X25519AesGcm;
        let paar = krypto.generate_asymmetric_key_pair().unwrap();
        let bytes = krypto.export_public_key(&paar.public_key).unwrap();
        u.neg
            .on_envelope(envelope(EnvelopeKind::KeyExchange, bytes))
            .await
            .unwrap();

        u.neg
            .send_message(&remote(), &ChatContent::text("geheim"))
            .await
            .unwrap();

        let gesendet = u.factory.transport(0).gesendet.lock().clone();
        assert_eq!(gesendet.len(), 1);
        let paket = EncryptedPackage::from_bytes(&gesendet[0]).unwrap();
        assert!(!paket
            .ciphertext
            .windows(b"geheim".len())
            .any(|w| w == b"geheim"));
    }

    // --- Verlassen ---

    #[tokio::test]
    async fn peer_left_entfernt_sitzung_und_schluessel() {
        let mut u = aufbau();
        aufgebaut(&mut u).await;
        let krypto = X25519AesGcm;
        let paar = krypto.generate_asymmetric_key_pair().unwrap();
        u.neg
            .schluessel()
            .import_from(&remote(), &krypto.export_public_key(&paar.public_key).unwrap())
            .unwrap();
        alle_ereignisse(&mut u.ereignisse);

        assert!(u.neg.on_peer_left(&remote()).await);
        assert!(u.neg.sitzung(&remote()).is_none());
        assert!(u.neg.schluessel().lookup(&remote()).is_none());
        assert_eq!(u.factory.transport(0).aufrufe().last().unwrap(), "close");
        assert_eq!(
            alle_ereignisse(&mut u.ereignisse),
            vec![ClientEvent::PeerLeft { peer_id: remote() }]
        );

        assert!(!u.neg.on_peer_left(&remote()).await);
    }

    #[tokio::test]
    async fn envelope_fuer_fremden_empfaenger_abgelehnt() {
        let mut u = aufbau();
        let fremd = Envelope::new(
            EnvelopeKind::Offer,
            remote(),
            PeerId::from_string("dritter"),
            SessionDescription::offer("x").to_bytes().unwrap(),
        );
        assert!(matches!(
            u.neg.on_envelope(fremd).await,
            Err(SessionError::Protokoll(_))
        ));
    }
}

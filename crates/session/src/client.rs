//! Peer-Client: Relay-Verbindung plus Session-Aushandlung
//!
//! Ein Task pro Client besitzt Relay-Stream, Negotiator und alle Queues.
//! Die Anwendung steuert ihn ueber einen [`ClientHandle`] und bekommt
//! [`ClientEvent`]s ueber einen mpsc-Kanal.
//!
//! ```text
//! Relay-Frames ──┐
//! Transport ─────┼──> client_schleife ──> SessionNegotiator
//! Befehle ───────┤                   └──> Relay-Queue ──> Relay
//! Zeitlimit-Tick ┘
//! ```

use futures_util::{SinkExt, StreamExt};
use hushlink_core::{PeerId, RoomId};
use hushlink_crypto::{CryptoCapability, KeyExchangeManager};
use hushlink_protocol::{ChatContent, Envelope, EnvelopeSink, FrameCodec, RelayFrame};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::Framed;

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::events::{melden, ClientEvent};
use crate::negotiator::{SessionInfo, SessionNegotiator};
use crate::transport::{TransportEvent, TransportFactory};

// ---------------------------------------------------------------------------
// RelaySink
// ---------------------------------------------------------------------------

/// Legt ausgehende Envelopes als `signal`-Frames in die Relay-Queue
#[derive(Clone)]
pub struct RelaySink {
    tx: mpsc::Sender<RelayFrame>,
}

impl RelaySink {
    pub fn neu(tx: mpsc::Sender<RelayFrame>) -> Self {
        Self { tx }
    }
}

impl EnvelopeSink for RelaySink {
    fn senden(&self, envelope: Envelope) -> bool {
        match self.tx.try_send(RelayFrame::signal(envelope)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Relay-Queue voll, Envelope verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Befehle und Handle
// ---------------------------------------------------------------------------

enum Befehl {
    Join {
        raum: RoomId,
    },
    Senden {
        peer: PeerId,
        content: ChatContent,
        antwort: oneshot::Sender<SessionResult<()>>,
    },
    Sitzungen {
        antwort: oneshot::Sender<Vec<(PeerId, SessionInfo)>>,
    },
    Beenden,
}

/// Steuerung eines laufenden Peer-Clients
pub struct ClientHandle {
    peer_id: PeerId,
    befehle: mpsc::Sender<Befehl>,
    task: JoinHandle<()>,
}

impl ClientHandle {
    /// Vom Relay vergebene eigene PeerId
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Betritt einen Raum (verlaesst einen vorherigen implizit)
    pub async fn join(&self, raum: RoomId) -> SessionResult<()> {
        self.befehle
            .send(Befehl::Join { raum })
            .await
            .map_err(|_| SessionError::Beendet)
    }

    /// Verschluesselt und sendet `content` an `peer`
    pub async fn senden(&self, peer: &PeerId, content: ChatContent) -> SessionResult<()> {
        let (antwort, rx) = oneshot::channel();
        self.befehle
            .send(Befehl::Senden {
                peer: peer.clone(),
                content,
                antwort,
            })
            .await
            .map_err(|_| SessionError::Beendet)?;
        rx.await.map_err(|_| SessionError::Beendet)?
    }

    pub async fn text_senden(&self, peer: &PeerId, text: impl Into<String>) -> SessionResult<()> {
        self.senden(peer, ChatContent::text(text)).await
    }

    pub async fn bild_senden(&self, peer: &PeerId, bild: Vec<u8>) -> SessionResult<()> {
        self.senden(peer, ChatContent::image(bild)).await
    }

    /// Aktueller Zustand aller Sitzungen
    pub async fn sitzungen(&self) -> SessionResult<Vec<(PeerId, SessionInfo)>> {
        let (antwort, rx) = oneshot::channel();
        self.befehle
            .send(Befehl::Sitzungen { antwort })
            .await
            .map_err(|_| SessionError::Beendet)?;
        rx.await.map_err(|_| SessionError::Beendet)
    }

    /// Schliesst alle Transports und die Relay-Verbindung
    pub async fn beenden(self) {
        let _ = self.befehle.send(Befehl::Beenden).await;
        if let Err(e) = self.task.await {
            tracing::warn!(fehler = %e, "Client-Task nicht sauber beendet");
        }
    }
}

// ---------------------------------------------------------------------------
// PeerClient
// ---------------------------------------------------------------------------

/// Baut Client-Verbindungen zum Relay auf
pub struct PeerClient {
    config: SessionConfig,
    krypto: Arc<dyn CryptoCapability>,
    factory: Arc<dyn TransportFactory>,
}

impl PeerClient {
    pub fn neu(
        config: SessionConfig,
        krypto: Arc<dyn CryptoCapability>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            config,
            krypto,
            factory,
        }
    }

    /// Verbindet per TCP mit dem Relay
    pub async fn verbinden(
        &self,
        addr: impl ToSocketAddrs,
    ) -> SessionResult<(ClientHandle, mpsc::Receiver<ClientEvent>)> {
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SessionError::Relay("Zeitlimit beim Verbindungsaufbau".into()))??;
        stream.set_nodelay(true)?;
        tracing::info!(relay = ?stream.peer_addr().ok(), "TCP-Verbindung zum Relay hergestellt");

        self.ueber_stream(stream).await
    }

    /// Startet den Client auf einem bestehenden Stream
    ///
    /// Wartet auf das `welcome` des Relays; erst danach ist die eigene
    /// PeerId bekannt und das Schluessel-Paar wird erzeugt.
    pub async fn ueber_stream<S>(
        &self,
        stream: S,
    ) -> SessionResult<(ClientHandle, mpsc::Receiver<ClientEvent>)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut framed = Framed::new(stream, FrameCodec::with_max_size(self.config.max_frame_size));
        let peer_id = tokio::time::timeout(self.config.connect_timeout, welcome_abwarten(&mut framed))
            .await
            .map_err(|_| SessionError::Relay("Kein welcome vom Relay".into()))??;
        tracing::info!(peer_id = %peer_id, "Vom Relay begruesst");

        let (relay_tx, relay_rx) = mpsc::channel(self.config.relay_queue_size);
        let (transport_tx, transport_rx) = mpsc::channel(self.config.event_queue_size);
        let (ereignis_tx, ereignis_rx) = mpsc::channel(self.config.event_queue_size);
        let (befehl_tx, befehl_rx) = mpsc::channel(16);

        let sink: Arc<dyn EnvelopeSink> = Arc::new(RelaySink::neu(relay_tx));
        let schluessel = Arc::new(KeyExchangeManager::new(
            peer_id.clone(),
            Arc::clone(&self.krypto),
            Arc::clone(&sink),
        ));
        schluessel.ensure_local_key_pair()?;

        let negotiator = SessionNegotiator::neu(
            self.config.clone(),
            Arc::clone(&self.factory),
            sink,
            Arc::clone(&self.krypto),
            schluessel,
            transport_tx,
            ereignis_tx.clone(),
        );

        let schleife = ClientSchleife {
            negotiator,
            relay_rx,
            transport_rx,
            befehle: befehl_rx,
            ereignisse: ereignis_tx,
            pruefintervall: self.config.timeout_check_interval,
        };
        let task = tokio::spawn(schleife.laufen(framed));

        Ok((
            ClientHandle {
                peer_id,
                befehle: befehl_tx,
                task,
            },
            ereignis_rx,
        ))
    }
}

/// Liest Frames bis zum `welcome`, beantwortet Pings unterwegs
async fn welcome_abwarten<S>(framed: &mut Framed<S, FrameCodec>) -> SessionResult<PeerId>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match framed.next().await {
            Some(Ok(RelayFrame::Welcome { peer_id })) => return Ok(peer_id),
            Some(Ok(RelayFrame::Ping { timestamp_ms })) => {
                framed.send(RelayFrame::pong(timestamp_ms)).await?;
            }
            Some(Ok(RelayFrame::Error { code, message })) => {
                return Err(SessionError::Relay(format!("{code:?}: {message}")));
            }
            Some(Ok(andere)) => {
                return Err(SessionError::protokoll(format!(
                    "Erwartet welcome, erhalten {}",
                    andere.typ_name()
                )));
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(SessionError::Relay(
                    "Verbindung vor dem welcome getrennt".into(),
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Client-Schleife
// ---------------------------------------------------------------------------

struct ClientSchleife {
    negotiator: SessionNegotiator,
    relay_rx: mpsc::Receiver<RelayFrame>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    befehle: mpsc::Receiver<Befehl>,
    ereignisse: mpsc::Sender<ClientEvent>,
    pruefintervall: std::time::Duration,
}

impl ClientSchleife {
    async fn laufen<S>(mut self, mut framed: Framed<S, FrameCodec>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut pruefung = tokio::time::interval(self.pruefintervall);
        pruefung.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let grund: String = loop {
            tokio::select! {
                frame = framed.next() => match frame {
                    Some(Ok(frame)) => {
                        if let Some(antwort) = self.relay_frame(frame).await {
                            if let Err(e) = framed.send(antwort).await {
                                break format!("Schreibfehler: {e}");
                            }
                        }
                    }
                    Some(Err(e)) => break format!("Lesefehler: {e}"),
                    None => break "Relay hat die Verbindung getrennt".into(),
                },

                Some(frame) = self.relay_rx.recv() => {
                    tracing::trace!(typ = frame.typ_name(), "Frame an Relay");
                    if let Err(e) = framed.send(frame).await {
                        break format!("Schreibfehler: {e}");
                    }
                }

                Some(event) = self.transport_rx.recv() => {
                    let peer = event.peer_id.clone();
                    if let Err(e) = self.negotiator.on_transport_event(event).await {
                        self.abgelehnt(peer, e);
                    }
                }

                befehl = self.befehle.recv() => match befehl {
                    Some(Befehl::Join { raum }) => {
                        tracing::info!(raum = %raum, "Raum betreten");
                        if let Err(e) = framed.send(RelayFrame::join(raum.as_str())).await {
                            break format!("Schreibfehler: {e}");
                        }
                    }
                    Some(Befehl::Senden { peer, content, antwort }) => {
                        let ergebnis = self.negotiator.send_message(&peer, &content).await;
                        let _ = antwort.send(ergebnis);
                    }
                    Some(Befehl::Sitzungen { antwort }) => {
                        let _ = antwort.send(self.negotiator.sitzungen());
                    }
                    Some(Befehl::Beenden) | None => break "Client beendet".into(),
                },

                _ = pruefung.tick() => {
                    self.negotiator.check_timeouts(Instant::now()).await;
                    self.negotiator.ausstehende_schluessel_veroeffentlichen();
                }
            }
        };

        tracing::info!(grund = %grund, "Client-Verbindung beendet");
        self.negotiator.schliessen().await;
        melden(&self.ereignisse, ClientEvent::Disconnected { reason: grund });
    }

    /// Verarbeitet einen Frame vom Relay, liefert ggf. eine direkte Antwort
    async fn relay_frame(&mut self, frame: RelayFrame) -> Option<RelayFrame> {
        match frame {
            RelayFrame::Deliver { envelope } => {
                let absender = envelope.sender.clone();
                if let Err(e) = self.negotiator.on_envelope(envelope).await {
                    self.abgelehnt(absender, e);
                }
                None
            }
            RelayFrame::PeerJoined { peer_id } => {
                if let Err(e) = self.negotiator.on_peer_joined(peer_id.clone()).await {
                    self.abgelehnt(peer_id, e);
                }
                None
            }
            RelayFrame::PeerLeft { peer_id } => {
                self.negotiator.on_peer_left(&peer_id).await;
                None
            }
            RelayFrame::Ping { timestamp_ms } => Some(RelayFrame::pong(timestamp_ms)),
            RelayFrame::Pong { .. } => None,
            RelayFrame::Error { code, message } => {
                tracing::warn!(?code, message = %message, "Fehler vom Relay");
                melden(&self.ereignisse, ClientEvent::RelayError { code, message });
                None
            }
            andere => {
                tracing::warn!(typ = andere.typ_name(), "Unerwarteter Frame vom Relay ignoriert");
                None
            }
        }
    }

    fn abgelehnt(&self, peer: PeerId, fehler: SessionError) {
        tracing::warn!(peer_id = %peer.kurz(), fehler = %fehler, "Signal verworfen");
        melden(
            &self.ereignisse,
            ClientEvent::SignalRejected {
                peer_id: peer,
                reason: fehler.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNetwork;
    use hushlink_crypto::X25519AesGcm;
    use hushlink_protocol::ErrorCode;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    type RelaySeite = Framed<DuplexStream, FrameCodec>;

    fn client() -> PeerClient {
        PeerClient::neu(
            SessionConfig {
                connect_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            Arc::new(X25519AesGcm),
            Arc::new(MemoryNetwork::neu()),
        )
    }

    fn paar() -> (DuplexStream, RelaySeite) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (a, Framed::new(b, FrameCodec::new()))
    }

    async fn naechster(relay: &mut RelaySeite) -> RelayFrame {
        tokio::time::timeout(Duration::from_secs(2), relay.next())
            .await
            .expect("Zeitlimit")
            .expect("Stream beendet")
            .expect("Dekodierfehler")
    }

    async fn naechstes_ereignis(rx: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Zeitlimit")
            .expect("Kanal geschlossen")
    }

    async fn begruesster_client(
        relay: &mut RelaySeite,
        stream: DuplexStream,
    ) -> (ClientHandle, mpsc::Receiver<ClientEvent>) {
        relay
            .send(RelayFrame::Welcome {
                peer_id: PeerId::from_string("ich"),
            })
            .await
            .unwrap();
        client().ueber_stream(stream).await.unwrap()
    }

    #[tokio::test]
    async fn welcome_liefert_peer_id() {
        let (stream, mut relay) = paar();
        let (handle, _rx) = begruesster_client(&mut relay, stream).await;
        assert_eq!(handle.peer_id().as_str(), "ich");
        handle.beenden().await;
    }

    #[tokio::test]
    async fn fehler_vor_welcome_bricht_ab() {
        let (stream, mut relay) = paar();
        relay
            .send(RelayFrame::error(ErrorCode::ServerFull, "voll"))
            .await
            .unwrap();

        let ergebnis = client().ueber_stream(stream).await;
        assert!(matches!(ergebnis, Err(SessionError::Relay(_))));
    }

    #[tokio::test]
    async fn join_wird_gesendet() {
        let (stream, mut relay) = paar();
        let (handle, _rx) = begruesster_client(&mut relay, stream).await;

        handle.join(RoomId::neu("lobby").unwrap()).await.unwrap();
        assert_eq!(naechster(&mut relay).await, RelayFrame::join("lobby"));
        handle.beenden().await;
    }

    #[tokio::test]
    async fn ping_wird_beantwortet() {
        let (stream, mut relay) = paar();
        let (handle, _rx) = begruesster_client(&mut relay, stream).await;

        relay.send(RelayFrame::ping(42)).await.unwrap();
        assert_eq!(naechster(&mut relay).await, RelayFrame::pong(42));
        handle.beenden().await;
    }

    #[tokio::test]
    async fn peer_joined_loest_offer_aus() {
        let (stream, mut relay) = paar();
        let (handle, mut rx) = begruesster_client(&mut relay, stream).await;

        relay
            .send(RelayFrame::PeerJoined {
                peer_id: PeerId::from_string("du"),
            })
            .await
            .unwrap();

        match naechster(&mut relay).await {
            RelayFrame::Signal { envelope } => {
                assert_eq!(envelope.kind, hushlink_protocol::EnvelopeKind::Offer);
                assert_eq!(envelope.target.as_str(), "du");
            }
            andere => panic!("Erwartet signal, erhalten {andere:?}"),
        }
        assert_eq!(
            naechstes_ereignis(&mut rx).await,
            ClientEvent::PeerJoined {
                peer_id: PeerId::from_string("du")
            }
        );
        handle.beenden().await;
    }

    #[tokio::test]
    async fn relay_fehler_wird_gemeldet() {
        let (stream, mut relay) = paar();
        let (handle, mut rx) = begruesster_client(&mut relay, stream).await;

        relay
            .send(RelayFrame::error(ErrorCode::InvalidRoom, "leer"))
            .await
            .unwrap();
        assert_eq!(
            naechstes_ereignis(&mut rx).await,
            ClientEvent::RelayError {
                code: ErrorCode::InvalidRoom,
                message: "leer".into()
            }
        );
        handle.beenden().await;
    }

    #[tokio::test]
    async fn ungueltiges_signal_wird_gemeldet() {
        let (stream, mut relay) = paar();
        let (handle, mut rx) = begruesster_client(&mut relay, stream).await;

        let answer = Envelope::new(
            hushlink_protocol::EnvelopeKind::Answer,
            PeerId::from_string("du"),
            PeerId::from_string("ich"),
            b"{}".to_vec(),
        );
        relay.send(RelayFrame::deliver(answer)).await.unwrap();

        assert!(matches!(
            naechstes_ereignis(&mut rx).await,
            ClientEvent::SignalRejected { .. }
        ));
        handle.beenden().await;
    }

    #[tokio::test]
    async fn trennung_durch_relay_wird_gemeldet() {
        let (stream, mut relay) = paar();
        let (_handle, mut rx) = begruesster_client(&mut relay, stream).await;

        drop(relay);
        assert!(matches!(
            naechstes_ereignis(&mut rx).await,
            ClientEvent::Disconnected { .. }
        ));
    }

    #[tokio::test]
    async fn senden_ohne_sitzung_schlaegt_fehl() {
        let (stream, mut relay) = paar();
        let (handle, _rx) = begruesster_client(&mut relay, stream).await;

        let err = handle
            .text_senden(&PeerId::from_string("du"), "hallo")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Protokoll(_)));
        handle.beenden().await;
    }

    #[test]
    fn relay_sink_meldet_volle_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = RelaySink::neu(tx);
        let envelope = Envelope::new(
            hushlink_protocol::EnvelopeKind::Offer,
            PeerId::from_string("a"),
            PeerId::from_string("b"),
            vec![],
        );
        assert!(sink.senden(envelope.clone()));
        assert!(!sink.senden(envelope));
    }
}

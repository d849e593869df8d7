//! Peer-Connection – Verwaltet eine einzelne Relay-Verbindung
//!
//! Jede TCP-Verbindung bekommt eine `PeerConnection` in einem eigenen
//! tokio-Task.
//!
//! ## Ablauf
//! 1. PeerId vergeben, im Hub registrieren, `welcome` senden
//! 2. Schleife ueber eingehende Frames, Hub-Queue, Keepalive und Shutdown
//! 3. Beim Ende: `on_disconnect` im Hub
//!
//! ## Keepalive
//! - Relay sendet alle `keepalive` einen Ping
//! - Kommt laenger als `idle_timeout` kein Frame, wird getrennt

use futures_util::{SinkExt, StreamExt};
use hushlink_core::{PeerId, RoomId};
use hushlink_protocol::{ErrorCode, RelayFrame, TolerantFrameCodec};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::codec::Framed;

use crate::error::{SignalingError, SignalingResult};
use crate::hub::RelayHub;

/// Aktueller Zeitstempel in Millisekunden (Unix-Epoch)
pub(crate) fn jetzt_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Verarbeitet eine einzelne Relay-Verbindung
pub struct PeerConnection {
    hub: RelayHub,
    peer_addr: SocketAddr,
    peer_id: PeerId,
}

impl PeerConnection {
    /// Erstellt eine neue Verbindung mit frisch vergebener PeerId
    pub fn neu(hub: RelayHub, peer_addr: SocketAddr) -> Self {
        Self {
            hub,
            peer_addr,
            peer_id: PeerId::new(),
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt wird, der Peer zu lange schweigt
    /// oder ein Shutdown-Signal eingeht. Der Hub wird in jedem Fall bereinigt.
    pub async fn verarbeiten<S>(self, stream: S, shutdown_rx: tokio::sync::watch::Receiver<bool>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer_id = self.peer_id.clone();
        tracing::info!(peer = %self.peer_addr, peer_id = %peer_id.kurz(), "Neue Verbindung");

        match self.schleife(stream, shutdown_rx).await {
            Ok(()) => {}
            Err(SignalingError::VerbindungGetrennt) => {
                tracing::info!(peer_id = %peer_id.kurz(), "Verbindung vom Peer getrennt");
            }
            Err(e) => {
                tracing::warn!(peer_id = %peer_id.kurz(), fehler = %e, "Verbindung beendet");
            }
        }

        self.hub.on_disconnect(&peer_id);
        tracing::info!(peer = %self.peer_addr, peer_id = %peer_id.kurz(), "Verbindungs-Task beendet");
    }

    async fn schleife<S>(
        &self,
        stream: S,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> SignalingResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let config = self.hub.config().clone();
        let mut framed = Framed::new(stream, TolerantFrameCodec::with_max_size(config.max_frame_size));

        // Registrierung vor dem Welcome: ab jetzt ist der Peer adressierbar
        let mut hub_rx = self.hub.register(self.peer_id.clone());
        framed
            .send(RelayFrame::Welcome {
                peer_id: self.peer_id.clone(),
            })
            .await?;

        let mut letzter_empfang = Instant::now();
        let mut keepalive = tokio::time::interval_at(Instant::now() + config.keepalive, config.keepalive);

        loop {
            let timeout_ab = letzter_empfang + config.idle_timeout;

            tokio::select! {
                // Eingehender Frame vom Peer
                frame = framed.next() => {
                    match frame {
                        Some(Ok(Ok(frame))) => {
                            letzter_empfang = Instant::now();
                            if let Some(antwort) = self.frame_verarbeiten(frame) {
                                framed.send(antwort).await?;
                            }
                        }
                        // Frame verworfen, Verbindung bleibt bestehen
                        Some(Ok(Err(ungueltig))) => {
                            letzter_empfang = Instant::now();
                            tracing::debug!(
                                peer_id = %self.peer_id.kurz(),
                                fehler = %ungueltig,
                                "Unlesbarer Frame verworfen"
                            );
                            framed
                                .send(RelayFrame::error(ErrorCode::InvalidRequest, ungueltig.to_string()))
                                .await?;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(
                                peer_id = %self.peer_id.kurz(),
                                fehler = %e,
                                "Frame-Lesefehler"
                            );
                            let _ = framed
                                .send(RelayFrame::error(ErrorCode::InvalidRequest, e.to_string()))
                                .await;
                            return Err(SignalingError::protokoll(e.to_string()));
                        }
                        None => return Err(SignalingError::VerbindungGetrennt),
                    }
                }

                // Ausgehender Frame aus dem Hub
                Some(ausgehend) = hub_rx.recv() => {
                    framed.send(ausgehend).await?;
                }

                // Keepalive-Ping
                _ = keepalive.tick() => {
                    framed.send(RelayFrame::ping(jetzt_ms())).await?;
                }

                // Idle-Timeout
                _ = tokio::time::sleep_until(timeout_ab) => {
                    tracing::warn!(peer_id = %self.peer_id.kurz(), "Verbindungs-Timeout");
                    return Err(SignalingError::Timeout);
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer_id = %self.peer_id.kurz(), "Shutdown-Signal – Verbindung wird getrennt");
                        let abschied = RelayFrame::error(
                            ErrorCode::InternalError,
                            "Relay wird heruntergefahren",
                        );
                        let _ = framed.send(abschied).await;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Verarbeitet einen Frame und gibt ggf. eine direkte Antwort zurueck
    fn frame_verarbeiten(&self, frame: RelayFrame) -> Option<RelayFrame> {
        tracing::trace!(peer_id = %self.peer_id.kurz(), frame = frame.typ_name(), "Frame empfangen");

        match frame {
            RelayFrame::Join { room_id } => {
                let raum = match RoomId::neu(&room_id) {
                    Ok(raum) => raum,
                    Err(e) => return Some(RelayFrame::error(ErrorCode::InvalidRoom, e.to_string())),
                };
                match self.hub.join(&self.peer_id, raum) {
                    Ok(_) => None,
                    Err(e) => Some(RelayFrame::error(ErrorCode::InternalError, e.to_string())),
                }
            }
            RelayFrame::Signal { envelope } => {
                self.hub.forward(&self.peer_id, envelope);
                None
            }
            RelayFrame::Ping { timestamp_ms } => Some(RelayFrame::pong(timestamp_ms)),
            RelayFrame::Pong { .. } => None,
            anderer => {
                tracing::debug!(
                    peer_id = %self.peer_id.kurz(),
                    frame = anderer.typ_name(),
                    "Frame in Richtung Relay nicht erlaubt"
                );
                Some(RelayFrame::error(
                    ErrorCode::InvalidRequest,
                    format!("Frame '{}' ist nur vom Relay erlaubt", anderer.typ_name()),
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

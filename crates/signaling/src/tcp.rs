//! TCP-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `RelayServer` bindet einen TCP-Socket und startet fuer jede
//! eingehende Verbindung einen eigenen tokio-Task mit einer `PeerConnection`.

use futures_util::SinkExt;
use hushlink_observability::RelayMetrics;
use hushlink_protocol::{ErrorCode, FrameCodec, RelayFrame};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

use crate::connection::PeerConnection;
use crate::hub::RelayHub;

/// TCP-Relay-Server
pub struct RelayServer {
    hub: RelayHub,
    listener: TcpListener,
    metriken: Option<RelayMetrics>,
}

impl RelayServer {
    /// Bindet den Listener an `bind_addr`
    ///
    /// Port 0 waehlt einen freien Port, siehe [`RelayServer::lokale_adresse`].
    pub async fn binden(hub: RelayHub, bind_addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self {
            hub,
            listener,
            metriken: None,
        })
    }

    /// Zaehlt abgelehnte Verbindungen in `metriken`
    pub fn mit_metriken(mut self, metriken: RelayMetrics) -> Self {
        self.metriken = Some(metriken);
        self
    }

    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> &RelayHub {
        &self.hub
    }

    /// Akzeptiert Verbindungen bis `shutdown_rx` ein `true`-Signal empfaengt
    pub async fn starten(self, mut shutdown_rx: tokio::sync::watch::Receiver<bool>) -> std::io::Result<()> {
        let lokale_addr = self.listener.local_addr()?;
        let max_peers = self.hub.config().max_peers;

        tracing::info!(adresse = %lokale_addr, max_peers, "TCP-Relay gestartet");

        loop {
            tokio::select! {
                // Neue eingehende Verbindung
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            if self.hub.peer_anzahl() >= max_peers {
                                tracing::warn!(
                                    peer = %peer_addr,
                                    max = max_peers,
                                    "Relay voll – Verbindung abgelehnt"
                                );
                                if let Some(m) = &self.metriken {
                                    m.connections_rejected_total.inc();
                                }
                                tokio::spawn(async move {
                                    let mut framed = Framed::new(stream, FrameCodec::new());
                                    let _ = framed
                                        .send(RelayFrame::error(ErrorCode::ServerFull, "Relay ist voll"))
                                        .await;
                                });
                                continue;
                            }

                            tracing::debug!(peer = %peer_addr, "Verbindung akzeptiert");

                            let verbindung = PeerConnection::neu(self.hub.clone(), peer_addr);
                            let shutdown_rx_clone = shutdown_rx.clone();
                            tokio::spawn(verbindung.verarbeiten(stream, shutdown_rx_clone));
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Relay: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!("TCP-Relay gestoppt");
        Ok(())
    }
}

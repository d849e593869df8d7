//! hushlink-server – Bibliotheks-Root
//!
//! Deklariert die Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Tests bereit.

pub mod config;

use anyhow::{Context, Result};
use config::ServerConfig;
use hushlink_observability::{observability_server_starten, HealthState, RelayMetrics};
use hushlink_signaling::{RelayHub, RelayServer};
use std::net::SocketAddr;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Haelt den Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

/// Laufende Subsysteme nach [`Server::hochfahren`]
pub struct LaufenderServer {
    pub relay_adresse: SocketAddr,
    pub hub: RelayHub,
    pub metriken: RelayMetrics,
    relay_task: JoinHandle<std::io::Result<()>>,
    observability_task: Option<JoinHandle<Result<()>>>,
}

impl LaufenderServer {
    /// Wartet bis alle Subsysteme nach dem Shutdown-Signal beendet sind
    pub async fn warten(self) -> Result<()> {
        self.relay_task
            .await
            .context("Relay-Task abgebrochen")?
            .context("Relay-Fehler")?;
        if let Some(task) = self.observability_task {
            task.await.context("Observability-Task abgebrochen")??;
        }
        Ok(())
    }
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Bindet Relay und Observability und startet deren Tasks
    ///
    /// Beide Subsysteme beenden sich, sobald `shutdown_rx` `true` meldet.
    pub async fn hochfahren(&self, shutdown_rx: watch::Receiver<bool>) -> Result<LaufenderServer> {
        let metriken = RelayMetrics::neu()?;
        let relay_config = self.config.relay_config();
        let max_peers = relay_config.max_peers;
        let hub = RelayHub::mit_metriken(relay_config, metriken.clone());

        let relay_addr: SocketAddr = self
            .config
            .tcp_bind_adresse()
            .parse()
            .with_context(|| format!("Ungueltige Bind-Adresse: {}", self.config.tcp_bind_adresse()))?;
        let relay = RelayServer::binden(hub.clone(), relay_addr)
            .await
            .with_context(|| format!("TCP-Relay kann nicht an {relay_addr} binden"))?
            .mit_metriken(metriken.clone());
        let relay_adresse = relay.lokale_adresse()?;
        let relay_task = tokio::spawn(relay.starten(shutdown_rx.clone()));

        let observability_task = if self.config.observability.aktiviert {
            let addr: SocketAddr = self
                .config
                .observability_bind_adresse()
                .parse()
                .context("Ungueltige Observability-Adresse")?;
            let health = HealthState::neu(metriken.clone(), max_peers);
            Some(tokio::spawn(observability_server_starten(
                addr,
                metriken.clone(),
                health,
                shutdown_rx,
            )))
        } else {
            tracing::info!("Observability-Server deaktiviert");
            None
        };

        tracing::info!(
            server_name = %self.config.server.name,
            relay = %relay_adresse,
            notify_departure = self.config.relay.notify_departure,
            "Relay bereit"
        );

        Ok(LaufenderServer {
            relay_adresse,
            hub,
            metriken,
            relay_task,
            observability_task,
        })
    }

    /// Startet alle Subsysteme und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let laufend = self.hochfahren(shutdown_rx).await?;

        tracing::info!("Relay laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Relay wird beendet");

        let _ = shutdown_tx.send(true);
        laufend.warten().await
    }
}

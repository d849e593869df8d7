//! Hushlink Demo – zwei Peers im selben Prozess
//!
//! Verbindet zwei Clients mit einem laufenden Relay, laesst sie ueber den
//! In-Memory Transport eine Sitzung aushandeln und schickt eine
//! verschluesselte Nachricht von Alice an Bob.
//!
//! Aufruf: `hushlink-demo [relay-adresse] [nachricht]`

use anyhow::{anyhow, bail, Context, Result};
use hushlink_core::{PeerId, RoomId};
use hushlink_crypto::X25519AesGcm;
use hushlink_observability::logging_initialisieren;
use hushlink_session::{ClientEvent, MemoryNetwork, PeerClient, SessionConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const STANDARD_RELAY: &str = "127.0.0.1:9987";
const WARTEZEIT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    logging_initialisieren("info", "text");

    let mut args = std::env::args().skip(1);
    let relay = args.next().unwrap_or_else(|| STANDARD_RELAY.into());
    let text = args.next().unwrap_or_else(|| "Hallo aus der Demo".into());

    let netz = MemoryNetwork::neu();
    let client = PeerClient::neu(
        SessionConfig::default(),
        Arc::new(X25519AesGcm),
        Arc::new(netz),
    );

    let (alice, mut alice_rx) = client
        .verbinden(relay.as_str())
        .await
        .with_context(|| format!("Relay {relay} nicht erreichbar"))?;
    let (bob, mut bob_rx) = client.verbinden(relay.as_str()).await?;
    tracing::info!(alice = %alice.peer_id(), bob = %bob.peer_id(), "Beide Peers verbunden");

    let raum = RoomId::neu("demo")?;
    alice.join(raum.clone()).await?;
    // join wird nicht bestaetigt; Alice muss vor Bob im Raum sein
    tokio::time::sleep(Duration::from_millis(200)).await;
    bob.join(raum).await?;

    let bob_id = bob.peer_id().clone();
    let alice_id = alice.peer_id().clone();
    warten_auf(&mut alice_rx, |e| schluessel_von(e, &bob_id), WARTEZEIT).await?;
    warten_auf(&mut bob_rx, |e| schluessel_von(e, &alice_id), WARTEZEIT).await?;
    tracing::info!("Sitzung steht, Schluessel ausgetauscht");

    alice.text_senden(&bob_id, text).await?;
    let empfangen = warten_auf(
        &mut bob_rx,
        |e| matches!(e, ClientEvent::MessageReceived { .. }),
        WARTEZEIT,
    )
    .await?;
    if let ClientEvent::MessageReceived { peer_id, content } = empfangen {
        let inhalt = content.als_text().unwrap_or("<kein Text>");
        println!("Bob hat von {} empfangen: {inhalt}", peer_id.kurz());
    }

    alice.beenden().await;
    bob.beenden().await;
    Ok(())
}

fn schluessel_von(event: &ClientEvent, peer: &PeerId) -> bool {
    matches!(event, ClientEvent::PeerKeyReceived { peer_id } if peer_id == peer)
}

/// Liest Ereignisse bis eines passt oder die Zeit ablaeuft
async fn warten_auf<F>(
    rx: &mut mpsc::Receiver<ClientEvent>,
    mut passt: F,
    zeit: Duration,
) -> Result<ClientEvent>
where
    F: FnMut(&ClientEvent) -> bool,
{
    let suche = async {
        while let Some(event) = rx.recv().await {
            tracing::debug!(?event, "Ereignis");
            if let ClientEvent::Disconnected { reason } = &event {
                bail!("Verbindung zum Relay verloren: {reason}");
            }
            if passt(&event) {
                return Ok(event);
            }
        }
        bail!("Ereignis-Kanal geschlossen")
    };
    tokio::time::timeout(zeit, suche)
        .await
        .map_err(|_| anyhow!("Zeitlimit beim Warten auf Ereignis"))?
}

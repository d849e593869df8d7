//! Integrationstests: echtes TCP-Relay auf 127.0.0.1:0

use futures_util::{SinkExt, StreamExt};
use hushlink_core::PeerId;
use hushlink_observability::RelayMetrics;
use hushlink_protocol::{Envelope, EnvelopeKind, ErrorCode, FrameCodec, RelayFrame};
use hushlink_signaling::{RelayConfig, RelayHub, RelayServer};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;

type Client = Framed<TcpStream, FrameCodec>;

async fn relay_starten(config: RelayConfig) -> (SocketAddr, RelayHub, RelayMetrics, watch::Sender<bool>) {
    let metriken = RelayMetrics::neu().unwrap();
    let hub = RelayHub::mit_metriken(config, metriken.clone());
    let server = RelayServer::binden(hub.clone(), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap()
        .mit_metriken(metriken.clone());
    let addr = server.lokale_adresse().unwrap();
    let (tx, rx) = watch::channel(false);
    tokio::spawn(server.starten(rx));
    (addr, hub, metriken, tx)
}

async fn naechster(client: &mut Client) -> RelayFrame {
    tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("Zeitlimit beim Lesen")
        .expect("Verbindung geschlossen")
        .expect("Frame-Fehler")
}

async fn verbinden(addr: SocketAddr) -> (Client, PeerId) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut client = Framed::new(stream, FrameCodec::new());
    match naechster(&mut client).await {
        RelayFrame::Welcome { peer_id } => (client, peer_id),
        anderer => panic!("Welcome erwartet, erhalten: {anderer:?}"),
    }
}

/// Wartet bis der Hub die erwartete Anzahl Peers kennt
async fn warten_auf_peers(hub: &RelayHub, anzahl: usize) {
    for _ in 0..100 {
        if hub.peer_anzahl() == anzahl {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Hub hat {} statt {anzahl} Peers", hub.peer_anzahl());
}

/// Synchronisiert ueber Ping/Pong, damit vorherige Frames verarbeitet sind
async fn sync(client: &mut Client) {
    client.send(RelayFrame::ping(7)).await.unwrap();
    loop {
        if let RelayFrame::Pong { timestamp_ms: 7 } = naechster(client).await {
            return;
        }
    }
}

#[tokio::test]
async fn zwei_peers_handshake_ueber_relay() {
    let (addr, _hub, metriken, _shutdown) = relay_starten(RelayConfig::default()).await;

    let (mut alice, alice_id) = verbinden(addr).await;
    let (mut bob, bob_id) = verbinden(addr).await;
    assert_ne!(alice_id, bob_id);

    alice.send(RelayFrame::join("lobby")).await.unwrap();
    sync(&mut alice).await;
    bob.send(RelayFrame::join("lobby")).await.unwrap();

    // Nur das bereits anwesende Mitglied wird benachrichtigt
    assert_eq!(
        naechster(&mut alice).await,
        RelayFrame::PeerJoined {
            peer_id: bob_id.clone()
        }
    );
    sync(&mut bob).await;

    // Offer von Alice an Bob, Absender wird gestempelt
    let offer = Envelope::new(
        EnvelopeKind::Offer,
        PeerId::from_string("falsch"),
        bob_id.clone(),
        b"v=0 offer".to_vec(),
    );
    alice.send(RelayFrame::signal(offer)).await.unwrap();

    match naechster(&mut bob).await {
        RelayFrame::Deliver { envelope } => {
            assert_eq!(envelope.kind, EnvelopeKind::Offer);
            assert_eq!(envelope.sender, alice_id);
            assert_eq!(envelope.payload, b"v=0 offer");
        }
        anderer => panic!("Deliver erwartet, erhalten: {anderer:?}"),
    }

    sync(&mut alice).await;
    assert_eq!(metriken.envelopes_forwarded_total.get(), 1);
    assert_eq!(metriken.active_rooms.get(), 1);
}

#[tokio::test]
async fn envelope_an_getrennten_peer_verschwindet() {
    let (addr, hub, metriken, _shutdown) = relay_starten(RelayConfig::default()).await;

    let (mut alice, _) = verbinden(addr).await;
    let (bob, bob_id) = verbinden(addr).await;
    drop(bob);
    warten_auf_peers(&hub, 1).await;

    let env = Envelope::new(EnvelopeKind::IceCandidate, PeerId::new(), bob_id, vec![1]);
    alice.send(RelayFrame::signal(env)).await.unwrap();

    // Kein Fehler an den Absender: das naechste Frame ist das Pong
    alice.send(RelayFrame::ping(99)).await.unwrap();
    assert_eq!(naechster(&mut alice).await, RelayFrame::pong(99));
    assert_eq!(metriken.envelopes_dropped_total.get(), 1);
}

#[tokio::test]
async fn abgangsmeldung_wenn_aktiviert() {
    let config = RelayConfig {
        notify_departure: true,
        ..Default::default()
    };
    let (addr, _hub, _metriken, _shutdown) = relay_starten(config).await;

    let (mut alice, _) = verbinden(addr).await;
    let (mut bob, bob_id) = verbinden(addr).await;
    alice.send(RelayFrame::join("r")).await.unwrap();
    sync(&mut alice).await;
    bob.send(RelayFrame::join("r")).await.unwrap();
    sync(&mut bob).await;
    assert!(matches!(naechster(&mut alice).await, RelayFrame::PeerJoined { .. }));

    drop(bob);
    assert_eq!(
        naechster(&mut alice).await,
        RelayFrame::PeerLeft { peer_id: bob_id }
    );
}

#[tokio::test]
async fn volles_relay_lehnt_ab() {
    let config = RelayConfig {
        max_peers: 1,
        ..Default::default()
    };
    let (addr, hub, metriken, _shutdown) = relay_starten(config).await;

    let (_alice, _) = verbinden(addr).await;
    warten_auf_peers(&hub, 1).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut zweiter = Framed::new(stream, FrameCodec::new());
    assert_eq!(
        naechster(&mut zweiter).await,
        RelayFrame::error(ErrorCode::ServerFull, "Relay ist voll")
    );
    assert_eq!(metriken.connections_rejected_total.get(), 1);
}

#[tokio::test]
async fn shutdown_beendet_server() {
    let metriken = RelayMetrics::neu().unwrap();
    let hub = RelayHub::mit_metriken(RelayConfig::default(), metriken);
    let server = RelayServer::binden(hub, "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(server.starten(rx));

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

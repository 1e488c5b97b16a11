//! Drives the relay over real WebSockets: two clients join on an ephemeral
//! port and exchange envelopes through the router.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use signaling_proto::{Envelope, EnvelopeBody};
use switchboard::websocket::RelayState;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay(presence_replies: bool) -> String {
    let state = RelayState::new(presence_replies);
    let app = switchboard::app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}")
}

async fn join(base: &str, id: &str) -> Ws {
    let (mut ws, _) = connect_async(format!("{base}/ws/join/{id}")).await.unwrap();
    // Registration happens on the server's connection task, not during the
    // handshake; a self-addressed round trip confirms it is in place before
    // other clients start sending to this identifier.
    send(&mut ws, Envelope::ready(id)).await;
    let echo = recv(&mut ws).await;
    assert_eq!(echo.id, id);
    ws
}

async fn send(ws: &mut Ws, envelope: Envelope) {
    ws.send(Message::Text(envelope.encode().unwrap()))
        .await
        .unwrap();
}

async fn recv(ws: &mut Ws) -> Envelope {
    loop {
        let message = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for envelope")
            .expect("connection ended")
            .unwrap();
        if let Message::Text(text) = message {
            return Envelope::decode(&text).unwrap();
        }
    }
}

async fn assert_silent(ws: &mut Ws) {
    match timeout(QUIET, ws.next()).await {
        Err(_) => {}
        Ok(frame) => panic!("expected no traffic, got {frame:?}"),
    }
}

#[tokio::test]
async fn offer_is_forwarded_with_sender_rewrite() {
    let base = start_relay(false).await;
    let mut alice = join(&base, "alice").await;
    let mut bob = join(&base, "bob").await;

    send(&mut alice, Envelope::offer("bob", "O1")).await;

    let delivered = recv(&mut bob).await;
    assert_eq!(delivered.id, "alice");
    assert_eq!(
        delivered.body,
        EnvelopeBody::Offer {
            sdp: "O1".to_string()
        }
    );
}

#[tokio::test]
async fn payload_survives_the_rewrite_untouched() {
    let base = start_relay(false).await;
    let mut alice = join(&base, "alice").await;
    let mut bob = join(&base, "bob").await;

    let candidate = Envelope::candidate(
        "bob",
        "candidate:1 1 UDP 2122317823 10.0.1.83 55100 typ host",
        Some("0".to_string()),
    );
    send(&mut alice, candidate.clone()).await;

    let delivered = recv(&mut bob).await;
    assert_eq!(delivered.id, "alice");
    assert_eq!(delivered.body, candidate.body);
}

#[tokio::test]
async fn routing_miss_is_dropped_silently() {
    let base = start_relay(false).await;
    let mut alice = join(&base, "alice").await;

    send(&mut alice, Envelope::offer("carol", "O1")).await;

    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn messages_from_one_sender_arrive_in_order() {
    let base = start_relay(false).await;
    let mut alice = join(&base, "alice").await;
    let mut bob = join(&base, "bob").await;

    for n in 0..5 {
        send(
            &mut alice,
            Envelope::candidate("bob", format!("candidate:{n}"), None),
        )
        .await;
    }

    for n in 0..5 {
        let delivered = recv(&mut bob).await;
        match delivered.body {
            EnvelopeBody::Candidate { candidate, .. } => {
                assert_eq!(candidate, format!("candidate:{n}"));
            }
            other => panic!("expected candidate, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn re_registration_evicts_the_previous_transport() {
    let base = start_relay(false).await;
    let mut first = join(&base, "alice").await;
    let mut second = join(&base, "alice").await;
    let mut bob = join(&base, "bob").await;

    // The first transport is asked to close.
    let closed = timeout(WAIT, async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None => return true,
                Some(Ok(_)) => {}
                Some(Err(_)) => return true,
            }
        }
    })
    .await
    .expect("first transport never closed");
    assert!(closed);

    // Traffic for the identifier reaches the new transport.
    send(&mut bob, Envelope::ready("alice")).await;
    let delivered = recv(&mut second).await;
    assert_eq!(delivered.id, "bob");
    assert_eq!(delivered.body, EnvelopeBody::Ready);
}

#[tokio::test]
async fn malformed_frames_do_not_kill_the_connection() {
    let base = start_relay(false).await;
    let mut alice = join(&base, "alice").await;
    let mut bob = join(&base, "bob").await;

    alice
        .send(Message::Text("this is not an envelope".to_string()))
        .await
        .unwrap();
    alice
        .send(Message::Text(r#"{"id":"bob","type":"shrug"}"#.to_string()))
        .await
        .unwrap();
    send(&mut alice, Envelope::ready("bob")).await;

    let delivered = recv(&mut bob).await;
    assert_eq!(delivered.body, EnvelopeBody::Ready);
}

#[tokio::test]
async fn disconnect_mid_negotiation_notifies_the_peer() {
    let base = start_relay(false).await;
    let mut alice = join(&base, "alice").await;
    let mut bob = join(&base, "bob").await;

    send(&mut alice, Envelope::offer("bob", "O1")).await;
    let _ = recv(&mut bob).await;
    send(&mut bob, Envelope::answer("alice", "A1")).await;
    let _ = recv(&mut alice).await;

    drop(bob);

    let notice = recv(&mut alice).await;
    assert_eq!(notice.id, "bob");
    assert_eq!(notice.body, EnvelopeBody::UserOffline);
}

#[tokio::test]
async fn bye_ends_the_engagement_without_offline_notice() {
    let base = start_relay(false).await;
    let mut alice = join(&base, "alice").await;
    let mut bob = join(&base, "bob").await;

    send(&mut alice, Envelope::offer("bob", "O1")).await;
    let _ = recv(&mut bob).await;
    send(&mut bob, Envelope::answer("alice", "A1")).await;
    let _ = recv(&mut alice).await;
    send(&mut alice, Envelope::bye("bob")).await;
    let _ = recv(&mut bob).await;

    drop(bob);

    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn presence_replies_answer_the_sender_when_enabled() {
    let base = start_relay(true).await;
    let mut alice = join(&base, "alice").await;
    let mut bob = join(&base, "bob").await;
    let mut carol = join(&base, "carol").await;

    // Miss: the unreachable identifier comes back as useroffline.
    send(&mut alice, Envelope::offer("dave", "O1")).await;
    let reply = recv(&mut alice).await;
    assert_eq!(reply.id, "dave");
    assert_eq!(reply.body, EnvelopeBody::UserOffline);

    // Busy: an offer to someone already negotiating is rejected.
    send(&mut alice, Envelope::offer("bob", "O1")).await;
    let _ = recv(&mut bob).await;
    send(&mut bob, Envelope::answer("alice", "A1")).await;
    let _ = recv(&mut alice).await;

    send(&mut carol, Envelope::offer("alice", "O2")).await;
    let reply = recv(&mut carol).await;
    assert_eq!(reply.id, "alice");
    assert_eq!(reply.body, EnvelopeBody::UserBusy);
}

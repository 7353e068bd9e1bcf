//! End-to-end chat scenarios through an in-process relay.
//!
//! Each test starts a relay on `127.0.0.1:0` and drives real
//! [`ChatSession`]s over [`WsChannel`]s:
//! - key published before the partner joins, then a message
//! - sending after the partner left yields the dead-peer sentinel
//! - undecryptable ciphertext is reported and the session stays usable
//! - a third joiner is refused without disturbing the pair
//! - a partner cannot close the session by sending relay-only frames
//! - typing notices reach the partner
//! - no private key material or plaintext ever appears on the wire

use std::sync::LazyLock;
use std::time::Duration;

use psst::crypto::agent::KeyAgent;
use psst::crypto::keys::{Keypair, PeerKey};
use psst::link::{parse_room, share_link};
use psst::session::{ChatSession, CloseReason, Handshake, SessionEvent, SessionState};
use psst::transport::ws::WsChannel;
use psst::transport::{Channel, ChannelConfig, TransportError};
use psst_proto::room::RoomId;
use psst_proto::wire::{self, RejectReason, WireMessage};

type Session = ChatSession<WsChannel>;

static ALICE_KEYS: LazyLock<Keypair> =
    LazyLock::new(|| Keypair::generate().expect("generate alice keypair"));
static BOB_KEYS: LazyLock<Keypair> =
    LazyLock::new(|| Keypair::generate().expect("generate bob keypair"));

/// Start the relay server in-process and return a ws:// URL.
async fn start_relay() -> (String, tokio::task::JoinHandle<()>) {
    let (addr, handle) = psst_relay::relay::start_server("127.0.0.1:0")
        .await
        .expect("failed to start relay server");
    (format!("ws://{addr}/ws"), handle)
}

fn room(id: &str) -> RoomId {
    RoomId::parse(id).expect("valid room id")
}

async fn join(url: &str, room: &RoomId, keys: &Keypair) -> Session {
    let channel = WsChannel::open(url, room, &ChannelConfig::default())
        .await
        .expect("join room");
    let mut session = ChatSession::with_agent(KeyAgent::from_keypair(keys.clone()));
    session.attach(channel).await.expect("attach channel");
    session
}

async fn next_event(session: &mut Session) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), session.next_event())
        .await
        .expect("event timed out")
        .expect("session produced no event")
}

/// Alice and Bob in `room`, both past the handshake.
async fn paired(url: &str, room: &RoomId) -> (Session, Session) {
    let mut alice = join(url, room, &ALICE_KEYS).await;
    let mut bob = join(url, room, &BOB_KEYS).await;
    assert!(matches!(
        next_event(&mut alice).await,
        SessionEvent::HandshakeComplete { .. }
    ));
    assert!(matches!(
        next_event(&mut bob).await,
        SessionEvent::HandshakeComplete { .. }
    ));
    (alice, bob)
}

#[tokio::test]
async fn key_sent_before_partner_joins_then_hello() {
    let (url, _handle) = start_relay().await;

    // Alice starts the room and hands out the link.
    let abc = room("abc123");
    let link = share_link("http://localhost:8080", &abc).unwrap();
    let mut alice = join(&url, &abc, &ALICE_KEYS).await;
    assert_eq!(alice.state(), SessionState::Connected(Handshake::NoPeerKey));

    tokio::time::sleep(Duration::from_millis(50)).await;

    // Bob opens the link later; Alice's key was held for him.
    let joined = parse_room(link.as_str()).unwrap();
    assert_eq!(joined, abc);
    let mut bob = join(&url, &joined, &BOB_KEYS).await;

    let SessionEvent::HandshakeComplete { fingerprint } = next_event(&mut bob).await else {
        panic!("bob should import alice's key first");
    };
    assert_eq!(fingerprint, ALICE_KEYS.fingerprint());

    bob.send_text("hello").await.unwrap();

    assert_eq!(
        next_event(&mut alice).await,
        SessionEvent::HandshakeComplete {
            fingerprint: BOB_KEYS.fingerprint()
        }
    );
    assert_eq!(
        next_event(&mut alice).await,
        SessionEvent::Message {
            text: "hello".to_string()
        }
    );
}

#[tokio::test]
async fn long_multilingual_message_round_trips() {
    let (url, _handle) = start_relay().await;
    let (mut alice, mut bob) = paired(&url, &room("long")).await;

    let text = "Grüße aus Köln! 你好 🌍 100% ".repeat(40);
    alice.send_text(&text).await.unwrap();
    assert_eq!(next_event(&mut bob).await, SessionEvent::Message { text });
}

#[tokio::test]
async fn send_after_partner_leaves_yields_dead_peer() {
    let (url, _handle) = start_relay().await;
    let (mut alice, mut bob) = paired(&url, &room("gone")).await;

    bob.leave().await;
    assert_eq!(bob.close_reason(), Some(CloseReason::Left));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Alice is not told until she tries to send.
    assert_eq!(alice.state(), SessionState::Connected(Handshake::PeerKeyKnown));
    alice.send_text("are you there?").await.unwrap();

    assert_eq!(
        next_event(&mut alice).await,
        SessionEvent::Closed(CloseReason::DeadPeer)
    );
    assert_eq!(alice.state(), SessionState::Closed);
    assert!(alice.send_text("hello?").await.is_err());
}

#[tokio::test]
async fn undecryptable_frame_is_reported_and_session_continues() {
    let (url, _handle) = start_relay().await;
    let garbled = room("garbled");
    let mut alice = join(&url, &garbled, &ALICE_KEYS).await;

    // A hand-driven partner that sends junk before a real message.
    let mut mallory = WsChannel::open(&url, &garbled, &ChannelConfig::default())
        .await
        .unwrap();
    let Ok(WireMessage::Key { key }) = mallory.recv().await else {
        panic!("expected alice's key");
    };
    let alice_key = PeerKey::import(&key).unwrap();
    mallory
        .send(&WireMessage::Key {
            key: BOB_KEYS.export_public(),
        })
        .await
        .unwrap();
    mallory
        .send(&WireMessage::cipher(&[0x5A; 256]))
        .await
        .unwrap();
    let sealed = psst::crypto::seal(&alice_key, "after the noise").unwrap();
    mallory.send(&WireMessage::cipher(&sealed)).await.unwrap();

    assert!(matches!(
        next_event(&mut alice).await,
        SessionEvent::HandshakeComplete { .. }
    ));
    assert_eq!(next_event(&mut alice).await, SessionEvent::Undecryptable);
    assert_eq!(
        next_event(&mut alice).await,
        SessionEvent::Message {
            text: "after the noise".to_string()
        }
    );
    assert_eq!(alice.state(), SessionState::Connected(Handshake::PeerKeyKnown));
}

#[tokio::test]
async fn partner_cannot_fake_relay_frames() {
    let (url, _handle) = start_relay().await;
    let target = room("target");
    let mut alice = join(&url, &target, &ALICE_KEYS).await;

    let mut mallory = WsChannel::open(&url, &target, &ChannelConfig::default())
        .await
        .unwrap();
    let Ok(WireMessage::Key { key }) = mallory.recv().await else {
        panic!("expected alice's key");
    };
    mallory
        .send(&WireMessage::Key {
            key: BOB_KEYS.export_public(),
        })
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut alice).await,
        SessionEvent::HandshakeComplete { .. }
    ));

    for forged in [
        WireMessage::DeadPeer,
        WireMessage::Error {
            reason: RejectReason::RoomFull,
        },
    ] {
        mallory.send(&forged).await.unwrap();
        assert_eq!(
            mallory.recv().await.unwrap(),
            WireMessage::Error {
                reason: RejectReason::ProtocolViolation
            }
        );
    }

    let sealed = psst::crypto::seal(&PeerKey::import(&key).unwrap(), "nothing happened").unwrap();
    mallory.send(&WireMessage::cipher(&sealed)).await.unwrap();
    assert_eq!(
        next_event(&mut alice).await,
        SessionEvent::Message {
            text: "nothing happened".to_string()
        }
    );
    assert_eq!(alice.state(), SessionState::Connected(Handshake::PeerKeyKnown));
}

#[tokio::test]
async fn typing_notice_reaches_partner() {
    let (url, _handle) = start_relay().await;
    let (mut alice, mut bob) = paired(&url, &room("typing")).await;

    alice.send_typing().await.unwrap();
    assert_eq!(next_event(&mut bob).await, SessionEvent::Typing);

    alice.send_text("done typing").await.unwrap();
    assert_eq!(
        next_event(&mut bob).await,
        SessionEvent::Message {
            text: "done typing".to_string()
        }
    );
}

#[tokio::test]
async fn third_joiner_is_refused_and_pair_is_undisturbed() {
    let (url, _handle) = start_relay().await;
    let abc = room("abc123");
    let (mut alice, mut bob) = paired(&url, &abc).await;

    let third = WsChannel::open(&url, &abc, &ChannelConfig::default()).await;
    assert!(matches!(
        third,
        Err(TransportError::Rejected(RejectReason::RoomFull))
    ));

    alice.send_text("still private").await.unwrap();
    assert_eq!(
        next_event(&mut bob).await,
        SessionEvent::Message {
            text: "still private".to_string()
        }
    );
    bob.send_text("agreed").await.unwrap();
    assert_eq!(
        next_event(&mut alice).await,
        SessionEvent::Message {
            text: "agreed".to_string()
        }
    );
}

#[tokio::test]
async fn wire_carries_no_private_key_or_plaintext() {
    let (url, _handle) = start_relay().await;
    let spied = room("spied");
    let mut alice = join(&url, &spied, &ALICE_KEYS).await;

    // Stand in for the partner and inspect every frame alice sends.
    let mut observer = WsChannel::open(&url, &spied, &ChannelConfig::default())
        .await
        .unwrap();
    let key_frame = observer.recv().await.unwrap();
    let WireMessage::Key { key } = &key_frame else {
        panic!("expected key frame");
    };

    let json: serde_json::Value = serde_json::from_str(&wire::encode(&key_frame).unwrap()).unwrap();
    let mut fields: Vec<&str> = json["key"]
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    fields.sort_unstable();
    assert_eq!(fields, ["alg", "e", "ext", "key_ops", "kty", "n"]);

    observer
        .send(&WireMessage::Key {
            key: BOB_KEYS.export_public(),
        })
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut alice).await,
        SessionEvent::HandshakeComplete { .. }
    ));

    alice.send_text("top secret plans").await.unwrap();
    let cipher_frame = observer.recv().await.unwrap();
    let text = wire::encode(&cipher_frame).unwrap();
    assert!(!text.contains("top secret"));
    assert!(!text.contains("top%20secret"));
    assert!(matches!(cipher_frame, WireMessage::Cipher { .. }));
    // The blob re-exports to itself: it holds public parameters and nothing else.
    let imported = PeerKey::import(key).unwrap();
    assert_eq!(imported.export(), *key);
    assert_eq!(imported.fingerprint(), ALICE_KEYS.fingerprint());
}

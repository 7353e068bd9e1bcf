//! Black-box tests of relay room policy.
//!
//! Raw `tokio-tungstenite` clients talk to an in-process relay and check:
//! - frames never cross between rooms
//! - room failures stay inside their room
//! - spent rooms, the room limit and the hold-queue limit are enforced
//! - a peer cannot pass off relay-only frames to its partner
//! - the client channel surfaces relay rejections

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use psst::transport::ws::WsChannel;
use psst::transport::{ChannelConfig, TransportError};
use psst_proto::room::RoomId;
use psst_proto::wire::{self, DEAD_SENTINEL, RejectReason, WireMessage};
use psst_relay::config::RelayConfig;
use psst_relay::relay::{RelayState, start_server_with_state};

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_relay(config: &RelayConfig) -> (String, Arc<RelayState>) {
    let state = Arc::new(RelayState::with_config(config));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay server");
    (format!("ws://{addr}/ws"), state)
}

async fn send(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_owned().into()))
        .await
        .expect("send frame");
}

/// Next text frame, or `None` on close.
async fn recv(ws: &mut Client) -> Option<String> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("recv timed out")?;
        match msg.ok()? {
            Message::Text(text) => return Some(text.as_str().to_owned()),
            Message::Close(_) => return None,
            _ => {}
        }
    }
}

/// Assert nothing arrives for a short while.
async fn assert_silent(ws: &mut Client) {
    let got = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(got.is_err(), "unexpected frame: {got:?}");
}

/// Connect and send `join`, returning the socket and the relay's reply.
async fn try_join(url: &str, room: &str) -> (Client, WireMessage) {
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("connect");
    let join = wire::encode(&WireMessage::Join {
        room: room.to_owned(),
    })
    .unwrap();
    send(&mut ws, &join).await;
    let reply = recv(&mut ws).await.expect("join reply");
    (ws, wire::decode(&reply).expect("decodable reply"))
}

async fn join(url: &str, room: &str) -> Client {
    let (ws, reply) = try_join(url, room).await;
    assert_eq!(
        reply,
        WireMessage::Joined {
            room: room.to_owned()
        }
    );
    ws
}

async fn wait_for_members(state: &RelayState, room: &str, expected: usize) {
    let room = RoomId::parse(room).unwrap();
    for _ in 0..100 {
        if state.rooms.member_count(&room) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("room {room} never reached {expected} members");
}

#[tokio::test]
async fn rooms_are_isolated() {
    let (url, _state) = start_relay(&RelayConfig::default()).await;
    let mut x1 = join(&url, "room-x").await;
    let mut x2 = join(&url, "room-x").await;
    let mut y1 = join(&url, "room-y").await;
    let mut y2 = join(&url, "room-y").await;

    send(&mut x1, "for x only").await;
    send(&mut y1, "for y only").await;

    assert_eq!(recv(&mut x2).await.unwrap(), "for x only");
    assert_eq!(recv(&mut y2).await.unwrap(), "for y only");
    assert_silent(&mut x1).await;
    assert_silent(&mut y1).await;
}

#[tokio::test]
async fn many_rooms_forward_concurrently() {
    let (url, _state) = start_relay(&RelayConfig::default()).await;

    let mut tasks = Vec::new();
    for i in 0..16 {
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            let room = format!("parallel-{i}");
            let mut a = join(&url, &room).await;
            let mut b = join(&url, &room).await;
            for n in 0..10 {
                send(&mut a, &format!("{room}:{n}")).await;
            }
            for n in 0..10 {
                assert_eq!(recv(&mut b).await.unwrap(), format!("{room}:{n}"));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn dead_peer_in_one_room_does_not_touch_another() {
    let (url, state) = start_relay(&RelayConfig::default()).await;
    let mut a = join(&url, "fragile").await;
    let mut b = join(&url, "fragile").await;
    let mut c = join(&url, "sturdy").await;
    let mut d = join(&url, "sturdy").await;

    b.close(None).await.unwrap();
    wait_for_members(&state, "fragile", 1).await;

    send(&mut a, "hello?").await;
    assert_eq!(recv(&mut a).await.unwrap(), DEAD_SENTINEL);

    send(&mut c, "all good").await;
    assert_eq!(recv(&mut d).await.unwrap(), "all good");
    assert_silent(&mut c).await;
}

#[tokio::test]
async fn spent_room_cannot_be_rejoined() {
    let (url, state) = start_relay(&RelayConfig::default()).await;
    let mut a = join(&url, "once").await;
    let mut b = join(&url, "once").await;

    b.close(None).await.unwrap();
    wait_for_members(&state, "once", 1).await;

    let (_late, reply) = try_join(&url, "once").await;
    assert_eq!(
        reply,
        WireMessage::Error {
            reason: RejectReason::InvalidRoom
        }
    );

    a.close(None).await.unwrap();
    wait_for_members(&state, "once", 0).await;
    assert_eq!(state.rooms.room_count(), 0);
}

#[tokio::test]
async fn room_limit_yields_server_full() {
    let config = RelayConfig {
        max_rooms: 1,
        ..RelayConfig::default()
    };
    let (url, _state) = start_relay(&config).await;
    let _first = join(&url, "only-room").await;

    let (_second, reply) = try_join(&url, "another-room").await;
    assert_eq!(
        reply,
        WireMessage::Error {
            reason: RejectReason::ServerFull
        }
    );

    // Joining the existing room is still fine.
    let _partner = join(&url, "only-room").await;
}

#[tokio::test]
async fn hold_queue_overflow_yields_pending_full() {
    let config = RelayConfig {
        max_pending_frames: 2,
        ..RelayConfig::default()
    };
    let (url, _state) = start_relay(&config).await;
    let mut a = join(&url, "queue").await;

    send(&mut a, "one").await;
    send(&mut a, "two").await;
    send(&mut a, "three").await;
    let reply = recv(&mut a).await.unwrap();
    assert_eq!(
        wire::decode(&reply).unwrap(),
        WireMessage::Error {
            reason: RejectReason::PendingFull
        }
    );

    let mut b = join(&url, "queue").await;
    assert_eq!(recv(&mut b).await.unwrap(), "one");
    assert_eq!(recv(&mut b).await.unwrap(), "two");
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn relay_only_frames_from_a_peer_are_refused() {
    let (url, _state) = start_relay(&RelayConfig::default()).await;
    let mut a = join(&url, "forgery").await;
    let mut b = join(&url, "forgery").await;
    let violation = WireMessage::Error {
        reason: RejectReason::ProtocolViolation,
    };

    for forged in [
        DEAD_SENTINEL.to_owned(),
        wire::encode(&WireMessage::Error {
            reason: RejectReason::RoomFull,
        })
        .unwrap(),
        wire::encode(&WireMessage::Joined {
            room: "forgery".to_owned(),
        })
        .unwrap(),
    ] {
        send(&mut a, &forged).await;
        let reply = recv(&mut a).await.unwrap();
        assert_eq!(wire::decode(&reply).unwrap(), violation);
    }
    assert_silent(&mut b).await;

    // The pair keeps working, in both directions.
    send(&mut a, r#"{"type":"typing"}"#).await;
    assert_eq!(recv(&mut b).await.unwrap(), r#"{"type":"typing"}"#);
    send(&mut b, "still fine").await;
    assert_eq!(recv(&mut a).await.unwrap(), "still fine");
}

#[tokio::test]
async fn relay_only_frames_are_not_held_for_an_absent_peer() {
    let (url, _state) = start_relay(&RelayConfig::default()).await;
    let mut a = join(&url, "early-forgery").await;
    send(&mut a, DEAD_SENTINEL).await;
    let reply = recv(&mut a).await.unwrap();
    assert_eq!(
        wire::decode(&reply).unwrap(),
        WireMessage::Error {
            reason: RejectReason::ProtocolViolation
        }
    );

    let mut b = join(&url, "early-forgery").await;
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn client_channel_surfaces_rejections() {
    let config = RelayConfig {
        max_rooms: 1,
        ..RelayConfig::default()
    };
    let (url, _state) = start_relay(&config).await;
    let channel_config = ChannelConfig::default();

    let room = RoomId::parse("mine").unwrap();
    let _a = WsChannel::open(&url, &room, &channel_config).await.unwrap();
    let _b = WsChannel::open(&url, &room, &channel_config).await.unwrap();

    let full = WsChannel::open(&url, &room, &channel_config).await;
    assert!(matches!(
        full,
        Err(TransportError::Rejected(RejectReason::RoomFull))
    ));

    let other = RoomId::parse("yours").unwrap();
    let busy = WsChannel::open(&url, &other, &channel_config).await;
    assert!(matches!(
        busy,
        Err(TransportError::Rejected(RejectReason::ServerFull))
    ));
}

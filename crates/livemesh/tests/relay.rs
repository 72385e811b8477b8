//! Integration tests for the signaling relay
//!
//! Each test runs a real relay on an ephemeral loopback port and drives it
//! with raw signal transports, asserting on the exact event flow clients
//! observe.

use livemesh::signaling::{ClientRequest, ServerEvent, SignalTransport};
use livemesh::{RelayConfig, SignalingServer, SignalingServerHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn start_relay() -> SignalingServerHandle {
    let server = SignalingServer::new(RelayConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        room_capacity: 2,
    })
    .unwrap();
    server.start().await.unwrap()
}

async fn connect(
    handle: &SignalingServerHandle,
) -> (SignalTransport, mpsc::UnboundedReceiver<ServerEvent>) {
    SignalTransport::connect(&handle.url()).await.unwrap()
}

/// Next event that is part of the matchmaking/signaling flow, skipping
/// relay diagnostics.
async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
    loop {
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for relay event")
            .expect("relay closed the session");
        match event {
            ServerEvent::Log { .. } => continue,
            other => return other,
        }
    }
}

#[tokio::test]
async fn test_each_session_gets_a_distinct_identity() {
    let relay = start_relay().await;
    let (a, _a_events) = connect(&relay).await;
    let (b, _b_events) = connect(&relay).await;

    assert!(!a.client_id().is_empty());
    assert!(!b.client_id().is_empty());
    assert_ne!(a.client_id(), b.client_id());

    relay.shutdown().await;
}

#[tokio::test]
async fn test_first_client_creates_room0() {
    let relay = start_relay().await;
    let (a, mut a_events) = connect(&relay).await;

    a.send(ClientRequest::CreateOrJoin { room: None }).unwrap();
    assert_eq!(
        next_event(&mut a_events).await,
        ServerEvent::Created {
            room: "room0".to_string(),
            client_id: a.client_id().to_string(),
        }
    );

    relay.shutdown().await;
}

#[tokio::test]
async fn test_second_client_pairs_into_room0() {
    let relay = start_relay().await;
    let (a, mut a_events) = connect(&relay).await;
    a.send(ClientRequest::CreateOrJoin { room: None }).unwrap();
    next_event(&mut a_events).await; // created

    let (b, mut b_events) = connect(&relay).await;
    b.send(ClientRequest::CreateOrJoin { room: None }).unwrap();

    assert_eq!(
        next_event(&mut b_events).await,
        ServerEvent::Joined {
            room: "room0".to_string(),
            client_id: b.client_id().to_string(),
        }
    );
    assert_eq!(
        next_event(&mut b_events).await,
        ServerEvent::Ready {
            room: "room0".to_string(),
        }
    );

    // The existing member hears about the arrival, then the room is ready.
    assert_eq!(
        next_event(&mut a_events).await,
        ServerEvent::Join {
            room: "room0".to_string(),
        }
    );
    assert_eq!(
        next_event(&mut a_events).await,
        ServerEvent::Ready {
            room: "room0".to_string(),
        }
    );

    relay.shutdown().await;
}

#[tokio::test]
async fn test_third_client_is_meshed_into_fresh_rooms() {
    let relay = start_relay().await;
    let (a, mut a_events) = connect(&relay).await;
    a.send(ClientRequest::CreateOrJoin { room: None }).unwrap();
    next_event(&mut a_events).await;

    let (b, mut b_events) = connect(&relay).await;
    b.send(ClientRequest::CreateOrJoin { room: None }).unwrap();
    next_event(&mut b_events).await;
    next_event(&mut b_events).await;
    next_event(&mut a_events).await;
    next_event(&mut a_events).await;

    let (c, mut c_events) = connect(&relay).await;
    c.send(ClientRequest::CreateOrJoin { room: None }).unwrap();

    // One fresh room per existing client, in arrival order.
    assert_eq!(
        next_event(&mut c_events).await,
        ServerEvent::Joined {
            room: "room1".to_string(),
            client_id: c.client_id().to_string(),
        }
    );
    assert_eq!(
        next_event(&mut c_events).await,
        ServerEvent::Ready {
            room: "room1".to_string(),
        }
    );
    assert_eq!(
        next_event(&mut c_events).await,
        ServerEvent::Joined {
            room: "room2".to_string(),
            client_id: c.client_id().to_string(),
        }
    );
    assert_eq!(
        next_event(&mut c_events).await,
        ServerEvent::Ready {
            room: "room2".to_string(),
        }
    );

    // Each partner is told about its new room first, then the arrival.
    assert_eq!(
        next_event(&mut a_events).await,
        ServerEvent::Created {
            room: "room1".to_string(),
            client_id: a.client_id().to_string(),
        }
    );
    assert_eq!(
        next_event(&mut a_events).await,
        ServerEvent::Join {
            room: "room1".to_string(),
        }
    );
    assert_eq!(
        next_event(&mut b_events).await,
        ServerEvent::Created {
            room: "room2".to_string(),
            client_id: b.client_id().to_string(),
        }
    );
    assert_eq!(
        next_event(&mut b_events).await,
        ServerEvent::Join {
            room: "room2".to_string(),
        }
    );

    relay.shutdown().await;
}

#[tokio::test]
async fn test_named_room_rejects_third_client_with_full() {
    let relay = start_relay().await;
    let room = Some("studio".to_string());

    let (a, mut a_events) = connect(&relay).await;
    a.send(ClientRequest::CreateOrJoin { room: room.clone() })
        .unwrap();
    assert!(matches!(
        next_event(&mut a_events).await,
        ServerEvent::Created { room, .. } if room == "studio"
    ));

    let (b, mut b_events) = connect(&relay).await;
    b.send(ClientRequest::CreateOrJoin { room: room.clone() })
        .unwrap();
    assert!(matches!(
        next_event(&mut b_events).await,
        ServerEvent::Joined { room, .. } if room == "studio"
    ));

    let (c, mut c_events) = connect(&relay).await;
    c.send(ClientRequest::CreateOrJoin { room: room.clone() })
        .unwrap();
    assert_eq!(
        next_event(&mut c_events).await,
        ServerEvent::Full {
            room: "studio".to_string(),
        }
    );

    // The rejected client can retry with a different room.
    c.send(ClientRequest::CreateOrJoin {
        room: Some("annex".to_string()),
    })
    .unwrap();
    assert!(matches!(
        next_event(&mut c_events).await,
        ServerEvent::Created { room, .. } if room == "annex"
    ));

    relay.shutdown().await;
}

#[tokio::test]
async fn test_signals_are_forwarded_verbatim_to_the_other_member() {
    let relay = start_relay().await;
    let (a, mut a_events) = connect(&relay).await;
    a.send(ClientRequest::CreateOrJoin { room: None }).unwrap();
    next_event(&mut a_events).await;

    let (b, mut b_events) = connect(&relay).await;
    b.send(ClientRequest::CreateOrJoin { room: None }).unwrap();
    next_event(&mut b_events).await;
    next_event(&mut b_events).await;

    // The relay must not parse or reshape the payload.
    let opaque = "\u{1}definitely not json\u{2}";
    a.send(ClientRequest::SendingSignal {
        room: "room0".to_string(),
        data: opaque.to_string(),
    })
    .unwrap();

    // Skip the join/ready flow on A's queue first.
    next_event(&mut a_events).await;
    next_event(&mut a_events).await;

    assert_eq!(
        next_event(&mut b_events).await,
        ServerEvent::SendingSignal {
            room: "room0".to_string(),
            data: opaque.to_string(),
        }
    );

    relay.shutdown().await;
}

#[tokio::test]
async fn test_signal_for_a_vacant_room_is_a_silent_noop() {
    let relay = start_relay().await;
    let (a, mut a_events) = connect(&relay).await;
    a.send(ClientRequest::CreateOrJoin { room: None }).unwrap();
    next_event(&mut a_events).await;

    // Nobody else is in room0 yet; the forward goes nowhere and the
    // session keeps working.
    a.send(ClientRequest::SendingSignal {
        room: "room0".to_string(),
        data: "{}".to_string(),
    })
    .unwrap();

    let (b, mut b_events) = connect(&relay).await;
    b.send(ClientRequest::CreateOrJoin { room: None }).unwrap();
    assert!(matches!(
        next_event(&mut b_events).await,
        ServerEvent::Joined { room, .. } if room == "room0"
    ));
    assert!(matches!(
        next_event(&mut a_events).await,
        ServerEvent::Join { room } if room == "room0"
    ));

    relay.shutdown().await;
}

#[tokio::test]
async fn test_hangup_vacates_rooms_for_future_arrivals() {
    let relay = start_relay().await;
    let (a, mut a_events) = connect(&relay).await;
    a.send(ClientRequest::CreateOrJoin { room: None }).unwrap();
    next_event(&mut a_events).await;

    let (b, mut b_events) = connect(&relay).await;
    b.send(ClientRequest::CreateOrJoin { room: None }).unwrap();
    next_event(&mut b_events).await;
    next_event(&mut b_events).await;

    a.send(ClientRequest::Hangup).unwrap();

    // Give the relay a moment to process the departure, then a newcomer
    // should be paired with the remaining client alone.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let (c, mut c_events) = connect(&relay).await;
    c.send(ClientRequest::CreateOrJoin { room: None }).unwrap();
    assert!(matches!(
        next_event(&mut c_events).await,
        ServerEvent::Joined { room, .. } if room == "room0"
    ));
    assert!(matches!(
        next_event(&mut c_events).await,
        ServerEvent::Ready { room } if room == "room0"
    ));

    relay.shutdown().await;
}

#[tokio::test]
async fn test_socket_close_vacates_relay_state() {
    let server = SignalingServer::new(RelayConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        room_capacity: 2,
    })
    .unwrap();
    let state = server.state();
    let relay = server.start().await.unwrap();

    let (a, mut a_events) = connect(&relay).await;
    a.send(ClientRequest::CreateOrJoin { room: None }).unwrap();
    next_event(&mut a_events).await;
    assert_eq!(state.client_count().await, 1);
    assert_eq!(state.room_count().await, 1);

    // Dropping the transport closes the socket; the relay forgets the
    // client and its room without an explicit hangup.
    drop(a);
    drop(a_events);
    timeout(Duration::from_secs(5), async {
        while state.client_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("relay never forgot the departed client");
    assert_eq!(state.room_count().await, 0);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_message_broadcast_reaches_other_clients() {
    let relay = start_relay().await;
    let (a, mut _a_events) = connect(&relay).await;
    let (_b, mut b_events) = connect(&relay).await;

    let payload = serde_json::json!({ "hello": "mesh" });
    a.send(ClientRequest::Message {
        payload: payload.clone(),
    })
    .unwrap();

    assert_eq!(
        next_event(&mut b_events).await,
        ServerEvent::Message { payload }
    );

    relay.shutdown().await;
}

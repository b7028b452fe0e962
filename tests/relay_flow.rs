//! Relay lifecycle: registration, keepalive, offline queueing across a
//! disconnect, and error reporting.

use std::time::Duration;

use tokio::net::TcpStream;
use zentalk_core::{unix_now, Address, ClientType};
use zentalk_crypto::{RsaKeypair, SigningKeypair};
use zentalk_onion::{build, OnionHop};
use zentalk_relay::{RelayConfig, RelayNode, ERR_PEEL_FAILED};
use zentalk_wire::{
    read_frame, write_frame, Frame, FrameFlags, Handshake, MessageType, RelayError, VERSION,
};

async fn spawn_relay() -> RelayNode {
    let config = RelayConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    };
    let node = RelayNode::new(
        config,
        SigningKeypair::generate(),
        RsaKeypair::generate().unwrap(),
        None,
    );
    node.serve().await.unwrap();
    node
}

async fn connect_user(relay: &RelayNode, address: Address) -> TcpStream {
    let mut stream = TcpStream::connect(relay.bound_addr().unwrap()).await.unwrap();
    let handshake = Handshake {
        version: VERSION,
        address,
        public_key: b"PEM".to_vec(),
        client_type: ClientType::User,
        timestamp: unix_now(),
        signature: vec![],
    };
    write_frame(
        &mut stream,
        &Frame::new(MessageType::Handshake, FrameFlags::empty(), handshake.encode()),
    )
    .await
    .unwrap();
    let ack = read_frame(&mut stream).await.unwrap();
    assert_eq!(ack.header.msg_type, MessageType::HandshakeAck);
    stream
}

fn relay_hop(relay: &RelayNode) -> OnionHop {
    OnionHop {
        address: relay.address(),
        public_key: zentalk_crypto::public_key_from_pem(&relay.public_key_pem().unwrap())
            .unwrap(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn registration_lifecycle() {
    let relay = spawn_relay().await;
    let user = Address([1u8; 20]);

    assert!(!relay.peers().is_connected(&user));
    let stream = connect_user(&relay, user).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(relay.peers().is_connected(&user));

    // Dropping the socket removes the peer
    drop(stream);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!relay.peers().is_connected(&user));
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_messages_drain_in_fifo_order_on_reconnect() {
    let relay = spawn_relay().await;
    let sender_addr = Address([1u8; 20]);
    let offline_addr = Address([7u8; 20]);

    let mut sender = connect_user(&relay, sender_addr).await;

    for i in 0u8..3 {
        let onion = build(
            &[relay_hop(&relay)],
            offline_addr,
            format!("queued-{i}").into_bytes(),
        )
        .unwrap();
        write_frame(
            &mut sender,
            &Frame::new(MessageType::RelayForward, FrameFlags::empty(), onion),
        )
        .await
        .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(relay.queue().len(), 3);

    // Reconnect: all three arrive, oldest first, and the queue empties
    let mut recipient = connect_user(&relay, offline_addr).await;
    for i in 0u8..3 {
        let frame = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut recipient))
            .await
            .expect("drained message must arrive")
            .unwrap();
        assert_eq!(frame.payload, format!("queued-{i}").into_bytes());
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(relay.queue().len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_keeps_the_connection_alive() {
    let relay = spawn_relay().await;
    let mut stream = connect_user(&relay, Address([1u8; 20])).await;

    for _ in 0..3 {
        let ping = Frame::new(MessageType::Ping, FrameFlags::empty(), vec![]);
        write_frame(&mut stream, &ping).await.unwrap();
        let pong = read_frame(&mut stream).await.unwrap();
        assert_eq!(pong.header.msg_type, MessageType::Pong);
        assert_eq!(pong.header.message_id, ping.header.message_id);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn garbage_forward_yields_relay_error_not_disconnect() {
    let relay = spawn_relay().await;
    let mut stream = connect_user(&relay, Address([1u8; 20])).await;

    write_frame(
        &mut stream,
        &Frame::new(MessageType::RelayForward, FrameFlags::empty(), vec![0u8; 64]),
    )
    .await
    .unwrap();

    let reply = read_frame(&mut stream).await.unwrap();
    assert_eq!(reply.header.msg_type, MessageType::RelayError);
    let error = RelayError::decode(&reply.payload).unwrap();
    assert_eq!(error.error_code, ERR_PEEL_FAILED);

    // The connection survives the bad forward
    let ping = Frame::new(MessageType::Ping, FrameFlags::empty(), vec![]);
    write_frame(&mut stream, &ping).await.unwrap();
    assert_eq!(
        read_frame(&mut stream).await.unwrap().header.msg_type,
        MessageType::Pong
    );
}

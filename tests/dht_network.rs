//! Multi-node DHT scenarios over real UDP sockets on localhost.

use std::time::Duration;

use tokio::net::UdpSocket;
use zentalk_core::{Contact, NodeId};
use zentalk_crypto::SigningKeypair;
use zentalk_dht::{
    decode_body, encode_body, DhtNode, Envelope, RpcType, SignedEntry, StoreAckPayload,
    StorePayload,
};

async fn node() -> DhtNode {
    let n = DhtNode::bind("127.0.0.1:0".parse().unwrap(), SigningKeypair::generate())
        .await
        .unwrap();
    n.start();
    n
}

#[tokio::test(flavor = "multi_thread")]
async fn two_node_bootstrap_discovers_both_sides() {
    let a = node().await;
    let b = node().await;

    a.bootstrap(b.local_addr()).await.unwrap();

    assert!(
        a.routing_table().get_contact(&b.node_id()).is_some(),
        "A must know B after bootstrapping from it"
    );
    assert!(
        b.routing_table().get_contact(&a.node_id()).is_some(),
        "B must have learned A from the incoming traffic"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn store_then_retrieve_across_a_line() {
    // N1 ↔ N2 ↔ N3: N1 only knows N2, N2 knows N3
    let n1 = node().await;
    let n2 = node().await;
    let n3 = node().await;

    n1.add_peer(n2.local_contact());
    n2.add_peer(n1.local_contact());
    n2.add_peer(n3.local_contact());
    n3.add_peer(n2.local_contact());

    let key = NodeId::random();
    let acks = n1
        .store(key, b"Hello DHT!".to_vec(), Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(acks >= 1, "at least one replica must acknowledge");

    let value = tokio::time::timeout(Duration::from_millis(500), n3.lookup(key))
        .await
        .expect("lookup must resolve within 500ms")
        .unwrap();
    assert_eq!(value, b"Hello DHT!");
}

#[tokio::test(flavor = "multi_thread")]
async fn poisoned_store_is_rejected_and_not_persisted() {
    let victim = node().await;

    // A signed entry whose value was tampered after signing
    let signing = SigningKeypair::generate();
    let mut entry = SignedEntry::sign(&signing, NodeId::random(), b"honest".to_vec(), 3600);
    entry.value = b"poisoned".to_vec();
    let key = entry.key;

    // Speak the RPC protocol directly at the victim
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let sender = Contact::new(NodeId::random(), socket.local_addr().unwrap());
    let envelope = Envelope::new(
        RpcType::Store,
        Envelope::fresh_request_id(),
        sender,
        encode_body(&StorePayload { entry }).unwrap(),
    );
    socket
        .send_to(&envelope.to_json().unwrap(), victim.local_addr())
        .await
        .unwrap();

    let mut buf = vec![0u8; 64 * 1024];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("victim must answer")
        .unwrap();
    let reply = Envelope::from_json(&buf[..len]).unwrap();
    assert_eq!(reply.msg_type, RpcType::StoreAck);

    let ack: StoreAckPayload = decode_body(&reply.payload).unwrap();
    assert!(!ack.success, "tampered entry must be refused");
    assert!(ack.reason.is_some());
    assert!(
        victim.storage().get(&key).is_none(),
        "nothing may be persisted for a refused store"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_entries_vanish_from_lookup() {
    let a = node().await;
    let b = node().await;
    a.add_peer(b.local_contact());

    let key = NodeId::random();
    a.store(key, b"short lived".to_vec(), Duration::from_secs(1))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(a.lookup(key).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn replicated_store_survives_one_replica_loss() {
    let publisher = node().await;
    let r1 = node().await;
    let r2 = node().await;
    publisher.add_peer(r1.local_contact());
    publisher.add_peer(r2.local_contact());

    let key = NodeId::random();
    let acks = publisher
        .store(key, b"replicated".to_vec(), Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(acks >= 2, "both replicas should acknowledge");

    // Remove the value from one replica; the other still answers
    r1.storage().remove(&key);
    let reader = node().await;
    reader.add_peer(r1.local_contact());
    reader.add_peer(r2.local_contact());
    assert_eq!(reader.lookup(key).await.unwrap(), b"replicated");
}

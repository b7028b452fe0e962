//! Reconnecting relay connection.
//!
//! One TCP connection to the entry relay: dial with a deadline, handshake,
//! then pump frames both ways with a 30-second keepalive. A read or write
//! error tears the socket down and redials with exponential backoff (1 s
//! doubling to a 30 s cap, reset on success) unless the connection was
//! administratively closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zentalk_core::config::{BACKOFF_INITIAL, BACKOFF_MAX, DIAL_TIMEOUT, KEEPALIVE_INTERVAL};
use zentalk_core::{unix_now, Address, ClientType};
use zentalk_wire::{
    read_frame, write_frame, Frame, FrameFlags, Handshake, HandshakeAck, MessageType, VERSION,
};

use crate::{ClientError, Result};

/// Handle to the connection task
#[derive(Clone)]
pub struct RelayConnection {
    outbox: mpsc::Sender<Frame>,
    closed: Arc<AtomicBool>,
}

impl RelayConnection {
    /// Open a connection to `endpoint`, identifying as `address` with the
    /// given RSA public key PEM. Returns the handle and the stream of
    /// inbound frames (handshake acks and pongs are consumed internally).
    pub async fn open(
        endpoint: String,
        address: Address,
        public_key_pem: String,
        signature: Vec<u8>,
    ) -> Result<(Self, mpsc::Receiver<Frame>)> {
        let (outbox_tx, outbox_rx) = mpsc::channel::<Frame>(256);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Frame>(256);
        let closed = Arc::new(AtomicBool::new(false));

        // Establish the first connection eagerly so the caller learns about
        // unreachable relays immediately.
        let stream = dial_and_handshake(&endpoint, address, &public_key_pem, &signature).await?;

        let task = ConnectionTask {
            endpoint,
            address,
            public_key_pem,
            signature,
            outbox: outbox_rx,
            inbound: inbound_tx,
            closed: closed.clone(),
        };
        tokio::spawn(task.run(stream));

        Ok((
            Self {
                outbox: outbox_tx,
                closed,
            },
            inbound_rx,
        ))
    }

    /// Queue a frame for the relay
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        self.outbox
            .send(frame)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Administrative close: no reconnection will be attempted
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn dial_and_handshake(
    endpoint: &str,
    address: Address,
    public_key_pem: &str,
    signature: &[u8],
) -> Result<TcpStream> {
    let mut stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(endpoint))
        .await
        .map_err(|_| ClientError::NotConnected)??;
    let _ = stream.set_nodelay(true);

    let handshake = Handshake {
        version: VERSION,
        address,
        public_key: public_key_pem.as_bytes().to_vec(),
        client_type: ClientType::User,
        timestamp: unix_now(),
        signature: signature.to_vec(),
    };
    write_frame(
        &mut stream,
        &Frame::new(MessageType::Handshake, FrameFlags::empty(), handshake.encode()),
    )
    .await?;

    let frame = tokio::time::timeout(DIAL_TIMEOUT, read_frame(&mut stream))
        .await
        .map_err(|_| ClientError::NotConnected)??;
    if frame.header.msg_type != MessageType::HandshakeAck {
        return Err(ClientError::NotConnected);
    }
    HandshakeAck::decode(&frame.payload)?;

    Ok(stream)
}

struct ConnectionTask {
    endpoint: String,
    address: Address,
    public_key_pem: String,
    signature: Vec<u8>,
    outbox: mpsc::Receiver<Frame>,
    inbound: mpsc::Sender<Frame>,
    closed: Arc<AtomicBool>,
}

impl ConnectionTask {
    async fn run(mut self, first: TcpStream) {
        let mut stream = Some(first);
        let mut backoff = BACKOFF_INITIAL;

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }

            let connected = match stream.take() {
                Some(s) => s,
                None => {
                    match dial_and_handshake(
                        &self.endpoint,
                        self.address,
                        &self.public_key_pem,
                        &self.signature,
                    )
                    .await
                    {
                        Ok(s) => {
                            info!(endpoint = %self.endpoint, "reconnected to relay");
                            s
                        }
                        Err(e) => {
                            debug!(endpoint = %self.endpoint, error = %e, "reconnect failed");
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(BACKOFF_MAX);
                            continue;
                        }
                    }
                }
            };
            backoff = BACKOFF_INITIAL;

            self.pump(connected).await;
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            warn!(endpoint = %self.endpoint, "relay connection lost");
        }
    }

    /// Pump frames until the socket fails or the connection is closed.
    ///
    /// The read side runs on its own task so keepalives and writes can never
    /// cancel a partially read frame.
    async fn pump(&mut self, stream: TcpStream) {
        let (mut rd, mut wr) = stream.into_split();

        let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(64);
        let reader = tokio::spawn(async move {
            loop {
                match read_frame(&mut rd).await {
                    Ok(frame) => {
                        if frame_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        keepalive.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                incoming = frame_rx.recv() => {
                    match incoming {
                        Some(frame) => {
                            if frame.header.msg_type == MessageType::Pong {
                                continue;
                            }
                            if self.inbound.send(frame).await.is_err() {
                                self.closed.store(true, Ordering::SeqCst);
                                break;
                            }
                        }
                        None => break, // socket read side is gone
                    }
                }
                outgoing = self.outbox.recv() => {
                    match outgoing {
                        Some(frame) => {
                            if write_frame(&mut wr, &frame).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            self.closed.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                }
                _ = keepalive.tick() => {
                    let ping = Frame::new(MessageType::Ping, FrameFlags::empty(), vec![]);
                    if write_frame(&mut wr, &ping).await.is_err() {
                        break;
                    }
                }
            }
        }
        reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal relay stand-in: acks the handshake, then echoes frames
    async fn fake_relay() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let Ok(_hs) = read_frame(&mut stream).await else {
                        return;
                    };
                    let ack = HandshakeAck {
                        address: Address([7u8; 20]),
                        public_key: b"PEM".to_vec(),
                        timestamp: unix_now(),
                    };
                    let frame =
                        Frame::new(MessageType::HandshakeAck, FrameFlags::empty(), ack.encode());
                    if write_frame(&mut stream, &frame).await.is_err() {
                        return;
                    }
                    while let Ok(frame) = read_frame(&mut stream).await {
                        if frame.header.msg_type == MessageType::Ping {
                            let pong = Frame::with_id(
                                MessageType::Pong,
                                FrameFlags::empty(),
                                frame.header.message_id,
                                vec![],
                            );
                            if write_frame(&mut stream, &pong).await.is_err() {
                                return;
                            }
                            continue;
                        }
                        if write_frame(&mut stream, &frame).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_connect_and_echo() {
        let relay = fake_relay().await;
        let (conn, mut inbound) = RelayConnection::open(
            relay.to_string(),
            Address([1u8; 20]),
            "PEM".to_string(),
            vec![],
        )
        .await
        .unwrap();

        let frame = Frame::new(MessageType::RelayForward, FrameFlags::empty(), b"hello".to_vec());
        conn.send(frame.clone()).await.unwrap();

        let echoed = inbound.recv().await.unwrap();
        assert_eq!(echoed.payload, b"hello");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let result = RelayConnection::open(
            "127.0.0.1:1".to_string(),
            Address([1u8; 20]),
            "PEM".to_string(),
            vec![],
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_close_stops_sends() {
        let relay = fake_relay().await;
        let (conn, _inbound) = RelayConnection::open(
            relay.to_string(),
            Address([1u8; 20]),
            "PEM".to_string(),
            vec![],
        )
        .await
        .unwrap();

        conn.close();
        assert!(conn.is_closed());
        let frame = Frame::new(MessageType::Ping, FrameFlags::empty(), vec![]);
        assert!(conn.send(frame).await.is_err());
    }
}

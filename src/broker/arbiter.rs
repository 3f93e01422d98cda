use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use super::packet::{BrokerPacket, BrokerPacketCodec};
use super::RequestId;
use crate::naval_errors::NCErr;
use crate::session_id::SessionId;

/// Arbiter-local handle of one worker connection.
pub type ConnId = u64;

#[derive(Debug)]
pub enum SendDataType {
    Data(BrokerPacket),
    Close,
}

#[derive(Debug)]
pub enum ArbiterEvent {
    Connected {
        conn: ConnId,
        outbox: mpsc::UnboundedSender<SendDataType>,
    },
    Packet {
        conn: ConnId,
        packet: BrokerPacket,
    },
    Disconnected {
        conn: ConnId,
    },
}

struct WorkerConn {
    worker_id: Option<u16>,
    outbox: mpsc::UnboundedSender<SendDataType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Registration {
    conn: ConnId,
    request_id: RequestId,
    poll_seq: u64,
}

/// Routing table of pending long-polls. Owned by a single task and fed
/// through one channel, so events are applied strictly in arrival order.
#[derive(Default)]
pub struct Arbiter {
    workers: HashMap<ConnId, WorkerConn>,
    /// At most one pending poll per full session id.
    by_session: HashMap<SessionId, Registration>,
    /// Request ids are only unique per worker.
    by_request: HashMap<(ConnId, RequestId), SessionId>,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_polls(&self) -> usize {
        self.by_session.len()
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ArbiterEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        info!(target: "arbiter", "Event channel closed, arbiter stopped");
    }

    pub fn handle_event(&mut self, event: ArbiterEvent) {
        match event {
            ArbiterEvent::Connected { conn, outbox } => {
                debug!(target: "arbiter", "Connection {} opened", conn);
                self.workers.insert(
                    conn,
                    WorkerConn {
                        worker_id: None,
                        outbox,
                    },
                );
            }
            ArbiterEvent::Packet { conn, packet } => self.handle_packet(conn, packet),
            ArbiterEvent::Disconnected { conn } => self.drop_connection(conn),
        }
    }

    fn handle_packet(&mut self, conn: ConnId, packet: BrokerPacket) {
        match packet {
            BrokerPacket::Hello { worker_id } => {
                if let Some(worker) = self.workers.get_mut(&conn) {
                    worker.worker_id = Some(worker_id);
                }
                info!(target: "arbiter", "Worker {} registered on connection {}", worker_id, conn);
            }
            BrokerPacket::Subscribe {
                session_id,
                poll_seq,
                request_id,
            } => self.subscribe(conn, session_id, poll_seq, request_id),
            BrokerPacket::Unsubscribe { request_id } => self.unsubscribe(conn, request_id),
            BrokerPacket::Publish { sender } => self.publish(sender),
            BrokerPacket::Wake { .. } | BrokerPacket::Cancel { .. } => {
                warn!(target: "arbiter", "Connection {} sent arbiter-only packet {:?}", conn, packet);
            }
        }
    }

    fn subscribe(&mut self, conn: ConnId, session_id: SessionId, poll_seq: u64, request_id: RequestId) {
        if let Some(current) = self.by_session.get(&session_id).copied() {
            if poll_seq < current.poll_seq {
                debug!(target: "arbiter", "Rejecting stale poll {} (seq {} < {}) for {}", request_id, poll_seq, current.poll_seq, session_id);
                self.send_to(conn, BrokerPacket::Cancel { request_id });
                return;
            }
            self.by_request.remove(&(current.conn, current.request_id));
            if (current.conn, current.request_id) != (conn, request_id) {
                debug!(target: "arbiter", "Poll {} supersedes {} for {}", request_id, current.request_id, session_id);
                self.send_to(
                    current.conn,
                    BrokerPacket::Cancel {
                        request_id: current.request_id,
                    },
                );
            }
        }

        self.by_session.insert(
            session_id,
            Registration {
                conn,
                request_id,
                poll_seq,
            },
        );
        self.by_request.insert((conn, request_id), session_id);
    }

    fn unsubscribe(&mut self, conn: ConnId, request_id: RequestId) {
        // Only the registration's own request may remove it
        if let Some(session_id) = self.by_request.remove(&(conn, request_id)) {
            self.by_session.remove(&session_id);
        }
    }

    fn publish(&mut self, sender: SessionId) {
        let receiver = sender.opponent();
        let Some(registration) = self.by_session.remove(&receiver) else {
            debug!(target: "arbiter", "No pending poll for {}", receiver);
            return;
        };
        self.by_request
            .remove(&(registration.conn, registration.request_id));
        self.send_to(
            registration.conn,
            BrokerPacket::Wake {
                request_id: registration.request_id,
            },
        );
    }

    fn drop_connection(&mut self, conn: ConnId) {
        let worker_id = self.workers.remove(&conn).and_then(|w| w.worker_id);
        self.by_session.retain(|_, registration| registration.conn != conn);
        self.by_request.retain(|(owner, _), _| *owner != conn);
        info!(target: "arbiter", "Connection {} of worker {:?} closed", conn, worker_id);
    }

    fn send_to(&self, conn: ConnId, packet: BrokerPacket) {
        let Some(worker) = self.workers.get(&conn) else {
            debug!(target: "arbiter", "Dropping {:?} for closed connection {}", packet, conn);
            return;
        };
        if worker.outbox.send(SendDataType::Data(packet)).is_err() {
            debug!(target: "arbiter", "Writer of connection {} is gone", conn);
        }
    }
}

pub struct Listener;

impl Listener {
    pub async fn bind(addr: &str, port: u16) -> Result<TcpListener, NCErr> {
        let listener = TcpListener::bind(format!("{}:{}", addr, port)).await?;
        info!(target: "arbiter", "Arbiter listening on {}:{}", addr, port);
        Ok(listener)
    }

    /// Accepts worker connections and feeds their packets into `events`.
    pub fn start_tcp(
        listener: TcpListener,
        events: mpsc::UnboundedSender<ArbiterEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut next_conn: ConnId = 0;
            loop {
                match listener.accept().await {
                    Ok((socket, addr)) => {
                        next_conn += 1;
                        let conn = next_conn;
                        let events = events.clone();
                        tokio::spawn(async move {
                            handle_worker_connection(socket, addr, conn, events).await;
                        });
                    }
                    Err(err) => warn!(target: "arbiter", "Accept failed: {}", err),
                }
            }
        })
    }
}

/// Runs the arbiter until the listener task ends.
pub async fn serve(addr: &str, port: u16) -> Result<(), NCErr> {
    let listener = Listener::bind(addr, port).await?;
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(Arbiter::new().run(events_rx));

    Listener::start_tcp(listener, events_tx)
        .await
        .map_err(|err| NCErr::Config(format!("arbiter listener stopped: {}", err)))
}

async fn handle_worker_connection(
    socket: TcpStream,
    addr: SocketAddr,
    conn: ConnId,
    events: mpsc::UnboundedSender<ArbiterEvent>,
) {
    let _ = socket.set_nodelay(true);
    let (read_stream, mut write_stream) = socket.into_split();
    info!(target: "arbiter", "Accepted worker connection {} from {}", conn, addr);

    let (cn_tx, mut cn_rx) = mpsc::unbounded_channel::<SendDataType>();
    if events
        .send(ArbiterEvent::Connected {
            conn,
            outbox: cn_tx.clone(),
        })
        .is_err()
    {
        return;
    }

    tokio::spawn(async move {
        while let Some(data) = cn_rx.recv().await {
            match data {
                SendDataType::Data(packet) => {
                    debug!(target: "broker", "[arbiter=>{}]: {:?}", conn, packet);
                    if let Err(err) = write_stream.write_all(&packet.to_bytes()).await {
                        warn!(target: "arbiter", "Failed to write to connection {}: {}", conn, err);
                        break;
                    }
                }
                SendDataType::Close => {
                    let _ = write_stream.shutdown().await;
                    cn_rx.close();
                    break;
                }
            }
        }
    });

    let mut framed = FramedRead::new(read_stream, BrokerPacketCodec);
    while let Some(frame) = framed.next().await {
        match frame {
            Ok(packet) => {
                debug!(target: "broker", "[{}->arbiter]: {:?}", conn, packet);
                if events.send(ArbiterEvent::Packet { conn, packet }).is_err() {
                    break;
                }
            }
            Err(err) => {
                // Framing is lost after a bad frame
                warn!(target: "arbiter", "Bad frame on connection {}: {}", conn, err);
                break;
            }
        }
    }

    let _ = events.send(ArbiterEvent::Disconnected { conn });
    let _ = cn_tx.send(SendDataType::Close);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestWorker {
        conn: ConnId,
        rx: mpsc::UnboundedReceiver<SendDataType>,
    }

    impl TestWorker {
        fn attach(arbiter: &mut Arbiter, conn: ConnId) -> Self {
            let (outbox, rx) = mpsc::unbounded_channel();
            arbiter.handle_event(ArbiterEvent::Connected { conn, outbox });
            arbiter.handle_event(ArbiterEvent::Packet {
                conn,
                packet: BrokerPacket::Hello {
                    worker_id: conn as u16,
                },
            });
            Self { conn, rx }
        }

        fn send(&self, arbiter: &mut Arbiter, packet: BrokerPacket) {
            arbiter.handle_event(ArbiterEvent::Packet {
                conn: self.conn,
                packet,
            });
        }

        fn received(&mut self) -> Vec<BrokerPacket> {
            let mut out = Vec::new();
            while let Ok(data) = self.rx.try_recv() {
                if let SendDataType::Data(packet) = data {
                    out.push(packet);
                }
            }
            out
        }
    }

    fn subscribe(session: u64, seq: u64, request_id: RequestId) -> BrokerPacket {
        BrokerPacket::Subscribe {
            session_id: SessionId::from_raw(session),
            poll_seq: seq,
            request_id,
        }
    }

    #[test]
    fn publish_wakes_the_opponent_on_its_worker() {
        let mut arbiter = Arbiter::new();
        let mut w1 = TestWorker::attach(&mut arbiter, 1);
        let mut w2 = TestWorker::attach(&mut arbiter, 2);

        // Player 1 of session 1000 polls on worker 2
        w2.send(&mut arbiter, subscribe(1001, 1, 77));
        w1.send(
            &mut arbiter,
            BrokerPacket::Publish {
                sender: SessionId::from_raw(1000),
            },
        );

        assert_eq!(w2.received(), vec![BrokerPacket::Wake { request_id: 77 }]);
        assert!(w1.received().is_empty());
        assert_eq!(arbiter.pending_polls(), 0);
    }

    #[test]
    fn own_publish_does_not_wake_self() {
        let mut arbiter = Arbiter::new();
        let mut w1 = TestWorker::attach(&mut arbiter, 1);

        w1.send(&mut arbiter, subscribe(1000, 1, 5));
        w1.send(
            &mut arbiter,
            BrokerPacket::Publish {
                sender: SessionId::from_raw(1000),
            },
        );
        assert!(w1.received().is_empty());
        assert_eq!(arbiter.pending_polls(), 1);
    }

    #[test]
    fn newer_poll_supersedes_older() {
        let mut arbiter = Arbiter::new();
        let mut w1 = TestWorker::attach(&mut arbiter, 1);
        let mut w2 = TestWorker::attach(&mut arbiter, 2);

        w1.send(&mut arbiter, subscribe(1001, 1, 10));
        w2.send(&mut arbiter, subscribe(1001, 2, 20));
        assert_eq!(w1.received(), vec![BrokerPacket::Cancel { request_id: 10 }]);

        // Late retry with an older seq is rejected outright
        w1.send(&mut arbiter, subscribe(1001, 1, 11));
        assert_eq!(w1.received(), vec![BrokerPacket::Cancel { request_id: 11 }]);

        w1.send(
            &mut arbiter,
            BrokerPacket::Publish {
                sender: SessionId::from_raw(1000),
            },
        );
        assert_eq!(w2.received(), vec![BrokerPacket::Wake { request_id: 20 }]);
    }

    #[test]
    fn unsubscribe_of_a_superseded_request_keeps_the_newer_one() {
        let mut arbiter = Arbiter::new();
        let mut w1 = TestWorker::attach(&mut arbiter, 1);

        w1.send(&mut arbiter, subscribe(1001, 1, 10));
        w1.send(&mut arbiter, subscribe(1001, 2, 11));
        w1.send(&mut arbiter, BrokerPacket::Unsubscribe { request_id: 10 });
        assert_eq!(arbiter.pending_polls(), 1);

        w1.send(&mut arbiter, BrokerPacket::Unsubscribe { request_id: 11 });
        assert_eq!(arbiter.pending_polls(), 0);
        assert_eq!(w1.received(), vec![BrokerPacket::Cancel { request_id: 10 }]);
    }

    #[test]
    fn request_ids_are_scoped_per_connection() {
        let mut arbiter = Arbiter::new();
        let w1 = TestWorker::attach(&mut arbiter, 1);
        let w2 = TestWorker::attach(&mut arbiter, 2);

        w1.send(&mut arbiter, subscribe(1001, 1, 1));
        w2.send(&mut arbiter, BrokerPacket::Unsubscribe { request_id: 1 });
        assert_eq!(arbiter.pending_polls(), 1);
    }

    #[test]
    fn disconnect_drops_registrations() {
        let mut arbiter = Arbiter::new();
        let w1 = TestWorker::attach(&mut arbiter, 1);
        let mut w2 = TestWorker::attach(&mut arbiter, 2);

        w1.send(&mut arbiter, subscribe(1001, 1, 10));
        w2.send(&mut arbiter, subscribe(2001, 1, 20));
        arbiter.handle_event(ArbiterEvent::Disconnected { conn: 1 });
        assert_eq!(arbiter.pending_polls(), 1);

        // Publishing to the dead worker's session is a no-op
        w2.send(
            &mut arbiter,
            BrokerPacket::Publish {
                sender: SessionId::from_raw(1000),
            },
        );
        assert!(w2.received().is_empty());
    }

    #[tokio::test]
    async fn tcp_listener_routes_frames() {
        use tokio::io::AsyncReadExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(Arbiter::new().run(events_rx));
        Listener::start_tcp(listener, events_tx);

        let mut poller = TcpStream::connect(addr).await.unwrap();
        let mut sender = TcpStream::connect(addr).await.unwrap();
        poller
            .write_all(&BrokerPacket::Hello { worker_id: 1 }.to_bytes())
            .await
            .unwrap();
        poller
            .write_all(&subscribe(1001, 1, 42).to_bytes())
            .await
            .unwrap();
        // Give the arbiter a moment to apply the subscription
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        sender
            .write_all(
                &BrokerPacket::Publish {
                    sender: SessionId::from_raw(1000),
                }
                .to_bytes(),
            )
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        tokio::time::timeout(std::time::Duration::from_secs(5), poller.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            BrokerPacket::from_bytes(&buf).unwrap(),
            Some((16, BrokerPacket::Wake { request_id: 42 }))
        );
    }
}

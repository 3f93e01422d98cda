use futures::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use super::packet::{BrokerPacket, BrokerPacketCodec};
use super::{BrokerLink, RequestId};
use crate::longpoll::PollRegistry;
use crate::session_id::SessionId;

const RECONNECT_BASE_MS: u64 = 250;
const RECONNECT_MAX_MS: u64 = 5_000;

/// Worker end of the arbiter connection.
///
/// Outgoing frames go through an unbounded queue to the connection task.
/// While disconnected every call is dropped on the floor.
pub struct BrokerClient {
    outgoing: mpsc::UnboundedSender<BrokerPacket>,
    connected: Arc<AtomicBool>,
}

impl BrokerClient {
    /// Spawns the connection task. It reconnects for as long as the client
    /// lives and hands WAKE/CANCEL frames to `polls`.
    pub fn start(arbiter_addr: String, worker_id: u16, polls: Arc<PollRegistry>) -> Self {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_connection(
            arbiter_addr,
            worker_id,
            polls,
            outgoing_rx,
            connected.clone(),
        ));

        Self {
            outgoing,
            connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send(&self, packet: BrokerPacket) {
        if !self.is_connected() {
            debug!(target: "broker", "Arbiter unreachable, dropping {:?}", packet);
            return;
        }
        if self.outgoing.send(packet).is_err() {
            warn!(target: "broker", "Arbiter connection task is gone");
        }
    }
}

impl BrokerLink for BrokerClient {
    fn subscribe(&self, session_id: SessionId, poll_seq: u64, request_id: RequestId) {
        self.send(BrokerPacket::Subscribe {
            session_id,
            poll_seq,
            request_id,
        });
    }

    fn unsubscribe(&self, request_id: RequestId) {
        self.send(BrokerPacket::Unsubscribe { request_id });
    }

    fn publish(&self, sender: SessionId) {
        self.send(BrokerPacket::Publish { sender });
    }
}

fn reconnect_delay(attempt: u32) -> Duration {
    let base = (RECONNECT_BASE_MS << attempt.min(5)).min(RECONNECT_MAX_MS);
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

async fn run_connection(
    arbiter_addr: String,
    worker_id: u16,
    polls: Arc<PollRegistry>,
    mut outgoing_rx: mpsc::UnboundedReceiver<BrokerPacket>,
    connected: Arc<AtomicBool>,
) {
    let mut attempt: u32 = 0;
    loop {
        match TcpStream::connect(&arbiter_addr).await {
            Ok(socket) => {
                attempt = 0;
                let _ = socket.set_nodelay(true);
                let (read_stream, write_stream) = socket.into_split();
                let mut reader = FramedRead::new(read_stream, BrokerPacketCodec);
                let mut writer = FramedWrite::new(write_stream, BrokerPacketCodec);

                // Frames queued before the drop refer to registrations the
                // arbiter never saw
                while outgoing_rx.try_recv().is_ok() {}

                if let Err(err) = writer.send(BrokerPacket::Hello { worker_id }).await {
                    warn!(target: "broker", "Handshake with arbiter {} failed: {}", arbiter_addr, err);
                } else {
                    connected.store(true, Ordering::Release);
                    info!(target: "broker", "Connected to arbiter {} as worker {}", arbiter_addr, worker_id);

                    let keep_running =
                        pump(&mut reader, &mut writer, &mut outgoing_rx, &polls).await;

                    connected.store(false, Ordering::Release);
                    let released = polls.cancel_all();
                    warn!(target: "broker", "Lost arbiter {}, released {} pending polls", arbiter_addr, released);
                    if !keep_running {
                        return;
                    }
                }
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(target: "broker", "Cannot reach arbiter {}: {}", arbiter_addr, err);
                }
            }
        }

        tokio::time::sleep(reconnect_delay(attempt)).await;
        attempt = attempt.saturating_add(1);
    }
}

/// Moves frames both ways until the connection breaks. Returns false once the
/// client itself has been dropped.
async fn pump(
    reader: &mut FramedRead<tokio::net::tcp::OwnedReadHalf, BrokerPacketCodec>,
    writer: &mut FramedWrite<tokio::net::tcp::OwnedWriteHalf, BrokerPacketCodec>,
    outgoing_rx: &mut mpsc::UnboundedReceiver<BrokerPacket>,
    polls: &PollRegistry,
) -> bool {
    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => match outgoing {
                Some(packet) => {
                    debug!(target: "broker", "[worker=>arbiter]: {:?}", packet);
                    if let Err(err) = writer.send(packet).await {
                        warn!(target: "broker", "Write to arbiter failed: {}", err);
                        return true;
                    }
                }
                None => return false,
            },
            incoming = reader.next() => match incoming {
                Some(Ok(packet)) => {
                    debug!(target: "broker", "[arbiter->worker]: {:?}", packet);
                    polls.dispatch(packet);
                }
                Some(Err(err)) => {
                    warn!(target: "broker", "Bad frame from arbiter: {}", err);
                    return true;
                }
                None => return true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::arbiter::{Arbiter, Listener};
    use tokio::net::TcpListener;

    async fn wait_until(mut check: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "condition never held");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn backoff_is_capped() {
        for attempt in [0, 3, 30, u32::MAX] {
            let delay = reconnect_delay(attempt);
            assert!(delay >= Duration::from_millis(RECONNECT_BASE_MS));
            assert!(delay <= Duration::from_millis(RECONNECT_MAX_MS * 3 / 2));
        }
    }

    #[tokio::test]
    async fn calls_are_dropped_while_disconnected() {
        // Nothing listens on this port
        let polls = Arc::new(PollRegistry::new());
        let client = BrokerClient::start("127.0.0.1:1".to_string(), 1, polls);
        assert!(!client.is_connected());
        client.publish(SessionId::from_raw(1000));
        client.unsubscribe(3);
    }

    #[tokio::test]
    async fn wake_travels_between_two_workers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(Arbiter::new().run(events_rx));
        Listener::start_tcp(listener, events_tx);

        let polls_a = Arc::new(PollRegistry::new());
        let polls_b = Arc::new(PollRegistry::new());
        let worker_a = BrokerClient::start(addr.clone(), 1, polls_a);
        let worker_b = BrokerClient::start(addr, 2, polls_b.clone());
        wait_until(|| worker_a.is_connected() && worker_b.is_connected()).await;

        let registry = polls_b.clone();
        let p1 = SessionId::from_raw(1001);
        let (request_id, rx) = registry.register(p1);
        worker_b.subscribe(p1, 1, request_id);
        tokio::time::sleep(Duration::from_millis(100)).await;

        worker_a.publish(p1.opponent());
        let signal = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal, crate::longpoll::PollSignal::Wake);
    }
}

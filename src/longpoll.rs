use dashmap::DashMap;
use sea_orm::DatabaseConnection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::broker::packet::BrokerPacket;
use crate::broker::{BrokerLink, RequestId};
use crate::game_state;
use crate::mailbox::{self, MailboxMessage};
use crate::naval_errors::NCErr;
use crate::session_id::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSignal {
    /// The opponent published; look at the mailbox again.
    Wake,
    /// Superseded or rejected; answer empty without looking.
    Cancel,
}

struct PendingPoll {
    session_id: SessionId,
    responder: oneshot::Sender<PollSignal>,
}

/// Pending long-polls of this worker, keyed by request id. Removing an entry
/// is what resolves it, so a wake racing a timeout resolves it only once.
#[derive(Default)]
pub struct PollRegistry {
    pending: DashMap<RequestId, PendingPoll>,
    next_id: AtomicU64,
}

impl PollRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn register(&self, session_id: SessionId) -> (RequestId, oneshot::Receiver<PollSignal>) {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (responder, rx) = oneshot::channel();
        self.pending.insert(
            request_id,
            PendingPoll {
                session_id,
                responder,
            },
        );
        (request_id, rx)
    }

    /// Resolves a pending poll. Returns false if it was already resolved.
    pub fn signal(&self, request_id: RequestId, signal: PollSignal) -> bool {
        match self.pending.remove(&request_id) {
            Some((_, poll)) => {
                debug!(target: "longpoll", "{:?} for poll {} of {}", signal, request_id, poll.session_id);
                poll.responder.send(signal).is_ok()
            }
            None => false,
        }
    }

    /// Applies an arbiter frame.
    pub fn dispatch(&self, packet: BrokerPacket) {
        match packet {
            BrokerPacket::Wake { request_id } => {
                self.signal(request_id, PollSignal::Wake);
            }
            BrokerPacket::Cancel { request_id } => {
                self.signal(request_id, PollSignal::Cancel);
            }
            other => warn!(target: "longpoll", "Unexpected frame from arbiter: {:?}", other),
        }
    }

    /// Releases every pending poll, e.g. after losing the arbiter: their
    /// registrations are gone and no wake can arrive anymore.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter(|id| self.signal(*id, PollSignal::Cancel))
            .count()
    }
}

/// Drops the local entry and the arbiter registration when a poll ends
/// without being signalled: timeout, early return or the HTTP request being
/// dropped mid-wait.
struct PollGuard<'a> {
    registry: &'a PollRegistry,
    link: &'a dyn BrokerLink,
    request_id: RequestId,
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        if self.registry.pending.remove(&self.request_id).is_some() {
            self.link.unsubscribe(self.request_id);
        }
    }
}

/// Long-poll for the next message from the opponent of `receiver`.
///
/// Messages up to `after_id` are acknowledged first. Returns `None` when the
/// poll timed out or was superseded by a newer one.
pub async fn receive(
    db: &DatabaseConnection,
    link: &dyn BrokerLink,
    registry: &PollRegistry,
    receiver: SessionId,
    after_id: i64,
    poll_seq: u64,
    timeout: Duration,
) -> Result<Option<MailboxMessage>, NCErr> {
    game_state::touch(db, receiver).await?;
    mailbox::acknowledge(db, receiver, after_id).await?;

    if let Some(message) = mailbox::fetch_next(db, receiver, after_id).await? {
        return Ok(Some(message));
    }

    let (request_id, signal) = registry.register(receiver);
    let _guard = PollGuard {
        registry,
        link,
        request_id,
    };
    link.subscribe(receiver, poll_seq, request_id);

    // A publish between the first check and the subscription would be lost
    if let Some(message) = mailbox::fetch_next(db, receiver, after_id).await? {
        return Ok(Some(message));
    }

    match tokio::time::timeout(timeout, signal).await {
        Ok(Ok(PollSignal::Wake)) => mailbox::fetch_next(db, receiver, after_id).await,
        Ok(Ok(PollSignal::Cancel)) => Ok(None),
        Ok(Err(_)) => Ok(None),
        Err(_) => {
            debug!(target: "longpoll", "Poll {} of {} timed out", request_id, receiver);
            Ok(None)
        }
    }
}

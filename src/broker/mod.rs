pub mod arbiter;
pub mod client;
pub mod packet;

use crate::session_id::SessionId;

/// Correlation id of one pending HTTP long-poll, unique within a worker.
pub type RequestId = u64;

/// Worker-side view of the arbiter. Every call is fire-and-forget: while the
/// arbiter is unreachable the calls are dropped and pending polls simply run
/// into their own timeout.
pub trait BrokerLink: Send + Sync {
    fn subscribe(&self, session_id: SessionId, poll_seq: u64, request_id: RequestId);
    fn unsubscribe(&self, request_id: RequestId);
    fn publish(&self, sender: SessionId);
}

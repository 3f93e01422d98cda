use chrono::{DateTime, Utc};
use sea_orm::entity::*;
use sea_orm::query::*;
use sea_orm::ConnectionTrait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::broker::BrokerLink;
use crate::naval_errors::NCErr;
use crate::orm::model::session_message;
use crate::session_id::SessionId;

/// Upper bound of rows removed by one acknowledge call.
pub const ACK_BATCH: u64 = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct MailboxMessage {
    pub id: i64,
    pub sender: SessionId,
    pub msg_type: String,
    pub body: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl MailboxMessage {
    fn from_model(model: session_message::Model) -> Result<Self, NCErr> {
        let body = match serde_json::from_str::<Value>(&model.body) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!(target: "mailbox", "Message {} has a non-object body, delivering it empty", model.id);
                Map::new()
            }
        };
        Ok(Self {
            id: model.id,
            sender: SessionId::from_db(model.session_id)?,
            msg_type: model.msg_type,
            body,
            created_at: model.created_at,
        })
    }

    /// Flat reply object: the body fields plus `type` and `msgId`, which
    /// the body cannot override.
    pub fn to_reply(&self) -> Map<String, Value> {
        let mut reply = self.body.clone();
        reply.insert("type".to_string(), Value::from(self.msg_type.clone()));
        reply.insert("msgId".to_string(), Value::from(self.id));
        reply
    }
}

/// Queues a message from `sender` for its opponent and asks the arbiter to
/// wake the opponent's pending poll.
pub async fn send<C: ConnectionTrait>(
    db: &C,
    link: &dyn BrokerLink,
    sender: SessionId,
    msg_type: &str,
    body: &Map<String, Value>,
) -> Result<i64, NCErr> {
    let row = session_message::ActiveModel {
        session_id: Set(sender.as_db()),
        msg_type: Set(msg_type.to_string()),
        body: Set(Value::Object(body.clone()).to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    let row = row.insert(db).await?;
    debug!(target: "mailbox", "Queued {} #{} from {}", msg_type, row.id, sender);

    link.publish(sender);
    Ok(row.id)
}

/// Oldest message from the opponent of `receiver` newer than `after_id`.
pub async fn fetch_next<C: ConnectionTrait>(
    db: &C,
    receiver: SessionId,
    after_id: i64,
) -> Result<Option<MailboxMessage>, NCErr> {
    let row = session_message::Entity::find()
        .filter(session_message::Column::SessionId.eq(receiver.opponent().as_db()))
        .filter(session_message::Column::Id.gt(after_id))
        .order_by_asc(session_message::Column::Id)
        .one(db)
        .await?;

    row.map(MailboxMessage::from_model).transpose()
}

/// Deletes at most `ACK_BATCH` opponent messages with id <= `up_to_id`.
pub async fn acknowledge<C: ConnectionTrait>(
    db: &C,
    receiver: SessionId,
    up_to_id: i64,
) -> Result<u64, NCErr> {
    if up_to_id <= 0 {
        return Ok(0);
    }

    let ids: Vec<i64> = session_message::Entity::find()
        .select_only()
        .column(session_message::Column::Id)
        .filter(session_message::Column::SessionId.eq(receiver.opponent().as_db()))
        .filter(session_message::Column::Id.lte(up_to_id))
        .order_by_asc(session_message::Column::Id)
        .limit(ACK_BATCH)
        .into_tuple()
        .all(db)
        .await?;
    if ids.is_empty() {
        return Ok(0);
    }

    let res = session_message::Entity::delete_many()
        .filter(session_message::Column::Id.is_in(ids))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

/// Removes up to `limit` messages older than `older_than_hours`, acknowledged
/// or not.
pub async fn sweep<C: ConnectionTrait>(
    db: &C,
    older_than_hours: i64,
    limit: u64,
) -> Result<u64, NCErr> {
    let cutoff = Utc::now() - chrono::Duration::hours(older_than_hours);

    let ids: Vec<i64> = session_message::Entity::find()
        .select_only()
        .column(session_message::Column::Id)
        .filter(session_message::Column::CreatedAt.lt(cutoff))
        .order_by_asc(session_message::Column::Id)
        .limit(limit)
        .into_tuple()
        .all(db)
        .await?;
    if ids.is_empty() {
        return Ok(0);
    }

    let res = session_message::Entity::delete_many()
        .filter(session_message::Column::Id.is_in(ids))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::{LinkCall, RecordingLink};
    use crate::orm::test_database;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn send_then_fetch_from_the_other_side() {
        let db = test_database().await;
        let link = RecordingLink::default();
        let sender = SessionId::from_raw(1000);
        let payload = body(json!({"x": 3, "y": 7, "hits": [1, 2, {"k": "v"}]}));

        let id = send(&db, &link, sender, "shoot", &payload).await.unwrap();
        assert_eq!(link.calls(), vec![LinkCall::Publish(sender)]);

        let msg = fetch_next(&db, sender.opponent(), 0).await.unwrap().unwrap();
        assert_eq!(msg.id, id);
        assert_eq!(msg.msg_type, "shoot");
        assert_eq!(msg.body, payload);
        assert_eq!(msg.sender, sender);

        // The sender never sees its own message
        assert!(fetch_next(&db, sender, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fifo_per_direction() {
        let db = test_database().await;
        let link = RecordingLink::default();
        let p0 = SessionId::from_raw(2000);
        let p1 = p0.opponent();

        let a = send(&db, &link, p0, "chat", &body(json!({"t": "a"}))).await.unwrap();
        let _ = send(&db, &link, p1, "chat", &body(json!({"t": "other"}))).await.unwrap();
        let b = send(&db, &link, p0, "chat", &body(json!({"t": "b"}))).await.unwrap();

        let first = fetch_next(&db, p1, 0).await.unwrap().unwrap();
        assert_eq!(first.id, a);
        let second = fetch_next(&db, p1, first.id).await.unwrap().unwrap();
        assert_eq!(second.id, b);
        assert!(fetch_next(&db, p1, second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acknowledge_only_removes_delivered_opponent_messages() {
        let db = test_database().await;
        let link = RecordingLink::default();
        let p0 = SessionId::from_raw(3000);
        let p1 = p0.opponent();

        let a = send(&db, &link, p0, "info", &Map::new()).await.unwrap();
        let b = send(&db, &link, p0, "info", &Map::new()).await.unwrap();
        let mine = send(&db, &link, p1, "info", &Map::new()).await.unwrap();

        assert_eq!(acknowledge(&db, p1, 0).await.unwrap(), 0);
        assert_eq!(acknowledge(&db, p1, a).await.unwrap(), 1);

        let next = fetch_next(&db, p1, 0).await.unwrap().unwrap();
        assert_eq!(next.id, b);
        // p1's own outgoing message is untouched
        assert_eq!(fetch_next(&db, p0, 0).await.unwrap().unwrap().id, mine);
    }

    #[tokio::test]
    async fn acknowledge_is_batched() {
        let db = test_database().await;
        let link = RecordingLink::default();
        let p0 = SessionId::from_raw(4000);

        let mut last = 0;
        for _ in 0..(ACK_BATCH + 5) {
            last = send(&db, &link, p0, "smove", &Map::new()).await.unwrap();
        }
        assert_eq!(acknowledge(&db, p0.opponent(), last).await.unwrap(), ACK_BATCH);
        assert_eq!(acknowledge(&db, p0.opponent(), last).await.unwrap(), 5);
        assert!(fetch_next(&db, p0.opponent(), 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_old_messages() {
        let db = test_database().await;
        let p0 = SessionId::from_raw(5000);

        let old = session_message::ActiveModel {
            session_id: Set(p0.as_db()),
            msg_type: Set("chat".to_string()),
            body: Set("{}".to_string()),
            created_at: Set(Utc::now() - chrono::Duration::hours(48)),
            ..Default::default()
        };
        old.insert(&db).await.unwrap();
        let fresh_id = send(&db, &RecordingLink::default(), p0, "chat", &Map::new())
            .await
            .unwrap();

        assert_eq!(sweep(&db, 24, 100).await.unwrap(), 1);
        assert_eq!(sweep(&db, 24, 100).await.unwrap(), 0);
        assert_eq!(
            fetch_next(&db, p0.opponent(), 0).await.unwrap().unwrap().id,
            fresh_id
        );
    }

    #[test]
    fn reply_keeps_type_and_id_authoritative() {
        let msg = MailboxMessage {
            id: 9,
            sender: SessionId::from_raw(1000),
            msg_type: "chat".to_string(),
            body: body(json!({"type": "spoofed", "msgId": 1, "t": "hi"})),
            created_at: Utc::now(),
        };
        let reply = msg.to_reply();
        assert_eq!(reply["type"], json!("chat"));
        assert_eq!(reply["msgId"], json!(9));
        assert_eq!(reply["t"], json!("hi"));
    }
}

use serde_json::Value;

use crate::handler::{reason_reply, typed_reply, NavalRequestBundle, Reply};
use crate::matchmaking::{self, ReconnectOutcome};
use crate::naval_errors::NCErr;

pub async fn handle_rq_reconnect(prq: &NavalRequestBundle) -> Result<Reply, NCErr> {
    let sid = prq.session_id()?;

    match matchmaking::reconnect(&prq.sstate.database, sid).await {
        ReconnectOutcome::Connected { sid } => {
            let mut reply = typed_reply("connected");
            reply.insert("sid".to_string(), Value::from(sid.to_string()));
            Ok(reply)
        }
        ReconnectOutcome::Refused { reason } => Ok(reason_reply("refused", &reason)),
    }
}

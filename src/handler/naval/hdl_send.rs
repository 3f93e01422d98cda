use serde_json::Value;

use crate::handler::{typed_reply, NavalRequestBundle, Reply};
use crate::mailbox;
use crate::naval_errors::NCErr;

const MAX_TYPE_LEN: usize = 32;

pub async fn handle_rq_send(prq: &NavalRequestBundle) -> Result<Reply, NCErr> {
    let sid = prq.session_id()?;
    let msg_type = prq.require_str("type")?;
    if msg_type.len() > MAX_TYPE_LEN {
        return Err(NCErr::InvalidField("type"));
    }

    let sstate = &prq.sstate;
    let msg_id = mailbox::send(
        &*sstate.database,
        sstate.broker.as_ref(),
        sid,
        msg_type,
        &prq.relay_body(),
    )
    .await?;

    let mut reply = typed_reply("ok");
    reply.insert("msgId".to_string(), Value::from(msg_id));
    Ok(reply)
}

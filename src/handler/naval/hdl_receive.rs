use crate::handler::{typed_reply, NavalRequestBundle, Reply};
use crate::longpoll;
use crate::naval_errors::NCErr;

pub async fn handle_rq_receive(prq: &NavalRequestBundle) -> Result<Reply, NCErr> {
    let sid = prq.session_id()?;
    let after_id = prq.get_i64("after")?.unwrap_or(0).max(0);
    let poll_seq = prq.get_i64("seq")?.unwrap_or(0).max(0) as u64;

    let sstate = &prq.sstate;
    let message = longpoll::receive(
        &sstate.database,
        sstate.broker.as_ref(),
        &sstate.polls,
        sid,
        after_id,
        poll_seq,
        sstate.settings.poll_timeout,
    )
    .await?;

    Ok(match message {
        Some(message) => message.to_reply(),
        None => typed_reply("empty"),
    })
}

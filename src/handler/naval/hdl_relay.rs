use tracing::debug;

use crate::game_state;
use crate::handler::{typed_reply, NavalAction, NavalRequestBundle, Reply};
use crate::mailbox;
use crate::naval_errors::NCErr;

/// In-game actions that are forwarded verbatim to the opponent under their
/// own action name.
pub async fn handle_rq_relay(prq: &NavalRequestBundle) -> Result<Reply, NCErr> {
    let sid = prq.session_id()?;
    let db = &*prq.sstate.database;

    match prq.action {
        NavalAction::Shoot => game_state::record_shot(db, sid).await?,
        NavalAction::FldInfo => {
            if let Some(weapons) = prq.fields.get("weapons") {
                let weapons = game_state::parse_weapons(weapons)?;
                game_state::store_tracked_weapons(db, sid, &weapons).await?;
            }
            game_state::touch(db, sid).await?;
        }
        _ => game_state::touch(db, sid).await?,
    }

    let msg_id = mailbox::send(
        db,
        prq.sstate.broker.as_ref(),
        sid,
        prq.action.value(),
        &prq.relay_body(),
    )
    .await?;
    debug!(target: "http", "Relayed {} #{} from {}", prq.action.value(), msg_id, sid);

    Ok(typed_reply("ok"))
}

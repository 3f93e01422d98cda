use crate::game_state::{self, GameStatus, MarkOutcome};
use crate::handler::{error_reply, typed_reply, NavalRequestBundle, Reply};
use crate::naval_errors::NCErr;

pub async fn handle_rq_surrender(prq: &NavalRequestBundle) -> Result<Reply, NCErr> {
    let sid = prq.session_id()?;
    // Clients surrender automatically when they leave a running match
    let status = match prq.get_bool("auto")? {
        Some(true) => GameStatus::SurrenderedAuto,
        _ => GameStatus::Surrendered,
    };

    let sstate = &prq.sstate;
    let outcome =
        game_state::mark_finished(&sstate.database, sstate.broker.as_ref(), sid, status).await?;

    Ok(match outcome {
        MarkOutcome::Marked => typed_reply("ok"),
        MarkOutcome::NotPlayable => error_reply("session over"),
        MarkOutcome::NotFound => error_reply("session not found"),
    })
}

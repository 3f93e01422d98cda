use tracing::info;

use crate::game_state::{self, FinishOutcome};
use crate::handler::{error_reply, typed_reply, NavalRequestBundle, Reply};
use crate::naval_errors::NCErr;
use crate::score::ScoreRules;

pub async fn handle_rq_fin(prq: &NavalRequestBundle) -> Result<Reply, NCErr> {
    let sid = prq.session_id()?;
    let won = prq.get_bool("won")?.ok_or(NCErr::MissingField("won"))?;
    let score = prq.get_i64("score")?;

    let sstate = &prq.sstate;
    let db = &*sstate.database;

    if let Some(weapons) = prq.fields.get("weapons") {
        let weapons = game_state::parse_weapons(weapons)?;
        game_state::store_tracked_weapons(db, sid, &weapons).await?;
    }

    let rules = ScoreRules::load(&sstate.config_cache, db).await;
    let outcome = game_state::finish(
        db,
        sstate.broker.as_ref(),
        &rules,
        sid,
        won,
        score,
        &prq.relay_body(),
    )
    .await?;

    Ok(match outcome {
        FinishOutcome::Finished {
            winner_user_id,
            score,
            ..
        } => {
            info!(target: "http", "Fin from {}: winner {}, score {:?}", sid, winner_user_id, score);
            typed_reply("ok")
        }
        // Both players report the end; the second report only adds a late score
        FinishOutcome::AlreadyFinished { score } => {
            if let Some(score) = score {
                info!(target: "http", "Late score from {}: {:?}", sid, score);
            }
            typed_reply("ok")
        }
        FinishOutcome::NotJoined => error_reply("not joined"),
        FinishOutcome::NotFound => error_reply("session not found"),
    })
}

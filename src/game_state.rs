use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use sea_orm::entity::*;
use sea_orm::query::*;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{Condition, ConnectionTrait, DatabaseConnection, TransactionTrait};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::broker::BrokerLink;
use crate::mailbox;
use crate::naval_errors::NCErr;
use crate::orm::model::{game_session, score as score_row, tracked_weapons, user, user_inventory};
use crate::score::{self, ScoreOutcome, ScoreRules};
use crate::session_id::SessionId;

pub const WEAPON_ITEM_TYPE: &str = "weapon";
pub const FIN_MESSAGE: &str = "fin";

/// Lifecycle codes stored in `game_sessions.status`.
///
/// Codes below 2 are playable. Codes 2..=9 mark matches that ended without a
/// settled result; they are only entered from a playable state. 10 and above
/// are settled and never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum GameStatus {
    Waiting = 0,
    InProgress = 1,
    LeftWaiting = 2,
    SurrenderedAuto = 3,
    Surrendered = 4,
    TimedOutWaiting = 5,
    TimedOutPlaying = 6,
    TerminatedDuplicate = 7,
    LeftOld = 8,
    NotPingable = 9,
    FinishedOk = 10,
    SleepCheater = 11,
}

impl GameStatus {
    /// Bans share the settled code of a normal finish.
    pub const TIMED_BANNED: GameStatus = GameStatus::FinishedOk;

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => GameStatus::Waiting,
            1 => GameStatus::InProgress,
            2 => GameStatus::LeftWaiting,
            3 => GameStatus::SurrenderedAuto,
            4 => GameStatus::Surrendered,
            5 => GameStatus::TimedOutWaiting,
            6 => GameStatus::TimedOutPlaying,
            7 => GameStatus::TerminatedDuplicate,
            8 => GameStatus::LeftOld,
            9 => GameStatus::NotPingable,
            10 => GameStatus::FinishedOk,
            11 => GameStatus::SleepCheater,
            _ => return None,
        })
    }

    pub fn is_playable(self) -> bool {
        self.code() < GameStatus::LeftWaiting.code()
    }

    pub fn is_settled(self) -> bool {
        self.code() >= GameStatus::FinishedOk.code()
    }

    /// Codes that `mark_finished` may apply.
    pub fn is_marker(self) -> bool {
        !self.is_playable() && self != GameStatus::FinishedOk
    }
}

pub fn status_of(model: &game_session::Model) -> Option<GameStatus> {
    GameStatus::from_code(model.status)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishOutcome {
    Finished {
        winner_user_id: i64,
        loser_user_id: i64,
        score: Option<ScoreOutcome>,
    },
    AlreadyFinished {
        /// Set when this late report was the winner's and carried a score.
        score: Option<ScoreOutcome>,
    },
    NotJoined,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    NotPlayable,
    NotFound,
}

/// Bumps the liveness timestamp that matchmaking's freshness window reads.
pub async fn touch<C: ConnectionTrait>(db: &C, sid: SessionId) -> Result<(), NCErr> {
    game_session::Entity::update_many()
        .col_expr(game_session::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(game_session::Column::Id.eq(sid.base().as_db()))
        .exec(db)
        .await?;
    Ok(())
}

/// Counts a shot for the reporting player. Activity signal only, turn order
/// is not checked here.
pub async fn record_shot<C: ConnectionTrait>(db: &C, sid: SessionId) -> Result<(), NCErr> {
    let column = match sid.player() {
        0 => game_session::Column::MovesOne,
        _ => game_session::Column::MovesTwo,
    };
    game_session::Entity::update_many()
        .col_expr(column, Expr::col(column).add(1))
        .col_expr(game_session::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(game_session::Column::Id.eq(sid.base().as_db()))
        .exec(db)
        .await?;
    Ok(())
}

/// Parses a `{"<weapon id>": count}` object. Non-numeric counts are skipped.
pub fn parse_weapons(value: &Value) -> Result<IndexMap<String, i64>, NCErr> {
    let Value::Object(map) = value else {
        return Err(NCErr::InvalidField("weapons"));
    };
    let mut weapons = IndexMap::new();
    for (weapon_id, count) in map {
        let count = match count {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse::<i64>().ok(),
            _ => None,
        };
        if let Some(count) = count {
            weapons.insert(weapon_id.clone(), count);
        }
    }
    Ok(weapons)
}

/// Stores (or replaces) the loadout declared by one player of a match.
pub async fn store_tracked_weapons<C: ConnectionTrait>(
    db: &C,
    sid: SessionId,
    weapons: &IndexMap<String, i64>,
) -> Result<(), NCErr> {
    let encoded = serde_json::to_string(weapons).map_err(|_| NCErr::InvalidField("weapons"))?;
    let row = tracked_weapons::ActiveModel {
        session_id: Set(sid.base().as_db()),
        player: Set(sid.player() as i32),
        weapons: Set(encoded),
        updated_at: Set(Utc::now()),
    };
    tracked_weapons::Entity::insert(row)
        .on_conflict(
            OnConflict::columns([
                tracked_weapons::Column::SessionId,
                tracked_weapons::Column::Player,
            ])
            .update_columns([
                tracked_weapons::Column::Weapons,
                tracked_weapons::Column::UpdatedAt,
            ])
            .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

async fn load_tracked_weapons<C: ConnectionTrait>(
    db: &C,
    base: SessionId,
    player: u8,
) -> Result<IndexMap<String, i64>, NCErr> {
    let Some(row) = tracked_weapons::Entity::find()
        .filter(tracked_weapons::Column::SessionId.eq(base.as_db()))
        .filter(tracked_weapons::Column::Player.eq(player as i32))
        .one(db)
        .await?
    else {
        return Ok(IndexMap::new());
    };
    match serde_json::from_str::<Value>(&row.weapons) {
        Ok(value) => parse_weapons(&value),
        Err(_) => {
            warn!(target: "game", "Unreadable tracked weapons for {} player {}", base, player);
            Ok(IndexMap::new())
        }
    }
}

/// Takes the used weapons out of a player's inventory, never below zero, and
/// drops rows that ran empty.
async fn consume_weapons<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    weapons: &IndexMap<String, i64>,
) -> Result<(), NCErr> {
    for (weapon_id, count) in weapons {
        if *count <= 0 {
            continue;
        }
        let rows = user_inventory::Entity::find()
            .filter(user_inventory::Column::UserId.eq(user_id))
            .filter(user_inventory::Column::ItemType.eq(WEAPON_ITEM_TYPE))
            .filter(user_inventory::Column::ItemId.eq(weapon_id.as_str()))
            .lock_exclusive()
            .all(db)
            .await?;

        let mut remaining = *count;
        for row in rows {
            if remaining <= 0 {
                break;
            }
            let taken = remaining.min(row.quantity.max(0) as i64) as i32;
            remaining -= taken as i64;

            let quantity = row.quantity - taken;
            let used = row.used + taken;
            let mut active = row.into_active_model();
            active.quantity = Set(quantity);
            active.used = Set(used);
            active.update(db).await?;
        }
    }

    user_inventory::Entity::delete_many()
        .filter(user_inventory::Column::UserId.eq(user_id))
        .filter(user_inventory::Column::Quantity.lte(0))
        .exec(db)
        .await?;
    Ok(())
}

/// Settles a match from one player's report.
///
/// The outcome is self-reported by the client; no replay of the shots
/// happens server side. A surrender already recorded by `mark_finished`
/// decides the winner and the claim is ignored. Settlement runs under the
/// session row lock, so a second report finds a settled status and only
/// records the winner's score when the first report came from the loser.
pub async fn finish(
    db: &DatabaseConnection,
    link: &dyn BrokerLink,
    rules: &ScoreRules,
    reporter: SessionId,
    won: bool,
    reported_score: Option<i64>,
    relay_body: &Map<String, Value>,
) -> Result<FinishOutcome, NCErr> {
    let base = reporter.base();
    let txn = db.begin().await?;

    let Some(session) = game_session::Entity::find_by_id(base.as_db())
        .lock_exclusive()
        .one(&txn)
        .await?
    else {
        return Ok(FinishOutcome::NotFound);
    };
    if session.status >= GameStatus::FinishedOk.code() {
        let late_score = reported_score.filter(|_| won);
        let score = late_winner_score(&txn, rules, &session, reporter, late_score).await?;
        txn.commit().await?;
        debug!(target: "game", "Session {} already settled, late score {:?}", base, score);
        return Ok(FinishOutcome::AlreadyFinished { score });
    }
    let Some(user_two_id) = session.user_two_id else {
        return Ok(FinishOutcome::NotJoined);
    };

    let surrendered = matches!(
        status_of(&session),
        Some(GameStatus::Surrendered | GameStatus::SurrenderedAuto)
    );
    let winner_player = match session.winner_id {
        Some(winner) if surrendered => u8::from(winner != session.user_one_id),
        _ if won => reporter.player(),
        _ => reporter.opponent().player(),
    };
    let (winner_user_id, loser_user_id) = match winner_player {
        0 => (session.user_one_id, user_two_id),
        _ => (user_two_id, session.user_one_id),
    };

    let now = Utc::now();
    let joined_at = session.joined_at.unwrap_or(session.created_at);
    let mut active = session.into_active_model();
    active.status = Set(GameStatus::FinishedOk.code());
    active.finished_at = Set(Some(now));
    active.updated_at = Set(now);
    active.winner_id = Set(Some(winner_user_id));
    active.update(&txn).await?;

    user::Entity::update_many()
        .col_expr(user::Column::Games, Expr::col(user::Column::Games).add(1))
        .col_expr(user::Column::Wins, Expr::col(user::Column::Wins).add(1))
        .col_expr(user::Column::Stars, Expr::col(user::Column::Stars).add(1))
        .filter(user::Column::Id.eq(winner_user_id))
        .exec(&txn)
        .await?;
    user::Entity::update_many()
        .col_expr(user::Column::Games, Expr::col(user::Column::Games).add(1))
        .filter(user::Column::Id.eq(loser_user_id))
        .exec(&txn)
        .await?;

    let loser_weapons = load_tracked_weapons(&txn, base, 1 - winner_player).await?;
    consume_weapons(&txn, loser_user_id, &loser_weapons).await?;

    // Only the winner's own report carries a score worth recording
    let score = match (reporter.player() == winner_player, reported_score) {
        (true, Some(points)) => Some(
            score::submit_score(
                &txn,
                rules,
                winner_user_id,
                base.as_db(),
                points,
                duration_secs(joined_at, now),
            )
            .await?,
        ),
        _ => None,
    };

    txn.commit().await?;
    info!(target: "game", "Session {} finished, winner user {}", base, winner_user_id);

    if let Err(err) = mailbox::send(db, link, reporter, FIN_MESSAGE, relay_body).await {
        warn!(target: "game", "Failed to relay finish of {}: {}", base, err);
    }

    Ok(FinishOutcome::Finished {
        winner_user_id,
        loser_user_id,
        score,
    })
}

/// Score of a winner whose report arrived after the loser settled the match.
/// Stored at most once per session.
async fn late_winner_score<C: ConnectionTrait>(
    db: &C,
    rules: &ScoreRules,
    session: &game_session::Model,
    reporter: SessionId,
    reported_score: Option<i64>,
) -> Result<Option<ScoreOutcome>, NCErr> {
    let Some(points) = reported_score else {
        return Ok(None);
    };
    let reporter_user_id = match reporter.player() {
        0 => session.user_one_id,
        _ => match session.user_two_id {
            Some(id) => id,
            None => return Ok(None),
        },
    };
    if session.status != GameStatus::FinishedOk.code()
        || session.winner_id != Some(reporter_user_id)
    {
        return Ok(None);
    }
    let recorded = score_row::Entity::find()
        .filter(score_row::Column::SessionId.eq(session.id))
        .count(db)
        .await?;
    if recorded > 0 {
        return Ok(None);
    }

    let joined_at = session.joined_at.unwrap_or(session.created_at);
    let finished_at = session.finished_at.unwrap_or_else(Utc::now);
    let outcome = score::submit_score(
        db,
        rules,
        reporter_user_id,
        session.id,
        points,
        duration_secs(joined_at, finished_at),
    )
    .await?;
    Ok(Some(outcome))
}

fn duration_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds().max(0)
}

/// Ends a still playable match with one of the unsettled codes and tells the
/// opponent. Surrender codes credit the opponent as winner without touching
/// any stats.
pub async fn mark_finished(
    db: &DatabaseConnection,
    link: &dyn BrokerLink,
    reporter: SessionId,
    status: GameStatus,
) -> Result<MarkOutcome, NCErr> {
    if !status.is_marker() {
        return Err(NCErr::InvalidField("status"));
    }
    let base = reporter.base();
    let txn = db.begin().await?;

    let Some(session) = game_session::Entity::find_by_id(base.as_db())
        .lock_exclusive()
        .one(&txn)
        .await?
    else {
        return Ok(MarkOutcome::NotFound);
    };
    if !status_of(&session).is_some_and(GameStatus::is_playable) {
        return Ok(MarkOutcome::NotPlayable);
    }

    let winner_id = match (status, reporter.player()) {
        (GameStatus::Surrendered | GameStatus::SurrenderedAuto, 0) => session.user_two_id,
        (GameStatus::Surrendered | GameStatus::SurrenderedAuto, _) => Some(session.user_one_id),
        _ => None,
    };
    let now = Utc::now();
    let mut active = session.into_active_model();
    active.status = Set(status.code());
    active.finished_at = Set(Some(now));
    active.updated_at = Set(now);
    active.winner_id = Set(winner_id);
    active.update(&txn).await?;
    txn.commit().await?;

    info!(target: "game", "Session {} marked {:?}", base, status);

    let mut body = Map::new();
    body.insert("reason".to_string(), Value::from(status.code()));
    if let Err(err) = mailbox::send(db, link, reporter, FIN_MESSAGE, &body).await {
        warn!(target: "game", "Failed to relay {:?} of {}: {}", status, base, err);
    }
    Ok(MarkOutcome::Marked)
}

/// Marks every still playable session of `user_id` as a terminated duplicate.
pub async fn terminate_user_sessions<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
) -> Result<u64, NCErr> {
    let res = game_session::Entity::update_many()
        .col_expr(
            game_session::Column::Status,
            Expr::value(GameStatus::TerminatedDuplicate.code()),
        )
        .col_expr(game_session::Column::FinishedAt, Expr::value(Some(Utc::now())))
        .filter(
            Condition::any()
                .add(game_session::Column::UserOneId.eq(user_id))
                .add(game_session::Column::UserTwoId.eq(user_id)),
        )
        // Unsettled markers (2..=9) are final too and keep their code
        .filter(game_session::Column::Status.lt(GameStatus::LeftWaiting.code()))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

/// Times out playable sessions nobody touched for `idle`. Returns the number
/// of waiting and in-progress sessions that were closed.
///
/// A bulk update that relays nothing: every `receive` touches the session, so
/// an idle one has no client left polling for a `fin`.
pub async fn expire_stale_sessions<C: ConnectionTrait>(
    db: &C,
    idle: chrono::Duration,
) -> Result<(u64, u64), NCErr> {
    let cutoff = Utc::now() - idle;
    let mut closed = [0u64; 2];
    for (i, (from, to)) in [
        (GameStatus::Waiting, GameStatus::TimedOutWaiting),
        (GameStatus::InProgress, GameStatus::TimedOutPlaying),
    ]
    .into_iter()
    .enumerate()
    {
        let res = game_session::Entity::update_many()
            .col_expr(game_session::Column::Status, Expr::value(to.code()))
            .col_expr(game_session::Column::FinishedAt, Expr::value(Some(Utc::now())))
            .filter(game_session::Column::Status.eq(from.code()))
            .filter(game_session::Column::UpdatedAt.lt(cutoff))
            .exec(db)
            .await?;
        closed[i] = res.rows_affected;
    }
    Ok((closed[0], closed[1]))
}

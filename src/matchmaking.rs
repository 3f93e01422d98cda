use chrono::Utc;
use sea_orm::entity::*;
use sea_orm::query::*;
use sea_orm::sea_query::Expr;
use sea_orm::{DatabaseConnection, DatabaseTransaction, IsolationLevel, Select, TransactionTrait};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::game_state::{self, GameStatus};
use crate::naval_errors::NCErr;
use crate::orm::model::{game_session, matchmaking_lock, user};
use crate::orm::{CFG_MAINTENANCE_MODE, CFG_MIN_VERSION};
use crate::session_id::{IdGenerator, SessionId};
use crate::utils::config_values::ConfigCache;

#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub name: String,
    pub device_uuid: String,
    pub app_version: String,
    pub variant: i32,
    pub device_info: Option<Value>,
    /// User id of a personally invited opponent.
    pub preferred_opponent: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected {
        sid: SessionId,
        user_id: i64,
        joined: bool,
    },
    Refused {
        reason: String,
    },
    Banned {
        reason: String,
    },
    Maintenance {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectOutcome {
    Connected { sid: SessionId },
    Refused { reason: String },
}

/// Server-wide admission switches read from the config table.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessGate {
    pub maintenance: bool,
    pub min_version: i64,
}

impl AccessGate {
    pub async fn load(cache: &ConfigCache, db: &DatabaseConnection) -> Self {
        Self {
            maintenance: cache.get_flag(CFG_MAINTENANCE_MODE, db).await,
            min_version: cache.get_i64(CFG_MIN_VERSION, db, 0).await,
        }
    }

    fn version_too_old(&self, app_version: &str) -> bool {
        match app_version.trim().parse::<i64>() {
            Ok(version) => version < self.min_version,
            Err(_) => false,
        }
    }
}

/// Finds a waiting opponent or opens a new waiting session for the caller.
///
/// Never fails: storage errors roll the transaction back and come out as a
/// refusal.
pub async fn connect(
    db: &DatabaseConnection,
    ids: &IdGenerator,
    gate: &AccessGate,
    freshness: chrono::Duration,
    req: &ConnectRequest,
) -> ConnectOutcome {
    match try_connect(db, ids, gate, freshness, req).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(target: "matchmaking", "Connect of {} failed: {}", req.device_uuid, err);
            ConnectOutcome::Refused {
                reason: err.client_reason(),
            }
        }
    }
}

async fn try_connect(
    db: &DatabaseConnection,
    ids: &IdGenerator,
    gate: &AccessGate,
    freshness: chrono::Duration,
    req: &ConnectRequest,
) -> Result<ConnectOutcome, NCErr> {
    // An `opp` naming the caller themselves still takes the public path
    ensure_lock_row(db, req.variant).await?;

    // Read committed, so a waiting session committed by a concurrent
    // connect after this transaction began is still visible to the search.
    let txn = db
        .begin_with_config(Some(IsolationLevel::ReadCommitted), None)
        .await?;

    let db_user = resolve_user(&txn, req).await?;

    if gate.maintenance {
        txn.commit().await?;
        return Ok(ConnectOutcome::Maintenance {
            reason: "maintenance".to_string(),
        });
    }
    if db_user.banned {
        txn.commit().await?;
        return Ok(ConnectOutcome::Banned {
            reason: "banned".to_string(),
        });
    }
    if gate.version_too_old(&req.app_version) {
        txn.commit().await?;
        return Ok(ConnectOutcome::Refused {
            reason: "update required".to_string(),
        });
    }

    let terminated = game_state::terminate_user_sessions(&txn, db_user.id).await?;
    if terminated > 0 {
        debug!(target: "matchmaking", "Terminated {} stale sessions of user {}", terminated, db_user.id);
    }

    let invite = req.preferred_opponent.filter(|opp| *opp != db_user.id);
    if invite.is_none() && variant_lock(req.variant).one(&txn).await?.is_none() {
        warn!(target: "matchmaking", "No lock row for variant {}, pairing unserialized", req.variant);
    }

    let now = Utc::now();
    let waiting = waiting_query(db_user.id, req.variant, invite, now - freshness)
        .one(&txn)
        .await?;
    if let Some(waiting) = waiting {
        let joined = game_session::Entity::update_many()
            .col_expr(game_session::Column::UserTwoId, Expr::value(Some(db_user.id)))
            .col_expr(game_session::Column::JoinedAt, Expr::value(Some(now)))
            .col_expr(game_session::Column::UpdatedAt, Expr::value(now))
            .col_expr(
                game_session::Column::Status,
                Expr::value(GameStatus::InProgress.code()),
            )
            .filter(game_session::Column::Id.eq(waiting.id))
            .filter(game_session::Column::UserTwoId.is_null())
            .filter(game_session::Column::Status.eq(GameStatus::Waiting.code()))
            .exec(&txn)
            .await?;

        if joined.rows_affected == 1 {
            txn.commit().await?;
            let sid = SessionId::from_db(waiting.id)?.with_player(1);
            info!(target: "matchmaking", "User {} joined session {}", db_user.id, sid.base());
            return Ok(ConnectOutcome::Connected {
                sid,
                user_id: db_user.id,
                joined: true,
            });
        }
        debug!(target: "matchmaking", "Lost the join race for session {}", waiting.id);
    }

    let sid = ids.mint();
    let session = game_session::ActiveModel {
        id: Set(sid.as_db()),
        user_one_id: Set(db_user.id),
        user_two_id: Set(None),
        invite_user_id: Set(invite),
        status: Set(GameStatus::Waiting.code()),
        variant: Set(req.variant),
        created_at: Set(now),
        updated_at: Set(now),
        joined_at: Set(None),
        finished_at: Set(None),
        moves_one: Set(0),
        moves_two: Set(0),
        winner_id: Set(None),
    };
    game_session::Entity::insert(session)
        .exec_without_returning(&txn)
        .await?;
    txn.commit().await?;

    info!(target: "matchmaking", "User {} created session {}", db_user.id, sid);
    Ok(ConnectOutcome::Connected {
        sid,
        user_id: db_user.id,
        joined: false,
    })
}

/// The per-variant lock row has to exist before it can be read `FOR UPDATE`.
/// Created outside the matchmaking transaction so a conflicting insert cannot
/// abort it.
async fn ensure_lock_row(db: &DatabaseConnection, variant: i32) -> Result<(), NCErr> {
    if matchmaking_lock::Entity::find_by_id(variant)
        .one(db)
        .await?
        .is_some()
    {
        return Ok(());
    }
    let row = matchmaking_lock::ActiveModel {
        variant: Set(variant),
    };
    if let Err(err) = matchmaking_lock::Entity::insert(row)
        .exec_without_returning(db)
        .await
    {
        // Another worker created it first
        debug!(target: "matchmaking", "Lock row for variant {} not inserted: {}", variant, err);
    }
    Ok(())
}

async fn resolve_user(txn: &DatabaseTransaction, req: &ConnectRequest) -> Result<user::Model, NCErr> {
    let now = Utc::now();
    let device_info = req
        .device_info
        .as_ref()
        .map(Value::to_string)
        .unwrap_or_else(|| "{}".to_string());

    let existing = user::Entity::find()
        .filter(user::Column::DeviceUuid.eq(req.device_uuid.as_str()))
        .one(txn)
        .await?;

    match existing {
        Some(db_user) => {
            let mut active = db_user.into_active_model();
            active.name = Set(req.name.clone());
            active.app_version = Set(req.app_version.clone());
            if req.device_info.is_some() {
                active.device_info = Set(device_info);
            }
            active.last_seen = Set(now);
            Ok(active.update(txn).await?)
        }
        None => {
            let new_user = user::ActiveModel {
                device_uuid: Set(req.device_uuid.clone()),
                name: Set(req.name.clone()),
                app_version: Set(req.app_version.clone()),
                device_info: Set(device_info),
                banned: Set(false),
                games: Set(0),
                wins: Set(0),
                stars: Set(0),
                created_at: Set(now),
                last_seen: Set(now),
                ..Default::default()
            };
            Ok(new_user.insert(txn).await?)
        }
    }
}

/// Serializes every find-or-create decision of one variant.
fn variant_lock(variant: i32) -> Select<matchmaking_lock::Entity> {
    matchmaking_lock::Entity::find_by_id(variant).lock_exclusive()
}

/// Oldest fresh waiting session the caller may join, row locked.
fn waiting_query(
    user_id: i64,
    variant: i32,
    invite: Option<i64>,
    fresh_since: chrono::DateTime<Utc>,
) -> Select<game_session::Entity> {
    let query = game_session::Entity::find()
        .filter(game_session::Column::Status.eq(GameStatus::Waiting.code()))
        .filter(game_session::Column::Variant.eq(variant))
        .filter(game_session::Column::UpdatedAt.gt(fresh_since))
        .filter(game_session::Column::UserOneId.ne(user_id))
        .filter(game_session::Column::UserTwoId.is_null());

    let query = match invite {
        Some(inviter) => query
            .filter(game_session::Column::UserOneId.eq(inviter))
            .filter(game_session::Column::InviteUserId.eq(user_id)),
        None => query.filter(game_session::Column::InviteUserId.is_null()),
    };

    query
        .order_by_asc(game_session::Column::CreatedAt)
        .lock_exclusive()
}

/// Confirms that `sid` still points at a playable session. Read only.
pub async fn reconnect(db: &DatabaseConnection, sid: SessionId) -> ReconnectOutcome {
    let found = game_session::Entity::find_by_id(sid.base().as_db())
        .filter(game_session::Column::Status.lt(GameStatus::LeftWaiting.code()))
        .one(db)
        .await;

    match found {
        Ok(Some(session)) if sid.player() == 0 || session.user_two_id.is_some() => {
            ReconnectOutcome::Connected { sid }
        }
        Ok(_) => ReconnectOutcome::Refused {
            reason: "session over".to_string(),
        },
        Err(err) => {
            error!(target: "matchmaking", "Reconnect of {} failed: {}", sid, err);
            ReconnectOutcome::Refused {
                reason: "server error".to_string(),
            }
        }
    }
}

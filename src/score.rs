use chrono::Utc;
use sea_orm::entity::*;
use sea_orm::ConnectionTrait;
use sea_orm::DatabaseConnection;
use tracing::debug;

use crate::naval_errors::NCErr;
use crate::orm::model::score;
use crate::orm::{CFG_SCORE_MIN, CFG_SCORE_MIN_DURATION};
use crate::utils::config_values::ConfigCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreRules {
    pub min_score: i64,
    pub min_duration_secs: i64,
}

impl Default for ScoreRules {
    fn default() -> Self {
        Self {
            min_score: 3000,
            min_duration_secs: 30,
        }
    }
}

impl ScoreRules {
    pub async fn load(cache: &ConfigCache, db: &DatabaseConnection) -> Self {
        let defaults = ScoreRules::default();
        Self {
            min_score: cache.get_i64(CFG_SCORE_MIN, db, defaults.min_score).await,
            min_duration_secs: cache
                .get_i64(CFG_SCORE_MIN_DURATION, db, defaults.min_duration_secs)
                .await,
        }
    }

    pub fn check(&self, score: i64, duration_secs: i64) -> Result<(), ScoreRejection> {
        if duration_secs < self.min_duration_secs {
            return Err(ScoreRejection::GameTooShort);
        }
        if score < self.min_score {
            return Err(ScoreRejection::ScoreTooLow);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreRejection {
    GameTooShort,
    ScoreTooLow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOutcome {
    Accepted(i64),
    Rejected(ScoreRejection),
}

pub async fn submit_score<C: ConnectionTrait>(
    db: &C,
    rules: &ScoreRules,
    user_id: i64,
    session_id: i64,
    score: i64,
    duration_secs: i64,
) -> Result<ScoreOutcome, NCErr> {
    if let Err(rejection) = rules.check(score, duration_secs) {
        debug!(target: "game", "Score {} of user {} rejected: {:?}", score, user_id, rejection);
        return Ok(ScoreOutcome::Rejected(rejection));
    }

    let row = score::ActiveModel {
        user_id: Set(user_id),
        session_id: Set(session_id),
        score: Set(score.clamp(0, i32::MAX as i64) as i32),
        duration_secs: Set(duration_secs.clamp(0, i32::MAX as i64) as i32),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    let row = row.insert(db).await?;
    Ok(ScoreOutcome::Accepted(row.id))
}

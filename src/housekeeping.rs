use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::game_state;
use crate::mailbox;
use crate::sharedstate::SharedState;

/// One sweep of the mailbox plus expiry of idle sessions.
pub async fn housekeeping_pass(db: &DatabaseConnection, settings: &Configuration) {
    match mailbox::sweep(db, settings.mailbox_max_age_hours, settings.mailbox_sweep_limit).await {
        Ok(0) => debug!(target: "mailbox", "Sweep found nothing to remove"),
        Ok(removed) => info!(target: "mailbox", "Swept {} stale messages", removed),
        Err(err) => warn!(target: "mailbox", "Mailbox sweep failed: {}", err),
    }

    match game_state::expire_stale_sessions(db, settings.session_expiry).await {
        Ok((0, 0)) => {}
        Ok((waiting, playing)) => info!(
            target: "game",
            "Expired {} waiting and {} running sessions", waiting, playing
        ),
        Err(err) => warn!(target: "game", "Session expiry failed: {}", err),
    }
}

pub fn spawn_housekeeping(sstate: Arc<SharedState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sstate.settings.mailbox_sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            housekeeping_pass(&sstate.database, &sstate.settings).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::RecordingLink;
    use crate::game_state::tests::{insert_session, insert_user};
    use crate::game_state::GameStatus;
    use crate::orm::model::{game_session, session_message};
    use crate::orm::test_database;
    use crate::session_id::SessionId;
    use chrono::Utc;
    use sea_orm::entity::*;
    use sea_orm::query::*;
    use sea_orm::sea_query::Expr;
    use serde_json::Map;

    #[tokio::test]
    async fn pass_sweeps_and_expires() {
        let db = test_database().await;
        let settings = Configuration::from_lookup(|_| None).unwrap();

        let a = insert_user(&db, "a").await;
        insert_session(&db, 1000, a, None, GameStatus::Waiting).await;
        mailbox::send(&db, &RecordingLink::default(), SessionId::from_raw(1000), "chat", &Map::new())
            .await
            .unwrap();

        let long_ago = Utc::now() - chrono::Duration::days(2);
        game_session::Entity::update_many()
            .col_expr(game_session::Column::UpdatedAt, Expr::value(long_ago))
            .exec(&db)
            .await
            .unwrap();
        session_message::Entity::update_many()
            .col_expr(session_message::Column::CreatedAt, Expr::value(long_ago))
            .exec(&db)
            .await
            .unwrap();

        housekeeping_pass(&db, &settings).await;

        let session = game_session::Entity::find_by_id(1000)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, GameStatus::TimedOutWaiting.code());
        assert_eq!(session_message::Entity::find().count(&db).await.unwrap(), 0);
    }
}

pub mod hdl_connect;
pub mod hdl_fin;
pub mod hdl_receive;
pub mod hdl_reconnect;
pub mod hdl_relay;
pub mod hdl_send;
pub mod hdl_surrender;

#[cfg(test)]
mod tests {
    use axum::body::Bytes;
    use axum::extract::{Path, State};
    use sea_orm::entity::*;
    use sea_orm::query::*;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::broker::testing::RecordingLink;
    use crate::broker::BrokerLink;
    use crate::config::Configuration;
    use crate::handler::{action_handler, handle_request, NavalAction, NavalRequestBundle, Reply};
    use crate::longpoll::PollRegistry;
    use crate::orm::model::{config, game_session, tracked_weapons};
    use crate::orm::{test_database, CFG_MAINTENANCE_MODE};
    use crate::session_id::{IdGenerator, SessionId};
    use crate::sharedstate::SharedState;

    async fn worker_state() -> Arc<SharedState> {
        let mut settings = Configuration::from_lookup(|_| None).unwrap();
        settings.poll_timeout = Duration::from_millis(50);
        let link: Arc<dyn BrokerLink> = Arc::new(RecordingLink::default());
        Arc::new(SharedState::from_parts(
            test_database().await,
            IdGenerator::new(3).unwrap(),
            link,
            Arc::new(PollRegistry::new()),
            settings,
        ))
    }

    async fn call(sstate: &Arc<SharedState>, action: &str, body: Value) -> Reply {
        let Value::Object(fields) = body else {
            panic!("request body must be an object");
        };
        let action = NavalAction::from_value(action).unwrap();
        handle_request(NavalRequestBundle::new(action, fields, sstate.clone())).await
    }

    async fn connect(sstate: &Arc<SharedState>, uuid: &str) -> Reply {
        call(
            sstate,
            "connect",
            json!({"name": format!("captain {}", uuid), "uuid": uuid, "ver": 120, "gv": 0}),
        )
        .await
    }

    fn sid_of(reply: &Reply) -> String {
        reply["sid"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn full_match_over_http_actions() {
        let sstate = worker_state().await;

        let a = connect(&sstate, "dev-a").await;
        let b = connect(&sstate, "dev-b").await;
        assert_eq!(a["type"], json!("connected"));
        assert_eq!((a["joined"].clone(), a["player"].clone()), (json!(false), json!(0)));
        assert_eq!((b["joined"].clone(), b["player"].clone()), (json!(true), json!(1)));
        let (sa, sb) = (sid_of(&a), sid_of(&b));
        assert_eq!(
            SessionId::parse(&sb).unwrap(),
            SessionId::parse(&sa).unwrap().opponent()
        );

        let shot = call(&sstate, "shoot", json!({"sid": sa, "x": 3, "y": 4})).await;
        assert_eq!(shot["type"], json!("ok"));

        let got = call(&sstate, "receive", json!({"sid": sb, "after": 0, "seq": 1})).await;
        assert_eq!(got["type"], json!("shoot"));
        assert_eq!((got["x"].clone(), got["y"].clone()), (json!(3), json!(4)));
        assert!(got.get("sid").is_none());
        let first_id = got["msgId"].as_i64().unwrap();

        let idle = call(&sstate, "receive", json!({"sid": sb, "after": first_id, "seq": 2})).await;
        assert_eq!(idle["type"], json!("empty"));

        let fin = call(&sstate, "fin", json!({"sid": sa, "won": true, "score": 4200})).await;
        assert_eq!(fin["type"], json!("ok"));
        let again = call(&sstate, "fin", json!({"sid": sb, "won": true, "score": 4200})).await;
        assert_eq!(again["type"], json!("ok"));

        let relayed = call(&sstate, "receive", json!({"sid": sb, "after": first_id, "seq": 3})).await;
        assert_eq!(relayed["type"], json!("fin"));
        assert_eq!(relayed["won"], json!(true));

        let row = game_session::Entity::find_by_id(SessionId::parse(&sa).unwrap().as_db())
            .one(&*sstate.database)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, 10);
        assert_eq!(row.moves_one, 1);

        let back = call(&sstate, "reconnect", json!({"sid": sa})).await;
        assert_eq!(back["type"], json!("refused"));
    }

    #[tokio::test]
    async fn send_echoes_message_id() {
        let sstate = worker_state().await;
        let a = connect(&sstate, "dev-a").await;
        let sa = sid_of(&a);

        let sent = call(&sstate, "send", json!({"sid": sa, "type": "emoji", "id": 7})).await;
        assert_eq!(sent["type"], json!("ok"));
        assert!(sent["msgId"].as_i64().unwrap() > 0);

        let opponent = SessionId::parse(&sa).unwrap().opponent().to_string();
        let got = call(&sstate, "receive", json!({"sid": opponent})).await;
        assert_eq!(got["type"], json!("emoji"));
        assert_eq!(got["msgId"], sent["msgId"]);
        assert_eq!(got["id"], json!(7));
    }

    #[tokio::test]
    async fn field_info_tracks_weapons() {
        let sstate = worker_state().await;
        let sa = sid_of(&connect(&sstate, "dev-a").await);
        connect(&sstate, "dev-b").await;

        let reply = call(
            &sstate,
            "fldinfo",
            json!({"sid": sa, "field": "....", "weapons": {"2": 3, "5": 1}}),
        )
        .await;
        assert_eq!(reply["type"], json!("ok"));

        let rows = tracked_weapons::Entity::find()
            .all(&*sstate.database)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].player, 0);

        let bad = call(&sstate, "fldinfo", json!({"sid": sa, "weapons": [1, 2]})).await;
        assert_eq!(bad["type"], json!("error"));
    }

    #[tokio::test]
    async fn surrender_is_relayed_once() {
        let sstate = worker_state().await;
        let sa = sid_of(&connect(&sstate, "dev-a").await);
        let sb = sid_of(&connect(&sstate, "dev-b").await);

        let gone = call(&sstate, "surrender", json!({"sid": sb})).await;
        assert_eq!(gone["type"], json!("ok"));
        let twice = call(&sstate, "surrender", json!({"sid": sb})).await;
        assert_eq!(twice["type"], json!("error"));

        let got = call(&sstate, "receive", json!({"sid": sa})).await;
        assert_eq!(got["type"], json!("fin"));
        assert_eq!(got["reason"], json!(4));
    }

    #[tokio::test]
    async fn maintenance_refuses_connects() {
        let sstate = worker_state().await;
        config::Entity::update_many()
            .col_expr(config::Column::Value, sea_orm::sea_query::Expr::value("1"))
            .filter(config::Column::Key.eq(CFG_MAINTENANCE_MODE))
            .exec(&*sstate.database)
            .await
            .unwrap();

        let reply = connect(&sstate, "dev-a").await;
        assert_eq!(reply["type"], json!("maintenance"));
    }

    #[tokio::test]
    async fn bad_input_gets_typed_errors() {
        let sstate = worker_state().await;

        let no_sid = call(&sstate, "send", json!({"type": "chat"})).await;
        assert_eq!(no_sid["type"], json!("error"));
        assert_eq!(no_sid["reason"], json!("missing field `sid`"));

        let bad_sid = call(&sstate, "receive", json!({"sid": "12ab"})).await;
        assert_eq!(bad_sid["reason"], json!("malformed session id"));

        let no_type = call(&sstate, "send", json!({"sid": "1000"})).await;
        assert_eq!(no_type["reason"], json!("missing field `type`"));

        let no_uuid = call(&sstate, "connect", json!({"name": "x"})).await;
        assert_eq!(no_uuid["reason"], json!("missing field `uuid`"));
    }

    #[tokio::test]
    async fn http_entry_point_always_answers_typed_json() {
        let sstate = worker_state().await;

        let unknown = action_handler(
            State(sstate.clone()),
            Path("launch".to_string()),
            Bytes::new(),
        )
        .await;
        assert_eq!(unknown.0["reason"], json!("unknown action"));

        let malformed = action_handler(
            State(sstate.clone()),
            Path("receive".to_string()),
            Bytes::from_static(b"[1, 2]"),
        )
        .await;
        assert_eq!(malformed.0["reason"], json!("malformed request"));

        let connected = action_handler(
            State(sstate),
            Path("connect".to_string()),
            Bytes::from_static(br#"{"name": "Ahab", "uuid": "dev-a", "ver": "120"}"#),
        )
        .await;
        assert_eq!(connected.0["type"], json!("connected"));
    }
}

pub mod naval;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::naval_errors::NCErr;
use crate::session_id::SessionId;
use crate::sharedstate::SharedState;

pub type Reply = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavalAction {
    Connect,
    Reconnect,
    Receive,
    Send,
    Shoot,
    YourTurn,
    Chat,
    Info,
    FldReq,
    FldInfo,
    Dutch,
    SMove,
    Fin,
    Surrender,
}

impl NavalAction {
    pub fn value(&self) -> &'static str {
        match self {
            NavalAction::Connect => "connect",
            NavalAction::Reconnect => "reconnect",
            NavalAction::Receive => "receive",
            NavalAction::Send => "send",
            NavalAction::Shoot => "shoot",
            NavalAction::YourTurn => "yourturn",
            NavalAction::Chat => "chat",
            NavalAction::Info => "info",
            NavalAction::FldReq => "fldreq",
            NavalAction::FldInfo => "fldinfo",
            NavalAction::Dutch => "dutch",
            NavalAction::SMove => "smove",
            NavalAction::Fin => "fin",
            NavalAction::Surrender => "surrender",
        }
    }

    pub fn from_value(value: &str) -> Result<Self, &'static str> {
        match value {
            "connect" => Ok(NavalAction::Connect),
            "reconnect" => Ok(NavalAction::Reconnect),
            "receive" => Ok(NavalAction::Receive),
            "send" => Ok(NavalAction::Send),
            "shoot" => Ok(NavalAction::Shoot),
            "yourturn" => Ok(NavalAction::YourTurn),
            "chat" => Ok(NavalAction::Chat),
            "info" => Ok(NavalAction::Info),
            "fldreq" => Ok(NavalAction::FldReq),
            "fldinfo" => Ok(NavalAction::FldInfo),
            "dutch" => Ok(NavalAction::Dutch),
            "smove" => Ok(NavalAction::SMove),
            "fin" => Ok(NavalAction::Fin),
            "surrender" => Ok(NavalAction::Surrender),
            _ => Err("Unknown action"),
        }
    }
}

/// One decoded HTTP call: the action, its flat JSON fields and the worker
/// state it runs against.
pub struct NavalRequestBundle {
    pub action: NavalAction,
    pub fields: Map<String, Value>,
    pub sstate: Arc<SharedState>,
}

impl NavalRequestBundle {
    pub fn new(action: NavalAction, fields: Map<String, Value>, sstate: Arc<SharedState>) -> Self {
        Self {
            action,
            fields,
            sstate,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn require_str(&self, key: &'static str) -> Result<&str, NCErr> {
        match self.get_str(key).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value),
            Some(_) => Err(NCErr::InvalidField(key)),
            None => Err(NCErr::MissingField(key)),
        }
    }

    /// Integers arrive as JSON numbers or as numeric strings.
    pub fn get_i64(&self, key: &'static str) -> Result<Option<i64>, NCErr> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or(NCErr::InvalidField(key)),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| NCErr::InvalidField(key)),
            Some(_) => Err(NCErr::InvalidField(key)),
        }
    }

    pub fn get_bool(&self, key: &'static str) -> Result<Option<bool>, NCErr> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::Number(n)) => Ok(Some(n.as_i64().unwrap_or(0) != 0)),
            Some(Value::String(s)) => match s.as_str() {
                "1" | "true" => Ok(Some(true)),
                "0" | "false" => Ok(Some(false)),
                _ => Err(NCErr::InvalidField(key)),
            },
            Some(_) => Err(NCErr::InvalidField(key)),
        }
    }

    /// Session ids travel as decimal strings since they exceed the integer
    /// range of JavaScript clients; plain numbers are accepted as well.
    pub fn session_id(&self) -> Result<SessionId, NCErr> {
        match self.fields.get("sid") {
            None | Some(Value::Null) => Err(NCErr::MissingField("sid")),
            Some(Value::String(s)) => SessionId::parse(s),
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or(NCErr::InvalidSessionId)
                .and_then(|raw| SessionId::parse(&raw.to_string())),
            Some(_) => Err(NCErr::InvalidSessionId),
        }
    }

    /// Request fields minus the addressing ones, as relayed to the opponent.
    pub fn relay_body(&self) -> Map<String, Value> {
        let mut body = self.fields.clone();
        body.remove("sid");
        body.remove("type");
        body
    }
}

pub fn typed_reply(kind: &str) -> Reply {
    let mut reply = Map::new();
    reply.insert("type".to_string(), Value::from(kind));
    reply
}

pub fn reason_reply(kind: &str, reason: &str) -> Reply {
    let mut reply = typed_reply(kind);
    reply.insert("reason".to_string(), Value::from(reason));
    reply
}

pub fn error_reply(reason: &str) -> Reply {
    reason_reply("error", reason)
}

pub fn router(sstate: Arc<SharedState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/naval/:action", post(action_handler))
        .with_state(sstate)
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Every call answers 200 with a typed JSON object, errors included.
async fn action_handler(
    State(sstate): State<Arc<SharedState>>,
    Path(action): Path<String>,
    body: Bytes,
) -> Json<Reply> {
    let Ok(action) = NavalAction::from_value(&action) else {
        debug!(target: "http", "Unknown action {}", action);
        return Json(error_reply("unknown action"));
    };

    let fields = if body.is_empty() {
        Map::new()
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(fields)) => fields,
            _ => return Json(error_reply("malformed request")),
        }
    };

    Json(handle_request(NavalRequestBundle::new(action, fields, sstate)).await)
}

pub async fn handle_request(prq: NavalRequestBundle) -> Reply {
    let action = prq.action;
    let result = match action {
        NavalAction::Connect => naval::hdl_connect::handle_rq_connect(&prq).await,
        NavalAction::Reconnect => naval::hdl_reconnect::handle_rq_reconnect(&prq).await,
        NavalAction::Receive => naval::hdl_receive::handle_rq_receive(&prq).await,
        NavalAction::Send => naval::hdl_send::handle_rq_send(&prq).await,
        NavalAction::Shoot
        | NavalAction::YourTurn
        | NavalAction::Chat
        | NavalAction::Info
        | NavalAction::FldReq
        | NavalAction::FldInfo
        | NavalAction::Dutch
        | NavalAction::SMove => naval::hdl_relay::handle_rq_relay(&prq).await,
        NavalAction::Fin => naval::hdl_fin::handle_rq_fin(&prq).await,
        NavalAction::Surrender => naval::hdl_surrender::handle_rq_surrender(&prq).await,
    };

    match result {
        Ok(reply) => reply,
        Err(err) => {
            warn!(target: "http", "{} failed: {}", action.value(), err);
            error_reply(&err.client_reason())
        }
    }
}

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::handler::{reason_reply, NavalRequestBundle, Reply};
use crate::matchmaking::{self, AccessGate, ConnectOutcome, ConnectRequest};
use crate::naval_errors::NCErr;

const MAX_NAME_LEN: usize = 32;
const MAX_UUID_LEN: usize = 64;

#[derive(Serialize)]
struct ConnectedReply {
    #[serde(rename = "type")]
    kind: &'static str,
    sid: String,
    user: i64,
    player: u8,
    joined: bool,
}

/// Device ids that look like UUIDs are stored in one canonical spelling.
fn normalize_device_uuid(raw: &str) -> String {
    match uuid::Uuid::parse_str(raw) {
        Ok(parsed) => parsed.hyphenated().to_string(),
        Err(_) => raw.to_string(),
    }
}

fn connect_request(prq: &NavalRequestBundle) -> Result<ConnectRequest, NCErr> {
    let name: String = prq.require_str("name")?.chars().take(MAX_NAME_LEN).collect();
    let uuid = prq.require_str("uuid")?;
    if uuid.len() > MAX_UUID_LEN {
        return Err(NCErr::InvalidField("uuid"));
    }

    // Older clients send the version as a number
    let app_version = match prq.fields.get("ver") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "0".to_string(),
    };
    let variant = prq.get_i64("gv")?.unwrap_or(0);
    let variant = i32::try_from(variant).map_err(|_| NCErr::InvalidField("gv"))?;

    let device_info = match prq.fields.get("dev") {
        None | Some(Value::Null) => None,
        Some(dev @ Value::Object(_)) => Some(dev.clone()),
        Some(_) => return Err(NCErr::InvalidField("dev")),
    };

    Ok(ConnectRequest {
        name,
        device_uuid: normalize_device_uuid(uuid),
        app_version,
        variant,
        device_info,
        preferred_opponent: prq.get_i64("opp")?,
    })
}

pub async fn handle_rq_connect(prq: &NavalRequestBundle) -> Result<Reply, NCErr> {
    let request = connect_request(prq)?;
    let sstate = &prq.sstate;
    let db = &*sstate.database;

    let gate = AccessGate::load(&sstate.config_cache, db).await;
    let outcome = matchmaking::connect(
        db,
        &sstate.ids,
        &gate,
        sstate.settings.match_freshness,
        &request,
    )
    .await;

    match outcome {
        ConnectOutcome::Connected {
            sid,
            user_id,
            joined,
        } => {
            info!(target: "http", "User {} connected as {} (joined: {})", user_id, sid, joined);
            let reply = ConnectedReply {
                kind: "connected",
                sid: sid.to_string(),
                user: user_id,
                player: sid.player(),
                joined,
            };
            match serde_json::to_value(reply) {
                Ok(Value::Object(map)) => Ok(map),
                _ => Err(NCErr::InvalidField("reply")),
            }
        }
        ConnectOutcome::Refused { reason } => Ok(reason_reply("refused", &reason)),
        ConnectOutcome::Banned { reason } => Ok(reason_reply("banned", &reason)),
        ConnectOutcome::Maintenance { reason } => Ok(reason_reply("maintenance", &reason)),
    }
}

pub mod model;
use model::{
    config, game_session, matchmaking_lock, score, session_message, tracked_weapons, user,
    user_inventory,
};
use sea_orm::entity::prelude::*;
use sea_orm::entity::*;
use sea_orm::{ConnectOptions, Database, DbErr, Schema};
use tracing::{debug, warn};

pub const CFG_MIN_VERSION: &str = "min_version";
pub const CFG_MAINTENANCE_MODE: &str = "maintenance_mode";
pub const CFG_SCORE_MIN: &str = "score_min";
pub const CFG_SCORE_MIN_DURATION: &str = "score_min_duration_secs";

const DEFAULT_CONFIG_KEYS: [(&str, &str); 4] = [
    (CFG_MIN_VERSION, "0"),
    (CFG_MAINTENANCE_MODE, "0"),
    (CFG_SCORE_MIN, "3000"),
    (CFG_SCORE_MIN_DURATION, "30"),
];

pub fn build_database_conn_string(
    proto: &str,
    name: &str,
    user: &str,
    password: &str,
    host: &str,
    port: &str,
    params: &str,
) -> String {
    let mut conn_string = format!("{}://", proto);
    if !user.is_empty() {
        conn_string.push_str(user);
        if !password.is_empty() {
            conn_string.push(':');
            conn_string.push_str(password);
        }
        conn_string.push('@');
    }
    if !host.is_empty() {
        conn_string.push_str(host);
        if !port.is_empty() {
            conn_string.push(':');
            conn_string.push_str(port);
        }
    }
    if proto != "sqlite" {
        // Only add slash if a host is present.
        // sqlite does not connect to a host.
        conn_string.push('/');
    }
    conn_string.push_str(name);
    if !params.is_empty() {
        conn_string.push('?');
        conn_string.push_str(params);
    }
    conn_string
}

pub async fn connect_database(conn_string: &str) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(conn_string.to_owned());
    options.sqlx_logging(false);
    Database::connect(options).await
}

async fn create_table<E: EntityTrait>(db: &DbConn, schema: &Schema, entity: E) {
    let backend = db.get_database_backend();
    let table = entity.table_name().to_string();

    let mut stmt = schema.create_table_from_entity(entity);
    if let Err(err) = db.execute(backend.build(&*stmt.if_not_exists())).await {
        warn!(target: "db", "Unable to create table {}: {}", table, err);
        return;
    }
    for mut index in schema.create_index_from_entity(entity) {
        if let Err(err) = db.execute(backend.build(&*index.if_not_exists())).await {
            warn!(target: "db", "Unable to create index on {}: {}", table, err);
        }
    }
    debug!(target: "db", "Table {} ready", table);
}

pub async fn create_tables(db: &DbConn) {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, user::Entity).await;
    create_table(db, &schema, game_session::Entity).await;
    create_table(db, &schema, session_message::Entity).await;
    create_table(db, &schema, tracked_weapons::Entity).await;
    create_table(db, &schema, user_inventory::Entity).await;
    create_table(db, &schema, matchmaking_lock::Entity).await;
    create_table(db, &schema, score::Entity).await;
    create_table(db, &schema, config::Entity).await;
}

pub async fn add_default_configuration_keys(db: &DbConn) {
    for (key, value) in DEFAULT_CONFIG_KEYS {
        match config::Entity::find()
            .filter(config::Column::Key.eq(key))
            .one(db)
            .await
        {
            Ok(None) => {
                let entry = config::ActiveModel {
                    key: Set(key.to_string()),
                    value: Set(value.to_string()),
                    ..Default::default()
                };
                if let Err(err) = entry.insert(db).await {
                    warn!(target: "db", "Failed to add config key {}: {}", key, err);
                }
            }
            Ok(Some(_)) => {}
            Err(err) => warn!(target: "db", "Failed to look up config key {}: {}", key, err),
        }
    }
}

pub async fn check_config_table_exists(db: &DbConn) -> Result<bool, DbErr> {
    match config::Entity::find().one(db).await {
        Ok(_) => Ok(true),
        Err(DbErr::Exec(_)) | Err(DbErr::Query(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Fresh in-memory database with the production schema. A single pooled
/// connection keeps every handle on the same memory database.
#[cfg(test)]
pub async fn test_database() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:".to_owned());
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    create_tables(&db).await;
    add_default_configuration_keys(&db).await;
    db
}

use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{info, warn};

use crate::broker::client::BrokerClient;
use crate::broker::BrokerLink;
use crate::config::Configuration;
use crate::longpoll::PollRegistry;
use crate::naval_errors::NCErr;
use crate::orm::{
    add_default_configuration_keys, check_config_table_exists, connect_database, create_tables,
};
use crate::session_id::IdGenerator;
use crate::utils::config_values::ConfigCache;

#[derive(Clone)]
pub struct SharedState {
    pub database: Arc<DatabaseConnection>,
    pub ids: Arc<IdGenerator>,
    pub broker: Arc<dyn BrokerLink>,
    pub polls: Arc<PollRegistry>,
    pub config_cache: Arc<ConfigCache>,
    pub settings: Arc<Configuration>,
}

impl SharedState {
    /// Worker state: database, id generator and the arbiter connection.
    pub async fn new(settings: Configuration) -> Result<Self, NCErr> {
        let db = connect_database(&settings.db_conn_string).await?;

        if settings.init_schemas {
            create_tables(&db).await;
        }

        // Another process may own the schema
        loop {
            if let Ok(true) = check_config_table_exists(&db).await {
                break;
            }
            warn!(target: "db", "Waiting for config table to be created...");
            tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
        }
        add_default_configuration_keys(&db).await;

        let ids = IdGenerator::new(settings.worker_id)?;
        let polls = Arc::new(PollRegistry::new());
        let broker = BrokerClient::start(settings.arbiter_addr(), settings.worker_id, polls.clone());
        info!(target: "args", "Worker {} using arbiter {}", settings.worker_id, settings.arbiter_addr());

        Ok(Self::from_parts(db, ids, Arc::new(broker), polls, settings))
    }

    pub fn from_parts(
        database: DatabaseConnection,
        ids: IdGenerator,
        broker: Arc<dyn BrokerLink>,
        polls: Arc<PollRegistry>,
        settings: Configuration,
    ) -> Self {
        Self {
            database: Arc::new(database),
            ids: Arc::new(ids),
            broker,
            polls,
            config_cache: Arc::new(ConfigCache::new(settings.config_cache_ttl)),
            settings: Arc::new(settings),
        }
    }
}

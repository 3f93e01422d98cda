use crate::orm::model::config;
use dashmap::DashMap;
use sea_orm::entity::*;
use sea_orm::query::*;
use sea_orm::DatabaseConnection;
use std::time::{Duration, Instant};
use tracing::warn;

pub async fn get_cfg_value(key: &str, db: &DatabaseConnection) -> Option<String> {
    match config::Entity::find()
        .filter(config::Column::Key.eq(key))
        .one(db)
        .await
    {
        Ok(Some(db_cfg_entry)) => Some(db_cfg_entry.value),
        Ok(None) => None,
        Err(err) => {
            warn!(target: "config", "Failed to read config key {}: {}", key, err);
            None
        }
    }
}

/// Process-local cache in front of the `config` table. Entries live for
/// `ttl`; `invalidate` forces the next read to hit the database.
pub struct ConfigCache {
    ttl: Duration,
    entries: DashMap<String, (Instant, Option<String>)>,
}

impl ConfigCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub async fn get(&self, key: &str, db: &DatabaseConnection) -> Option<String> {
        if let Some(entry) = self.entries.get(key) {
            let (fetched_at, value) = entry.value();
            if fetched_at.elapsed() < self.ttl {
                return value.clone();
            }
        }
        let value = get_cfg_value(key, db).await;
        self.entries
            .insert(key.to_string(), (Instant::now(), value.clone()));
        value
    }

    pub async fn get_i64(&self, key: &str, db: &DatabaseConnection, default: i64) -> i64 {
        self.get(key, db)
            .await
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(default)
    }

    pub async fn get_flag(&self, key: &str, db: &DatabaseConnection) -> bool {
        matches!(
            self.get(key, db).await.as_deref().map(str::trim),
            Some("1") | Some("true")
        )
    }

    pub fn invalidate(&self, key: Option<&str>) {
        match key {
            Some(key) => {
                self.entries.remove(key);
            }
            None => self.entries.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::{test_database, CFG_MAINTENANCE_MODE, CFG_SCORE_MIN};

    async fn set_value(db: &DatabaseConnection, key: &str, value: &str) {
        let row = config::Entity::find()
            .filter(config::Column::Key.eq(key))
            .one(db)
            .await
            .unwrap()
            .unwrap();
        let mut active = row.into_active_model();
        active.value = Set(value.to_string());
        active.update(db).await.unwrap();
    }

    #[tokio::test]
    async fn cached_until_invalidated() {
        let db = test_database().await;
        let cache = ConfigCache::new(Duration::from_secs(3600));

        assert!(!cache.get_flag(CFG_MAINTENANCE_MODE, &db).await);
        set_value(&db, CFG_MAINTENANCE_MODE, "1").await;
        assert!(!cache.get_flag(CFG_MAINTENANCE_MODE, &db).await);

        cache.invalidate(Some(CFG_MAINTENANCE_MODE));
        assert!(cache.get_flag(CFG_MAINTENANCE_MODE, &db).await);
    }

    #[tokio::test]
    async fn zero_ttl_always_reloads() {
        let db = test_database().await;
        let cache = ConfigCache::new(Duration::ZERO);

        assert_eq!(cache.get_i64(CFG_SCORE_MIN, &db, 0).await, 3000);
        set_value(&db, CFG_SCORE_MIN, "2500").await;
        assert_eq!(cache.get_i64(CFG_SCORE_MIN, &db, 0).await, 2500);
        assert_eq!(cache.get_i64("missing_key", &db, 7).await, 7);
    }
}

use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::naval_errors::NCErr;
use crate::orm::build_database_conn_string;
use crate::session_id::MAX_WORKER_ID;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Worker,
    Arbiter,
}

impl Role {
    pub fn from_value(value: &str) -> Result<Self, NCErr> {
        match value.to_ascii_lowercase().as_str() {
            "worker" => Ok(Role::Worker),
            "arbiter" => Ok(Role::Arbiter),
            other => Err(NCErr::Config(format!("unknown NAVAL_ROLE `{}`", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub role: Role,
    pub db_conn_string: String,
    pub init_schemas: bool,
    pub worker_id: u16,
    pub arbiter_host: String,
    pub arbiter_port: u16,
    pub http_host: String,
    pub http_port: u16,
    pub poll_timeout: Duration,
    pub match_freshness: chrono::Duration,
    pub mailbox_sweep_interval: Duration,
    pub mailbox_max_age_hours: i64,
    pub mailbox_sweep_limit: u64,
    pub session_expiry: chrono::Duration,
    pub config_cache_ttl: Duration,
}

impl Configuration {
    /// Reads the process environment. Call after `dotenv`.
    pub fn from_env() -> Result<Self, NCErr> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, NCErr> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let db_conn_string = build_database_conn_string(
            &var("DB_PROTO", "sqlite"),
            &var("DB_NAME", "navalclash.sqlite"),
            &var("DB_USER", ""),
            &var("DB_PASSWORD", ""),
            &var("DB_HOST", ""),
            &var("DB_PORT", ""),
            &var("DB_PARAMS", ""),
        );
        debug!(target: "args", "Database connection string: {}", db_conn_string);

        let worker_id: u16 = parse_var(&lookup, "WORKER_ID", "0")?;
        if worker_id > MAX_WORKER_ID {
            return Err(NCErr::Config(format!(
                "WORKER_ID {} exceeds {}",
                worker_id, MAX_WORKER_ID
            )));
        }

        Ok(Self {
            role: Role::from_value(&var("NAVAL_ROLE", "worker"))?,
            db_conn_string,
            init_schemas: var("INIT_SCHEMAS", "1") == "1",
            worker_id,
            arbiter_host: var("ARBITER_HOST", "127.0.0.1"),
            arbiter_port: parse_var(&lookup, "ARBITER_PORT", "18900")?,
            http_host: var("HTTP_HOST", "0.0.0.0"),
            http_port: parse_var(&lookup, "HTTP_PORT", "8080")?,
            poll_timeout: Duration::from_secs(parse_var(&lookup, "POLL_TIMEOUT_SECS", "30")?),
            match_freshness: chrono::Duration::seconds(parse_var(
                &lookup,
                "MATCH_FRESHNESS_SECS",
                "120",
            )?),
            mailbox_sweep_interval: Duration::from_secs(parse_var(
                &lookup,
                "MAILBOX_SWEEP_INTERVAL_SECS",
                "600",
            )?),
            mailbox_max_age_hours: parse_var(&lookup, "MAILBOX_MAX_AGE_HOURS", "24")?,
            mailbox_sweep_limit: parse_var(&lookup, "MAILBOX_SWEEP_LIMIT", "1000")?,
            session_expiry: chrono::Duration::seconds(parse_var(
                &lookup,
                "SESSION_EXPIRY_SECS",
                "900",
            )?),
            config_cache_ttl: Duration::from_secs(parse_var(
                &lookup,
                "CONFIG_CACHE_TTL_SECS",
                "60",
            )?),
        })
    }

    pub fn arbiter_addr(&self) -> String {
        format!("{}:{}", self.arbiter_host, self.arbiter_port)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<T, NCErr> {
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|_| NCErr::Config(format!("{} is not a valid number: `{}`", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn with_vars(vars: &[(&str, &str)]) -> Result<Configuration, NCErr> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Configuration::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = with_vars(&[]).unwrap();
        assert_eq!(cfg.role, Role::Worker);
        assert_eq!(cfg.db_conn_string, "sqlite://navalclash.sqlite");
        assert_eq!(cfg.worker_id, 0);
        assert_eq!(cfg.arbiter_addr(), "127.0.0.1:18900");
        assert_eq!(cfg.poll_timeout, Duration::from_secs(30));
        assert_eq!(cfg.match_freshness, chrono::Duration::seconds(120));
        assert_eq!(cfg.mailbox_sweep_limit, 1000);
        assert!(cfg.init_schemas);
    }

    #[test]
    fn worker_id_is_bounded() {
        assert_eq!(with_vars(&[("WORKER_ID", "1023")]).unwrap().worker_id, 1023);
        assert!(with_vars(&[("WORKER_ID", "1024")]).is_err());
        assert!(with_vars(&[("WORKER_ID", "-1")]).is_err());
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(with_vars(&[("POLL_TIMEOUT_SECS", "soon")]).is_err());
        assert!(with_vars(&[("NAVAL_ROLE", "janitor")]).is_err());
        assert_eq!(
            with_vars(&[("NAVAL_ROLE", "Arbiter")]).unwrap().role,
            Role::Arbiter
        );
    }
}

//! Configuration management for the CDC consumer
//!
//! All settings come from environment variables with sensible defaults,
//! validated once at startup. The same configuration drives the streaming
//! consumer and the diagnostic subcommands.

use super::{CdcError, CdcResult};
use std::env;

/// Runtime configuration for the CDC consumer
///
/// # Environment Variables
///
/// Required:
/// - `PG_PASSWORD`: password for the replication user
///
/// Optional (with defaults):
/// - `PG_HOST` (localhost), `PG_PORT` (5433), `PG_USER` (postgres),
///   `PG_DATABASE` (cdc_demo)
/// - `PG_SLOT_NAME` (python_cdc_slot): durable server-side replay cursor
/// - `PG_PUBLICATION` (cdc_publication): table filter set published by server
/// - `WORKER_COUNT` (3): concurrent event handler tasks
/// - `QUEUE_CAPACITY` (1000): bounded dispatch queue size
/// - `HEALTH_PORT` (8080): health probe listen port
/// - `KEEPALIVE_INTERVAL_SECS` (10): max interval between feedback sends
#[derive(Debug, Clone)]
pub struct CdcConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub slot_name: String,
    pub publication_name: String,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub health_port: u16,
    pub keepalive_interval_secs: u64,
}

impl CdcConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> CdcResult<Self> {
        let host = env::var("PG_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = parse_env("PG_PORT", 5433u16)?;
        let user = env::var("PG_USER").unwrap_or_else(|_| "postgres".to_string());
        let password = env::var("PG_PASSWORD")
            .map_err(|_| CdcError::config("Missing required PG_PASSWORD environment variable"))?;
        let database = env::var("PG_DATABASE").unwrap_or_else(|_| "cdc_demo".to_string());
        let slot_name =
            env::var("PG_SLOT_NAME").unwrap_or_else(|_| "python_cdc_slot".to_string());
        let publication_name =
            env::var("PG_PUBLICATION").unwrap_or_else(|_| "cdc_publication".to_string());
        let worker_count = parse_env("WORKER_COUNT", 3usize)?;
        let queue_capacity = parse_env("QUEUE_CAPACITY", 1000usize)?;
        let health_port = parse_env("HEALTH_PORT", 8080u16)?;
        let keepalive_interval_secs = parse_env("KEEPALIVE_INTERVAL_SECS", 10u64)?;

        Self::validate_and_create(
            host,
            port,
            user,
            password,
            database,
            slot_name,
            publication_name,
            worker_count,
            queue_capacity,
            health_port,
            keepalive_interval_secs,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_and_create(
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
        slot_name: String,
        publication_name: String,
        worker_count: usize,
        queue_capacity: usize,
        health_port: u16,
        keepalive_interval_secs: u64,
    ) -> CdcResult<Self> {
        if host.trim().is_empty() {
            return Err(CdcError::config("PG_HOST cannot be empty"));
        }

        if database.trim().is_empty() {
            return Err(CdcError::config("PG_DATABASE cannot be empty"));
        }

        if publication_name.trim().is_empty() {
            return Err(CdcError::config("Publication name cannot be empty"));
        }

        // PostgreSQL identifier rules for the slot name
        if slot_name.trim().is_empty() {
            return Err(CdcError::config("Slot name cannot be empty"));
        }

        if !slot_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(CdcError::config(
                "Slot name can only contain alphanumeric characters and underscores",
            ));
        }

        if slot_name.len() > 63 {
            return Err(CdcError::config(
                "Slot name cannot be longer than 63 characters",
            ));
        }

        if worker_count == 0 {
            return Err(CdcError::config("WORKER_COUNT must be at least 1"));
        }

        if queue_capacity == 0 {
            return Err(CdcError::config("QUEUE_CAPACITY must be at least 1"));
        }

        Ok(Self {
            host,
            port,
            user,
            password,
            database,
            slot_name,
            publication_name,
            worker_count,
            queue_capacity,
            health_port,
            keepalive_interval_secs,
        })
    }

    /// Conninfo string for the streaming connection.
    ///
    /// `replication=database` puts the connection into logical replication
    /// mode against the target database, which is what allows
    /// CREATE_REPLICATION_SLOT and START_REPLICATION to be issued on it.
    pub fn replication_conninfo(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} replication=database",
            self.host, self.port, self.user, self.password, self.database
        )
    }

    /// Conninfo string for a regular SQL connection (diagnostics).
    pub fn sql_conninfo(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.host, self.port, self.user, self.password, self.database
        )
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> CdcResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| CdcError::config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(slot_name: &str, workers: usize, capacity: usize) -> CdcResult<CdcConfig> {
        CdcConfig::validate_and_create(
            "localhost".to_string(),
            5433,
            "postgres".to_string(),
            "secret".to_string(),
            "cdc_demo".to_string(),
            slot_name.to_string(),
            "cdc_publication".to_string(),
            workers,
            capacity,
            8080,
            10,
        )
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = make_config("python_cdc_slot", 3, 1000).unwrap();
        assert_eq!(config.slot_name, "python_cdc_slot");
        assert_eq!(config.publication_name, "cdc_publication");
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.queue_capacity, 1000);
    }

    #[test]
    fn test_replication_conninfo_enables_replication_mode() {
        let config = make_config("python_cdc_slot", 3, 1000).unwrap();
        let conninfo = config.replication_conninfo();
        assert!(conninfo.contains("replication=database"));
        assert!(conninfo.contains("port=5433"));
        assert!(conninfo.contains("dbname=cdc_demo"));
        assert!(!config.sql_conninfo().contains("replication"));
    }

    #[test]
    fn test_slot_name_charset_rejected() {
        let result = make_config("bad-slot-name!", 3, 1000);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Slot name"));
    }

    #[test]
    fn test_slot_name_length_limit() {
        assert!(make_config(&"s".repeat(64), 3, 1000).is_err());
        assert!(make_config(&"s".repeat(63), 3, 1000).is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = make_config("slot", 0, 1000);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("WORKER_COUNT"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(make_config("slot", 3, 0).is_err());
    }
}

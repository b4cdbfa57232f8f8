//! Three-tier configuration loading (spec.md §6.1 supplement, SPEC_FULL
//! §2.3): admin override beats an environment variable, which beats the
//! built-in default. Every field is resolved independently, so an admin
//! can override just `max_wal_size` without having to restate the rest.

use std::env;

use entitydb_core::Limits;
use serde::{Deserialize, Serialize};

/// How the writer should fsync a WAL append (§4.2, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalSyncPolicy {
    Always,
    Interval,
    Never,
}

/// Every tunable the engine and the boundary layer read at startup.
///
/// `token_secret`/`session_ttl_hours`/`port`/`ssl_cert_path`/`ssl_key_path`
/// are accepted and carried through for a boundary HTTP layer's benefit;
/// nothing in this workspace reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub data_path: String,
    pub database_filename: String,
    pub reader_pool_size: usize,
    pub auto_chunk_threshold: u64,
    pub chunk_size: u64,
    pub max_entity_size: u64,
    pub max_entry_length: u64,
    pub astronomical_threshold: u64,
    pub max_wal_size: u64,
    pub checkpoint_ops: u64,
    pub checkpoint_interval_secs: u64,
    pub backup_interval_secs: u64,
    pub backup_retention_hours: u32,
    pub backup_retention_days: u32,
    pub backup_retention_weeks: u32,
    pub backup_max_size_mb: u64,
    pub wal_sync: WalSyncPolicy,
    pub metrics_enabled: bool,

    pub token_secret: Option<String>,
    pub session_ttl_hours: Option<u64>,
    pub port: Option<u16>,
    pub ssl_cert_path: Option<String>,
    pub ssl_key_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = Limits::default();
        EngineConfig {
            data_path: ".".into(),
            database_filename: "entitydb.euff".into(),
            reader_pool_size: 8,
            auto_chunk_threshold: limits.auto_chunk_threshold,
            chunk_size: limits.chunk_size,
            max_entity_size: limits.max_entity_size,
            max_entry_length: limits.max_entry_length,
            astronomical_threshold: limits.astronomical_threshold,
            max_wal_size: limits.max_wal_size,
            checkpoint_ops: 1000,
            checkpoint_interval_secs: 300,
            backup_interval_secs: 3600,
            backup_retention_hours: 24,
            backup_retention_days: 7,
            backup_retention_weeks: 4,
            backup_max_size_mb: 10 * 1024,
            wal_sync: WalSyncPolicy::Interval,
            metrics_enabled: false,
            token_secret: None,
            session_ttl_hours: None,
            port: None,
            ssl_cert_path: None,
            ssl_key_path: None,
        }
    }
}

impl EngineConfig {
    /// Resolve configuration with the documented precedence: `admin_override`
    /// (a partially- or fully-populated config an embedder passes directly)
    /// wins over `ENTITYDB_*` environment variables, which win over
    /// [`EngineConfig::default`].
    pub fn resolve(admin_override: Option<EngineConfig>) -> Self {
        let mut config = Self::default();
        config.apply_env();
        if let Some(admin) = admin_override {
            config = admin;
        }
        config
    }

    /// Overlay `ENTITYDB_*` environment variables onto `self`, leaving any
    /// field unset or unparsable untouched.
    fn apply_env(&mut self) {
        if let Some(v) = env_string("ENTITYDB_DATA_PATH") {
            self.data_path = v;
        }
        if let Some(v) = env_string("ENTITYDB_DATABASE_FILENAME") {
            self.database_filename = v;
        }
        if let Some(v) = env_parsed("ENTITYDB_READER_POOL_SIZE") {
            self.reader_pool_size = v;
        }
        if let Some(v) = env_parsed("ENTITYDB_AUTO_CHUNK_THRESHOLD") {
            self.auto_chunk_threshold = v;
        }
        if let Some(v) = env_parsed("ENTITYDB_CHUNK_SIZE") {
            self.chunk_size = v;
        }
        if let Some(v) = env_parsed("ENTITYDB_MAX_ENTITY_SIZE") {
            self.max_entity_size = v;
        }
        if let Some(v) = env_parsed("ENTITYDB_MAX_ENTRY_LENGTH") {
            self.max_entry_length = v;
        }
        if let Some(v) = env_parsed("ENTITYDB_ASTRONOMICAL_THRESHOLD") {
            self.astronomical_threshold = v;
        }
        if let Some(v) = env_parsed("ENTITYDB_MAX_WAL_SIZE") {
            self.max_wal_size = v;
        }
        if let Some(v) = env_parsed("ENTITYDB_CHECKPOINT_OPS") {
            self.checkpoint_ops = v;
        }
        if let Some(v) = env_parsed("ENTITYDB_CHECKPOINT_INTERVAL_SECS") {
            self.checkpoint_interval_secs = v;
        }
        if let Some(v) = env_parsed("ENTITYDB_BACKUP_INTERVAL_SECS") {
            self.backup_interval_secs = v;
        }
        if let Some(v) = env_parsed("ENTITYDB_BACKUP_RETENTION_HOURS") {
            self.backup_retention_hours = v;
        }
        if let Some(v) = env_parsed("ENTITYDB_BACKUP_RETENTION_DAYS") {
            self.backup_retention_days = v;
        }
        if let Some(v) = env_parsed("ENTITYDB_BACKUP_RETENTION_WEEKS") {
            self.backup_retention_weeks = v;
        }
        if let Some(v) = env_parsed("ENTITYDB_BACKUP_MAX_SIZE_MB") {
            self.backup_max_size_mb = v;
        }
        if let Some(v) = env_string("ENTITYDB_WAL_SYNC") {
            self.wal_sync = match v.to_ascii_lowercase().as_str() {
                "always" => WalSyncPolicy::Always,
                "never" => WalSyncPolicy::Never,
                _ => WalSyncPolicy::Interval,
            };
        }
        if let Some(v) = env_parsed("ENTITYDB_METRICS_ENABLED") {
            self.metrics_enabled = v;
        }
        if let Some(v) = env_string("ENTITYDB_TOKEN_SECRET") {
            self.token_secret = Some(v);
        }
        if let Some(v) = env_parsed("ENTITYDB_SESSION_TTL_HOURS") {
            self.session_ttl_hours = Some(v);
        }
        if let Some(v) = env_parsed("ENTITYDB_PORT") {
            self.port = Some(v);
        }
        if let Some(v) = env_string("ENTITYDB_SSL_CERT_PATH") {
            self.ssl_cert_path = Some(v);
        }
        if let Some(v) = env_string("ENTITYDB_SSL_KEY_PATH") {
            self.ssl_key_path = Some(v);
        }
    }

    /// The `entitydb-core::Limits` this config implies, for handing to
    /// `EntityRepository::open`.
    pub fn limits(&self) -> Limits {
        Limits {
            max_entity_size: self.max_entity_size,
            max_entry_length: self.max_entry_length,
            astronomical_threshold: self.astronomical_threshold,
            max_wal_size: self.max_wal_size,
            auto_chunk_threshold: self.auto_chunk_threshold,
            chunk_size: self.chunk_size,
        }
    }

    /// The full path to the EUFF file this config points at.
    pub fn database_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_path).join(&self.database_filename)
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_core_limits() {
        let config = EngineConfig::default();
        let limits = Limits::default();
        assert_eq!(config.max_entity_size, limits.max_entity_size);
        assert_eq!(config.max_wal_size, limits.max_wal_size);
    }

    #[test]
    fn admin_override_wins_outright() {
        let mut admin = EngineConfig::default();
        admin.reader_pool_size = 42;
        let resolved = EngineConfig::resolve(Some(admin));
        assert_eq!(resolved.reader_pool_size, 42);
    }

    #[test]
    fn resolve_without_override_falls_back_to_default_plus_env() {
        let resolved = EngineConfig::resolve(None);
        assert_eq!(resolved.database_filename, "entitydb.euff");
    }
}

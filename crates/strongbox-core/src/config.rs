//! # Configuration
//!
//! Strongbox is configured from environment variables, optionally layered
//! over a TOML file (environment wins). The result is an immutable
//! [`StrongboxConfig`] built once at boot and shared behind an `Arc`.
//!
//! ## Environment Variables
//!
//! ### Datastore
//! - `STRONGBOX_DATABASE_URL` - Connection string (required)
//! - `STRONGBOX_DATABASE_USERNAME` - Overrides the username in the URL
//! - `STRONGBOX_DATABASE_PASSWORD` - Overrides the password in the URL
//!
//! ### Artifacts and retention
//! - `STRONGBOX_BACKUP_LOCAL_DIR` - Local artifact directory (required)
//! - `STRONGBOX_BACKUP_REMOTE_NAME` - Sync-tool remote name (required)
//! - `STRONGBOX_BACKUP_REMOTE_FOLDER` - Folder on the remote (required)
//! - `STRONGBOX_BACKUP_RETENTION_DAYS` - Retention window in days, at least 1 (required)
//! - `STRONGBOX_BACKUP_SCHEDULE` - Cron or `@every` expression (required)
//! - `STRONGBOX_SYNC_CONFIG_PATH` - Sync-tool configuration file
//! - `STRONGBOX_SYNC_BINARY` - Sync-tool binary (default: `rclone`)
//!
//! ### Behaviour
//! - `STRONGBOX_DUMP_MODE` - `driver` or `native` (default: per engine)
//! - `STRONGBOX_DUMP_TIMEOUT_SECS` - Dump deadline (default: 3600)
//! - `STRONGBOX_SYNC_TIMEOUT_SECS` - Per sync call deadline (default: 900)
//! - `STRONGBOX_RESTORE_TIMEOUT_SECS` - Replay deadline (default: 3600)
//! - `STRONGBOX_RESTORE_ON_STARTUP` - Run the startup restore hook (default: true)

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fs};
use std::time::Duration;

use serde::Deserialize;

use crate::connection::{DatastoreConnectionInfo, Engine};
use crate::error::ConfigError;
use crate::retention::RetentionPolicy;
use crate::schedule::Schedule;
use crate::secret::SecretString;

pub const ENV_DATABASE_URL: &str = "STRONGBOX_DATABASE_URL";
pub const ENV_DATABASE_USERNAME: &str = "STRONGBOX_DATABASE_USERNAME";
pub const ENV_DATABASE_PASSWORD: &str = "STRONGBOX_DATABASE_PASSWORD";
pub const ENV_LOCAL_DIR: &str = "STRONGBOX_BACKUP_LOCAL_DIR";
pub const ENV_REMOTE_NAME: &str = "STRONGBOX_BACKUP_REMOTE_NAME";
pub const ENV_REMOTE_FOLDER: &str = "STRONGBOX_BACKUP_REMOTE_FOLDER";
pub const ENV_RETENTION_DAYS: &str = "STRONGBOX_BACKUP_RETENTION_DAYS";
pub const ENV_SCHEDULE: &str = "STRONGBOX_BACKUP_SCHEDULE";
pub const ENV_SYNC_CONFIG_PATH: &str = "STRONGBOX_SYNC_CONFIG_PATH";
pub const ENV_SYNC_BINARY: &str = "STRONGBOX_SYNC_BINARY";
pub const ENV_DUMP_MODE: &str = "STRONGBOX_DUMP_MODE";
pub const ENV_DUMP_TIMEOUT_SECS: &str = "STRONGBOX_DUMP_TIMEOUT_SECS";
pub const ENV_SYNC_TIMEOUT_SECS: &str = "STRONGBOX_SYNC_TIMEOUT_SECS";
pub const ENV_RESTORE_TIMEOUT_SECS: &str = "STRONGBOX_RESTORE_TIMEOUT_SECS";
pub const ENV_RESTORE_ON_STARTUP: &str = "STRONGBOX_RESTORE_ON_STARTUP";

/// Every variable read by [`StrongboxConfigBuilder::with_env`]
pub const ALL_ENV_VARS: [&str; 15] = [
    ENV_DATABASE_URL,
    ENV_DATABASE_USERNAME,
    ENV_DATABASE_PASSWORD,
    ENV_LOCAL_DIR,
    ENV_REMOTE_NAME,
    ENV_REMOTE_FOLDER,
    ENV_RETENTION_DAYS,
    ENV_SCHEDULE,
    ENV_SYNC_CONFIG_PATH,
    ENV_SYNC_BINARY,
    ENV_DUMP_MODE,
    ENV_DUMP_TIMEOUT_SECS,
    ENV_SYNC_TIMEOUT_SECS,
    ENV_RESTORE_TIMEOUT_SECS,
    ENV_RESTORE_ON_STARTUP,
];

pub const DEFAULT_SYNC_BINARY: &str = "rclone";

/// Which dump implementation to use for the configured engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpMode {
    /// Introspect through the database driver and write SQL directly
    Driver,
    /// Run the engine's export tool (`pg_dump`, `mysqldump`)
    Native,
}

impl DumpMode {
    /// Default per engine: MySQL goes through `mysqldump`, the rest
    /// through the driver
    pub fn default_for(engine: Engine) -> Self {
        match engine {
            Engine::Mysql => DumpMode::Native,
            Engine::Postgresql | Engine::Sqlite => DumpMode::Driver,
        }
    }
}

impl FromStr for DumpMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "driver" => Ok(DumpMode::Driver),
            "native" => Ok(DumpMode::Native),
            other => Err(format!("invalid dump mode '{other}', expected driver/native")),
        }
    }
}

impl fmt::Display for DumpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpMode::Driver => f.write_str("driver"),
            DumpMode::Native => f.write_str("native"),
        }
    }
}

/// Where artifacts go and how long they are kept
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub local_dir: PathBuf,
    pub remote_name: String,
    pub remote_folder: String,
    pub retention: RetentionPolicy,
    pub schedule: Schedule,
    pub sync_tool_config_path: Option<PathBuf>,
}

impl RetentionConfig {
    pub fn retention_days(&self) -> u32 {
        self.retention.days()
    }

    /// `remote_name:remote_folder`, as sync tools address it
    pub fn remote_target(&self) -> String {
        format!("{}:{}", self.remote_name, self.remote_folder)
    }
}

/// Bounds on every long-running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    pub dump: Duration,
    pub sync: Duration,
    pub restore: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            dump: Duration::from_secs(3600),
            sync: Duration::from_secs(900),
            restore: Duration::from_secs(3600),
        }
    }
}

/// Process-wide configuration, immutable after boot
#[derive(Debug, Clone)]
pub struct StrongboxConfig {
    pub datastore: DatastoreConnectionInfo,
    pub retention: RetentionConfig,
    pub deadlines: Deadlines,
    pub dump_mode: DumpMode,
    pub restore_on_startup: bool,
    pub sync_binary: String,
}

/// On-disk layout of the optional TOML configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    datastore: FileDatastore,
    #[serde(default)]
    backup: FileBackup,
    #[serde(default)]
    sync: FileSync,
    #[serde(default)]
    timeouts: FileTimeouts,
    restore_on_startup: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileDatastore {
    url: Option<String>,
    username: Option<String>,
    password: Option<SecretString>,
    dump_mode: Option<DumpMode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileBackup {
    local_dir: Option<PathBuf>,
    remote_name: Option<String>,
    remote_folder: Option<String>,
    retention_days: Option<u32>,
    schedule: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSync {
    binary: Option<String>,
    config_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileTimeouts {
    dump_secs: Option<u64>,
    sync_secs: Option<u64>,
    restore_secs: Option<u64>,
}

/// Builder for [`StrongboxConfig`]
#[derive(Debug, Clone, Default)]
pub struct StrongboxConfigBuilder {
    database_url: Option<String>,
    username: Option<String>,
    password: Option<SecretString>,
    local_dir: Option<PathBuf>,
    remote_name: Option<String>,
    remote_folder: Option<String>,
    retention_days: Option<u32>,
    schedule: Option<String>,
    sync_config_path: Option<PathBuf>,
    sync_binary: Option<String>,
    dump_mode: Option<DumpMode>,
    deadlines: Deadlines,
    restore_on_startup: Option<bool>,
}

impl StrongboxConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables only
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if a variable has the wrong shape.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new().with_env()
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::File` if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |message: String| ConfigError::File {
            path: path.to_path_buf(),
            message,
        };
        let raw = fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        let file: FileConfig = toml::from_str(&raw).map_err(|e| file_error(e.to_string()))?;

        let mut builder = Self::new();
        builder.database_url = file.datastore.url;
        builder.username = file.datastore.username;
        builder.password = file.datastore.password;
        builder.dump_mode = file.datastore.dump_mode;
        builder.local_dir = file.backup.local_dir;
        builder.remote_name = file.backup.remote_name;
        builder.remote_folder = file.backup.remote_folder;
        builder.retention_days = file.backup.retention_days;
        builder.schedule = file.backup.schedule;
        builder.sync_binary = file.sync.binary;
        builder.sync_config_path = file.sync.config_path;
        if let Some(secs) = file.timeouts.dump_secs {
            builder.deadlines.dump = Duration::from_secs(secs);
        }
        if let Some(secs) = file.timeouts.sync_secs {
            builder.deadlines.sync = Duration::from_secs(secs);
        }
        if let Some(secs) = file.timeouts.restore_secs {
            builder.deadlines.restore = Duration::from_secs(secs);
        }
        builder.restore_on_startup = file.restore_on_startup;
        Ok(builder)
    }

    /// Apply environment variables on top of the current values
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if a variable has the wrong shape.
    pub fn with_env(mut self) -> Result<Self, ConfigError> {
        if let Some(url) = get_env_string(ENV_DATABASE_URL) {
            self.database_url = Some(url);
        }
        if let Some(username) = get_env_string(ENV_DATABASE_USERNAME) {
            self.username = Some(username);
        }
        if let Some(password) = get_env_string(ENV_DATABASE_PASSWORD) {
            self.password = Some(SecretString::from_string(password));
        }
        if let Some(dir) = get_env_string(ENV_LOCAL_DIR) {
            self.local_dir = Some(PathBuf::from(dir));
        }
        if let Some(name) = get_env_string(ENV_REMOTE_NAME) {
            self.remote_name = Some(name);
        }
        if let Some(folder) = get_env_string(ENV_REMOTE_FOLDER) {
            self.remote_folder = Some(folder);
        }
        if let Some(days) = get_env_u32(ENV_RETENTION_DAYS)? {
            self.retention_days = Some(days);
        }
        if let Some(schedule) = get_env_string(ENV_SCHEDULE) {
            self.schedule = Some(schedule);
        }
        if let Some(path) = get_env_string(ENV_SYNC_CONFIG_PATH) {
            self.sync_config_path = Some(PathBuf::from(path));
        }
        if let Some(binary) = get_env_string(ENV_SYNC_BINARY) {
            self.sync_binary = Some(binary);
        }
        if let Some(mode) = get_env_string(ENV_DUMP_MODE) {
            let mode = mode.parse().map_err(|message| ConfigError::InvalidEnvVar {
                key: ENV_DUMP_MODE.to_string(),
                message,
            })?;
            self.dump_mode = Some(mode);
        }
        if let Some(secs) = get_env_u64(ENV_DUMP_TIMEOUT_SECS)? {
            self.deadlines.dump = Duration::from_secs(secs);
        }
        if let Some(secs) = get_env_u64(ENV_SYNC_TIMEOUT_SECS)? {
            self.deadlines.sync = Duration::from_secs(secs);
        }
        if let Some(secs) = get_env_u64(ENV_RESTORE_TIMEOUT_SECS)? {
            self.deadlines.restore = Duration::from_secs(secs);
        }
        if let Some(enabled) = get_env_bool(ENV_RESTORE_ON_STARTUP)? {
            self.restore_on_startup = Some(enabled);
        }
        Ok(self)
    }

    #[must_use]
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.username = Some(username.into());
        self.password = Some(password);
        self
    }

    #[must_use]
    pub fn local_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn remote(mut self, name: impl Into<String>, folder: impl Into<String>) -> Self {
        self.remote_name = Some(name.into());
        self.remote_folder = Some(folder.into());
        self
    }

    #[must_use]
    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    #[must_use]
    pub fn schedule(mut self, expression: impl Into<String>) -> Self {
        self.schedule = Some(expression.into());
        self
    }

    #[must_use]
    pub fn sync_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sync_config_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn sync_binary(mut self, binary: impl Into<String>) -> Self {
        self.sync_binary = Some(binary.into());
        self
    }

    #[must_use]
    pub fn dump_mode(mut self, mode: DumpMode) -> Self {
        self.dump_mode = Some(mode);
        self
    }

    #[must_use]
    pub fn deadlines(mut self, deadlines: Deadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    #[must_use]
    pub fn restore_on_startup(mut self, enabled: bool) -> Self {
        self.restore_on_startup = Some(enabled);
        self
    }

    /// Validate and build the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required value is missing, the connection
    /// string or schedule cannot be parsed, or a value is out of range.
    pub fn build(self) -> Result<StrongboxConfig, ConfigError> {
        self.validate()?;

        let url = require(self.database_url, ENV_DATABASE_URL)?;
        let datastore =
            DatastoreConnectionInfo::parse(&url)?.with_credentials(self.username, self.password);
        let retention_days = require(self.retention_days, ENV_RETENTION_DAYS)?;
        let schedule: Schedule = require(self.schedule, ENV_SCHEDULE)?.parse()?;

        let retention = RetentionConfig {
            local_dir: require(self.local_dir, ENV_LOCAL_DIR)?,
            remote_name: require(self.remote_name, ENV_REMOTE_NAME)?,
            remote_folder: require(self.remote_folder, ENV_REMOTE_FOLDER)?,
            retention: RetentionPolicy::from_days(retention_days)?,
            schedule,
            sync_tool_config_path: self.sync_config_path,
        };

        Ok(StrongboxConfig {
            dump_mode: self
                .dump_mode
                .unwrap_or_else(|| DumpMode::default_for(datastore.engine)),
            datastore,
            retention,
            deadlines: self.deadlines,
            restore_on_startup: self.restore_on_startup.unwrap_or(true),
            sync_binary: self
                .sync_binary
                .unwrap_or_else(|| DEFAULT_SYNC_BINARY.to_string()),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.deadlines.dump.is_zero() {
            return Err(ConfigError::ValidationError(
                "dump timeout must be greater than 0".to_string(),
            ));
        }
        if self.deadlines.sync.is_zero() {
            return Err(ConfigError::ValidationError(
                "sync timeout must be greater than 0".to_string(),
            ));
        }
        if self.deadlines.restore.is_zero() {
            return Err(ConfigError::ValidationError(
                "restore timeout must be greater than 0".to_string(),
            ));
        }
        if let Some(name) = &self.remote_name
            && (name.is_empty() || name.contains(':'))
        {
            return Err(ConfigError::ValidationError(
                "remote_name must be non-empty and must not contain ':'".to_string(),
            ));
        }
        if self.sync_binary.as_deref() == Some("") {
            return Err(ConfigError::ValidationError(
                "sync binary cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn require<T>(value: Option<T>, key: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::Missing {
        key: key.to_string(),
    })
}

// Environment variable helper functions

fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn get_env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match get_env_string(key) {
        Some(val) => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!(
                    "invalid boolean value '{val}', expected true/false/1/0/yes/no/on/off"
                ),
            }),
        },
        None => Ok(None),
    }
}

fn get_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match get_env_string(key) {
        Some(val) => val
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid u64 value '{val}': {e}"),
            }),
        None => Ok(None),
    }
}

fn get_env_u32(key: &str) -> Result<Option<u32>, ConfigError> {
    match get_env_string(key) {
        Some(val) => val
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid u32 value '{val}': {e}"),
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> StrongboxConfigBuilder {
        StrongboxConfigBuilder::new()
            .database_url("postgres://app:pw@localhost/community")
            .local_dir("/var/backups/strongbox")
            .remote("gdrive", "backups/community")
            .retention_days(30)
            .schedule("0 0 3 * * *")
    }

    #[test]
    fn test_defaults() {
        let config = complete().build().unwrap();
        assert_eq!(config.datastore.engine, Engine::Postgresql);
        assert_eq!(config.retention.retention_days(), 30);
        assert_eq!(config.retention.remote_target(), "gdrive:backups/community");
        assert_eq!(config.deadlines, Deadlines::default());
        assert_eq!(config.dump_mode, DumpMode::Driver);
        assert!(config.restore_on_startup);
        assert_eq!(config.sync_binary, "rclone");
    }

    #[test]
    fn test_mysql_defaults_to_native_dump() {
        let config = complete()
            .database_url("jdbc:mysql://localhost:3306/community")
            .build()
            .unwrap();
        assert_eq!(config.dump_mode, DumpMode::Native);
    }

    #[test]
    fn test_missing_required_value() {
        let result = StrongboxConfigBuilder::new()
            .database_url("postgres://localhost/app")
            .build();
        assert!(matches!(result, Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_zero_retention_rejected() {
        let result = complete().retention_days(0).build();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("retention_days must be at least 1")
        );
    }

    #[test]
    fn test_invalid_schedule_rejected() {
        let result = complete().schedule("whenever").build();
        assert!(matches!(result, Err(ConfigError::InvalidSchedule { .. })));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = complete()
            .deadlines(Deadlines {
                sync: Duration::ZERO,
                ..Deadlines::default()
            })
            .build();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("sync timeout must be greater than 0")
        );
    }

    #[test]
    fn test_remote_name_with_colon_rejected() {
        let result = complete().remote("gdrive:", "x").build();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_dump_mode_parsing() {
        assert_eq!("NATIVE".parse::<DumpMode>(), Ok(DumpMode::Native));
        assert!("pg_dump".parse::<DumpMode>().is_err());
    }

    #[test]
    fn test_env_bool_parsing() {
        assert_eq!(get_env_bool("STRONGBOX_NONEXISTENT_FLAG").unwrap(), None);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strongbox.toml");
        fs::write(
            &path,
            r#"
restore_on_startup = false

[datastore]
url = "sqlite:/data/app.db"

[backup]
local_dir = "/backups"
remote_name = "s3"
remote_folder = "nightly"
retention_days = 7
schedule = "@every 12h"

[sync]
config_path = "/etc/rclone.conf"

[timeouts]
dump_secs = 120
"#,
        )
        .unwrap();

        let config = StrongboxConfigBuilder::from_file(&path)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.datastore.engine, Engine::Sqlite);
        assert_eq!(config.retention.retention_days(), 7);
        assert_eq!(
            config.retention.sync_tool_config_path.as_deref(),
            Some(Path::new("/etc/rclone.conf"))
        );
        assert_eq!(config.deadlines.dump, Duration::from_secs(120));
        assert_eq!(config.deadlines.sync, Duration::from_secs(900));
        assert!(!config.restore_on_startup);
    }

    #[test]
    fn test_from_file_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strongbox.toml");
        fs::write(&path, "[backup]\nretention = 3\n").unwrap();
        let err = StrongboxConfigBuilder::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::File { .. }));
    }
}

//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub freeswitch: FreeSwitchConfig,
    #[serde(default)]
    pub metering: MeteringConfig,
    #[serde(default)]
    pub entitlements: EntitlementConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Apply embedded migrations at startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

/// FreeSWITCH ESL configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FreeSwitchConfig {
    /// List of FreeSWITCH servers
    #[serde(default)]
    pub servers: Vec<FreeSwitchServer>,

    /// Reconnection delay in seconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Dialplan context admitted calls are transferred into
    #[serde(default = "default_transfer_context")]
    pub transfer_context: String,

    /// Dialplan type used for transfers
    #[serde(default = "default_transfer_dialplan")]
    pub transfer_dialplan: String,

    /// API command driving the voice changer module
    #[serde(default = "default_voice_changer_command")]
    pub voice_changer_command: String,
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_transfer_context() -> String {
    "default".to_string()
}

fn default_transfer_dialplan() -> String {
    "XML".to_string()
}

fn default_voice_changer_command() -> String {
    "voice_changer".to_string()
}

impl Default for FreeSwitchConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            reconnect_delay_secs: default_reconnect_delay(),
            transfer_context: default_transfer_context(),
            transfer_dialplan: default_transfer_dialplan(),
            voice_changer_command: default_voice_changer_command(),
        }
    }
}

/// Individual FreeSWITCH server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FreeSwitchServer {
    /// Server hostname or IP
    pub host: String,

    /// ESL port
    #[serde(default = "default_fs_port")]
    pub port: u16,

    /// ESL password
    pub password: String,

    /// Server identifier
    pub id: Option<String>,
}

fn default_fs_port() -> u16 {
    8021
}

impl FreeSwitchServer {
    /// Identifier used in logs: the configured id or `host:port`
    pub fn label(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }
}

/// Call metering configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MeteringConfig {
    /// Seconds to wait for a hangup after the watchdog fired before evicting the session
    #[serde(default = "default_eviction_grace")]
    pub eviction_grace_secs: u64,

    /// Hangup cause recorded when the switch does not report one
    #[serde(default = "default_hangup_cause")]
    pub default_hangup_cause: String,
}

fn default_eviction_grace() -> u64 {
    60
}

fn default_hangup_cause() -> String {
    "NORMAL_CLEARING".to_string()
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            eviction_grace_secs: default_eviction_grace(),
            default_hangup_cause: default_hangup_cause(),
        }
    }
}

/// Entitlement cache and sweep scheduling
#[derive(Debug, Deserialize, Clone)]
pub struct EntitlementConfig {
    /// Six-field cron expression (UTC) for the expiry sweep
    #[serde(default = "default_sweep_cron")]
    pub sweep_cron: String,

    /// Six-field cron expression (UTC) for the periodic resolver cache clear
    #[serde(default = "default_cache_refresh_cron")]
    pub cache_refresh_cron: String,

    /// Run one sweep before accepting signaling events
    #[serde(default = "default_true")]
    pub sweep_on_startup: bool,

    /// Window used by cleanup statistics for "recently expired"
    #[serde(default = "default_recent_window")]
    pub recent_window_days: i64,
}

fn default_sweep_cron() -> String {
    "0 0 0 * * *".to_string()
}

fn default_cache_refresh_cron() -> String {
    "0 0 * * * *".to_string()
}

fn default_recent_window() -> i64 {
    7
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self {
            sweep_cron: default_sweep_cron(),
            cache_refresh_cron: default_cache_refresh_cron(),
            sweep_on_startup: true,
            recent_window_days: default_recent_window(),
        }
    }
}

/// Grants applied to newly registered users
#[derive(Debug, Deserialize, Clone)]
pub struct RegistrationConfig {
    /// Welcome talk time in seconds
    #[serde(default = "default_welcome_seconds")]
    pub welcome_seconds: i64,

    /// Effect code granted on trial
    #[serde(default = "default_trial_effect")]
    pub trial_effect_code: String,

    /// Trial length in days
    #[serde(default = "default_trial_days")]
    pub trial_days: i64,

    /// Effect code granted permanently
    #[serde(default = "default_permanent_effect")]
    pub permanent_effect_code: String,
}

fn default_welcome_seconds() -> i64 {
    30
}

fn default_trial_effect() -> String {
    "903".to_string()
}

fn default_trial_days() -> i64 {
    3
}

fn default_permanent_effect() -> String {
    "904".to_string()
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            welcome_seconds: default_welcome_seconds(),
            trial_effect_code: default_trial_effect(),
            trial_days: default_trial_days(),
            permanent_effect_code: default_permanent_effect(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("database.max_connections", 10)?
            .set_default("database.run_migrations", true)?
            .set_default("freeswitch.reconnect_delay_secs", 5)?
            .set_default("metering.eviction_grace_secs", 60)?
            .set_default("entitlements.sweep_cron", "0 0 0 * * *")?
            .set_default("entitlements.cache_refresh_cron", "0 0 * * * *")?
            .set_default("registration.welcome_seconds", 30)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with TALKTIME_ prefix
            .add_source(
                Environment::with_prefix("TALKTIME")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("TALKTIME").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

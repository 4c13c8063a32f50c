// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model for the Kiln pool manager.
//!
//! Every section uses `#[serde(deny_unknown_fields)]` so a typo in
//! `kiln.toml` fails at startup with a diagnostic instead of silently
//! falling back to a default.

use serde::{Deserialize, Serialize};

/// Top-level Kiln configuration.
///
/// Loaded from TOML files in the XDG hierarchy with `KILN_*` environment
/// overrides. Every section is optional and defaults to values that run a
/// local single-node instance.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KilnConfig {
    /// Process-wide identity and logging.
    #[serde(default)]
    pub service: ServiceConfig,

    /// SQLite storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Allocation and rotation follow-up tuning.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Scheduled maintenance job settings.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// Process-wide identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Instance name, included in logs.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "kiln".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// SQLite storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("kiln").join("kiln.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("kiln.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Address to bind the server to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port for the HTTP listener.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token required on every `/v1` route. `None` leaves the
    /// authenticated surface closed: requests are rejected until a token
    /// is configured.
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            auth_token: None,
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8088
}

/// Allocation and rotation follow-up tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// How many ranked candidates one allocation call will race for
    /// before reporting the pool exhausted.
    #[serde(default = "default_allocation_attempts")]
    pub allocation_attempts: usize,

    /// Delivery attempts granted to each rotation follow-up before it
    /// parks as failed.
    #[serde(default = "default_followup_max_attempts")]
    pub followup_max_attempts: i64,

    /// Seconds a dequeued follow-up stays locked before a crashed worker's
    /// claim expires.
    #[serde(default = "default_followup_lock_secs")]
    pub followup_lock_secs: i64,

    /// Days completed and failed follow-ups are kept before pruning.
    #[serde(default = "default_followup_retention_days")]
    pub followup_retention_days: i64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            allocation_attempts: default_allocation_attempts(),
            followup_max_attempts: default_followup_max_attempts(),
            followup_lock_secs: default_followup_lock_secs(),
            followup_retention_days: default_followup_retention_days(),
        }
    }
}

fn default_allocation_attempts() -> usize {
    5
}

fn default_followup_max_attempts() -> i64 {
    5
}

fn default_followup_lock_secs() -> i64 {
    300
}

fn default_followup_retention_days() -> i64 {
    30
}

/// Scheduled maintenance job configuration.
///
/// Schedules are six-field cron expressions (seconds first) evaluated in
/// UTC. Each job also persists its last run, so a restart never repeats a
/// daily job that already ran today.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MaintenanceConfig {
    /// Seconds between scheduler wakeups.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Health re-evaluation of warm and warming identities. Hourly.
    #[serde(default = "default_health_sweep_cron")]
    pub health_sweep_cron: String,

    /// Zero `sent_today` across the pool. Midnight UTC.
    #[serde(default = "default_daily_reset_cron")]
    pub daily_reset_cron: String,

    /// Advance every due warmup ramp. Shortly after the daily reset.
    #[serde(default = "default_warmup_cron")]
    pub warmup_cron: String,

    /// Downgrade lapsed paid tiers. Daily.
    #[serde(default = "default_tier_sweep_cron")]
    pub tier_sweep_cron: String,

    /// Prune old terminal follow-ups. Daily, off-peak.
    #[serde(default = "default_retention_cron")]
    pub retention_cron: String,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            health_sweep_cron: default_health_sweep_cron(),
            daily_reset_cron: default_daily_reset_cron(),
            warmup_cron: default_warmup_cron(),
            tier_sweep_cron: default_tier_sweep_cron(),
            retention_cron: default_retention_cron(),
        }
    }
}

fn default_tick_secs() -> u64 {
    60
}

fn default_health_sweep_cron() -> String {
    "0 0 * * * *".to_string()
}

fn default_daily_reset_cron() -> String {
    "0 0 0 * * *".to_string()
}

fn default_warmup_cron() -> String {
    "0 15 0 * * *".to_string()
}

fn default_tier_sweep_cron() -> String {
    "0 30 0 * * *".to_string()
}

fn default_retention_cron() -> String {
    "0 0 3 * * *".to_string()
}

// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks semantic constraints serde cannot express: address shapes,
//! positive tuning knobs, recognized log levels. Collects every violation
//! instead of failing on the first so one startup shows the whole list.

use crate::diagnostic::ConfigError;
use crate::model::KilnConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
pub fn validate_config(config: &KilnConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&config.service.log_level.as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "service.log_level must be one of {}, got `{}`",
                LOG_LEVELS.join(", "),
                config.service.log_level
            ),
        });
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    let addr = config.gateway.bind_address.trim();
    if addr.is_empty() {
        errors.push(ConfigError::Validation {
            message: "gateway.bind_address must not be empty".to_string(),
        });
    } else {
        let is_ip = addr.parse::<std::net::IpAddr>().is_ok();
        let is_hostname = addr
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == ':');
        if !is_ip && !is_hostname {
            errors.push(ConfigError::Validation {
                message: format!(
                    "gateway.bind_address `{addr}` is not a valid IP address or hostname"
                ),
            });
        }
    }

    if config.gateway.port == 0 {
        errors.push(ConfigError::Validation {
            message: "gateway.port must not be 0".to_string(),
        });
    }

    if let Some(token) = &config.gateway.auth_token
        && token.trim().is_empty()
    {
        errors.push(ConfigError::Validation {
            message: "gateway.auth_token must not be blank when set".to_string(),
        });
    }

    if config.pool.allocation_attempts == 0 {
        errors.push(ConfigError::Validation {
            message: "pool.allocation_attempts must be at least 1".to_string(),
        });
    }

    for (key, value) in [
        ("pool.followup_max_attempts", config.pool.followup_max_attempts),
        ("pool.followup_lock_secs", config.pool.followup_lock_secs),
        (
            "pool.followup_retention_days",
            config.pool.followup_retention_days,
        ),
    ] {
        if value < 1 {
            errors.push(ConfigError::Validation {
                message: format!("{key} must be at least 1, got {value}"),
            });
        }
    }

    if config.maintenance.tick_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "maintenance.tick_secs must be at least 1".to_string(),
        });
    }

    // Cron patterns are parsed for real when the scheduler is built; here
    // only the obviously broken empty string is caught.
    for (key, pattern) in [
        ("maintenance.health_sweep_cron", &config.maintenance.health_sweep_cron),
        ("maintenance.daily_reset_cron", &config.maintenance.daily_reset_cron),
        ("maintenance.warmup_cron", &config.maintenance.warmup_cron),
        ("maintenance.tier_sweep_cron", &config.maintenance.tier_sweep_cron),
        ("maintenance.retention_cron", &config.maintenance.retention_cron),
    ] {
        if pattern.trim().is_empty() {
            errors.push(ConfigError::Validation {
                message: format!("{key} must not be empty"),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

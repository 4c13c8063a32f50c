// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading via Figment.
//!
//! Supports the XDG hierarchy: `./kiln.toml` > `~/.config/kiln/kiln.toml`
//! > `/etc/kiln/kiln.toml`, with `KILN_*` environment overrides on top.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::KilnConfig;

/// Load configuration from the standard XDG hierarchy with env overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/kiln/kiln.toml` (system-wide)
/// 3. `~/.config/kiln/kiln.toml` (user XDG config)
/// 4. `./kiln.toml` (local directory)
/// 5. `KILN_*` environment variables
pub fn load_config() -> Result<KilnConfig, figment::Error> {
    base_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used by tests and tooling that need a hermetic config.
pub fn load_config_from_str(toml_content: &str) -> Result<KilnConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(KilnConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from an explicit file path with env overrides.
pub fn load_config_from_path(path: &Path) -> Result<KilnConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(KilnConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

fn base_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(KilnConfig::default()))
        .merge(Toml::file("/etc/kiln/kiln.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("kiln/kiln.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("kiln.toml"))
        .merge(env_provider())
}

/// Environment provider with explicit section mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names
/// themselves contain underscores: `KILN_GATEWAY_AUTH_TOKEN` must map to
/// `gateway.auth_token`, not `gateway.auth.token`.
fn env_provider() -> Env {
    Env::prefixed("KILN_").map(|key| {
        // `key` arrives lowercased with the prefix stripped, e.g.
        // KILN_STORAGE_DATABASE_PATH -> "storage_database_path".
        key.as_str()
            .replacen("service_", "service.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("gateway_", "gateway.", 1)
            .replacen("pool_", "pool.", 1)
            .replacen("maintenance_", "maintenance.", 1)
            .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.service.name, "kiln");
        assert_eq!(config.gateway.port, 8088);
        assert!(config.storage.wal_mode);
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = load_config_from_str(
            r#"
[gateway]
port = 9900
auth_token = "sekrit"

[pool]
allocation_attempts = 3
"#,
        )
        .unwrap();
        assert_eq!(config.gateway.port, 9900);
        assert_eq!(config.gateway.auth_token.as_deref(), Some("sekrit"));
        assert_eq!(config.pool.allocation_attempts, 3);
        // untouched sections keep their defaults
        assert_eq!(config.maintenance.tick_secs, 60);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let result = load_config_from_str(
            r#"
[storage]
databse_path = "/tmp/kiln.db"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn env_vars_override_file_values() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "kiln.toml",
                r#"
[gateway]
port = 9000
"#,
            )?;
            jail.set_env("KILN_GATEWAY_PORT", "9001");
            jail.set_env("KILN_STORAGE_DATABASE_PATH", "/tmp/env.db");
            let config: KilnConfig = Figment::new()
                .merge(Serialized::defaults(KilnConfig::default()))
                .merge(Toml::file("kiln.toml"))
                .merge(super::env_provider())
                .extract()?;
            assert_eq!(config.gateway.port, 9001);
            assert_eq!(config.storage.database_path, "/tmp/env.db");
            Ok(())
        });
    }

    #[test]
    fn env_mapping_keeps_underscored_key_names_intact() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("KILN_GATEWAY_AUTH_TOKEN", "from-env");
            jail.set_env("KILN_MAINTENANCE_HEALTH_SWEEP_CRON", "0 30 * * * *");
            let config: KilnConfig = Figment::new()
                .merge(Serialized::defaults(KilnConfig::default()))
                .merge(super::env_provider())
                .extract()?;
            assert_eq!(config.gateway.auth_token.as_deref(), Some("from-env"));
            assert_eq!(config.maintenance.health_sweep_cron, "0 30 * * * *");
            Ok(())
        });
    }
}

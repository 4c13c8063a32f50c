// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the Kiln pool manager.
//!
//! TOML parsing with strict validation (`deny_unknown_fields`), XDG file
//! hierarchy lookup, `KILN_*` environment overrides, and miette diagnostics
//! with typo suggestions.
//!
//! # Usage
//!
//! ```no_run
//! let config = kiln_config::load_and_validate().expect("config errors");
//! println!("listening on {}:{}", config.gateway.bind_address, config.gateway.port);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

pub use diagnostic::{render_errors, ConfigError};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::KilnConfig;

use kiln_core::KilnError;

/// Load configuration from the XDG hierarchy and validate it.
///
/// On Figment failure the raw error is converted into miette diagnostics
/// with source spans; on success the semantic validators run. Either way a
/// failed load yields every problem at once.
pub fn load_and_validate() -> Result<KilnConfig, Vec<ConfigError>> {
    match loader::load_config() {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => {
            let toml_sources = collect_toml_sources();
            Err(diagnostic::diagnose(err, &toml_sources))
        }
    }
}

/// Load configuration from a TOML string and validate it.
pub fn load_and_validate_str(toml_content: &str) -> Result<KilnConfig, Vec<ConfigError>> {
    match loader::load_config_from_str(toml_content) {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => {
            let sources = vec![("<inline>".to_string(), toml_content.to_string())];
            Err(diagnostic::diagnose(err, &sources))
        }
    }
}

/// Load configuration from an explicit path and validate it.
pub fn load_and_validate_path(path: &std::path::Path) -> Result<KilnConfig, Vec<ConfigError>> {
    match loader::load_config_from_path(path) {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => {
            let mut sources = Vec::new();
            if let Ok(content) = std::fs::read_to_string(path) {
                sources.push((path.display().to_string(), content));
            }
            Err(diagnostic::diagnose(err, &sources))
        }
    }
}

/// Collapse config diagnostics into the workspace error type, for callers
/// that cannot render miette reports.
pub fn to_kiln_error(errors: &[ConfigError]) -> KilnError {
    let joined = errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    KilnError::Config(joined)
}

/// Collect TOML source file contents for error span resolution.
fn collect_toml_sources() -> Vec<(String, String)> {
    let mut sources = Vec::new();

    if let Ok(content) = std::fs::read_to_string("kiln.toml") {
        let path = std::env::current_dir()
            .map(|d| d.join("kiln.toml").display().to_string())
            .unwrap_or_else(|_| "kiln.toml".to_string());
        sources.push((path, content));
    }

    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join("kiln/kiln.toml");
        if let Ok(content) = std::fs::read_to_string(&path) {
            sources.push((path.display().to_string(), content));
        }
    }

    let system_path = std::path::Path::new("/etc/kiln/kiln.toml");
    if let Ok(content) = std::fs::read_to_string(system_path) {
        sources.push((system_path.display().to_string(), content));
    }

    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_load_surfaces_validation_errors() {
        let errors = load_and_validate_str(
            r#"
[gateway]
port = 0
"#,
        )
        .unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("port"))));
    }

    #[test]
    fn unknown_key_gets_a_suggestion() {
        let errors = load_and_validate_str(
            r#"
[storage]
databse_path = "/tmp/kiln.db"
"#,
        )
        .unwrap_err();
        let has_suggestion = errors.iter().any(|e| {
            matches!(
                e,
                ConfigError::UnknownKey {
                    suggestion: Some(s),
                    ..
                } if s == "database_path"
            )
        });
        assert!(has_suggestion, "expected a database_path suggestion: {errors:?}");
    }

    #[test]
    fn to_kiln_error_joins_messages() {
        let errors = vec![
            ConfigError::Validation {
                message: "gateway.port must not be 0".to_string(),
            },
            ConfigError::MissingKey {
                key: "storage.database_path".to_string(),
            },
        ];
        let err = to_kiln_error(&errors);
        let text = err.to_string();
        assert!(text.contains("gateway.port"));
        assert!(text.contains("storage.database_path"));
    }
}

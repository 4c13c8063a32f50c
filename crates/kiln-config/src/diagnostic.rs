// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Figment-to-miette error bridge.
//!
//! Turns Figment deserialization failures into miette diagnostics that
//! point at the offending line of `kiln.toml` and, for unknown keys, offer
//! a "did you mean?" suggestion via Jaro-Winkler similarity.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Minimum Jaro-Winkler score before a correction is suggested. High
/// enough to catch `databse_path` -> `database_path` without proposing
/// keys that merely share a prefix.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// A configuration error carrying miette diagnostic context.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A key Kiln does not recognize.
    #[error("unknown configuration key `{key}`")]
    #[diagnostic(
        code(kiln::config::unknown_key),
        help("{}", unknown_key_help(suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        key: String,
        /// Fuzzy-matched correction, if one is close enough.
        suggestion: Option<String>,
        /// Comma-separated valid keys for the section.
        valid_keys: String,
        #[label("this key is not recognized")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value of the wrong TOML type.
    #[error("invalid type for key `{key}`: {detail}")]
    #[diagnostic(code(kiln::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        key: String,
        detail: String,
        expected: String,
        #[label("wrong type here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A required key that was not provided.
    #[error("missing required key `{key}`")]
    #[diagnostic(
        code(kiln::config::missing_key),
        help("add `{key} = <value>` to your kiln.toml")
    )]
    MissingKey { key: String },

    /// A semantic rule violated by an otherwise well-formed value.
    #[error("validation error: {message}")]
    #[diagnostic(code(kiln::config::validation))]
    Validation { message: String },

    /// Anything Figment reports that does not fit the variants above.
    #[error("configuration error: {0}")]
    #[diagnostic(code(kiln::config::other))]
    Other(String),
}

fn unknown_key_help(suggestion: Option<&str>, valid_keys: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? Valid keys: {valid_keys}"),
        None => format!("valid keys: {valid_keys}"),
    }
}

/// Convert a `figment::Error` (which may aggregate several failures) into
/// one `ConfigError` per underlying problem.
pub fn diagnose(err: figment::Error, toml_sources: &[(String, String)]) -> Vec<ConfigError> {
    use figment::error::Kind;

    err.into_iter()
        .map(|error| match &error.kind {
            Kind::UnknownField(field, expected) => {
                let valid: Vec<&str> = expected.to_vec();
                let (span, src) = span_for(&error, field, toml_sources);
                ConfigError::UnknownKey {
                    key: field.clone(),
                    suggestion: closest_key(field, &valid),
                    valid_keys: valid.join(", "),
                    span,
                    src,
                }
            }
            Kind::MissingField(field) => ConfigError::MissingKey {
                key: field.clone().into_owned(),
            },
            Kind::InvalidType(actual, expected) => ConfigError::InvalidType {
                key: error
                    .path
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join("."),
                detail: format!("found {actual}, expected {expected}"),
                expected: expected.to_string(),
                span: None,
                src: None,
            },
            _ => ConfigError::Other(format!("{error}")),
        })
        .collect()
}

/// Pick the valid key most similar to `unknown`, if any clears the
/// suggestion threshold.
pub fn closest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Resolve the source span of a failing key inside the TOML file Figment
/// read it from, when that file is among the collected sources.
fn span_for(
    error: &figment::error::Error,
    field: &str,
    toml_sources: &[(String, String)],
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    let source_path = error
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_ref())
        .and_then(|s| match s {
            figment::Source::File(path) => Some(path.display().to_string()),
            _ => None,
        });

    let section: Vec<String> = error.path.iter().map(|s| s.to_string()).collect();
    let found = source_path
        .as_ref()
        .and_then(|path| toml_sources.iter().find(|(p, _)| p == path))
        .and_then(|(path, content)| {
            locate_key(content, section.first().map(String::as_str), field)
                .map(|offset| (path.clone(), content.clone(), offset))
        });

    match found {
        Some((path, content, offset)) => (
            Some(SourceSpan::new(offset.into(), field.len())),
            Some(NamedSource::new(path, content)),
        ),
        None => (None, None),
    }
}

/// Byte offset of `key` within the given TOML section, or within the
/// top-level table when `section` is `None`.
pub fn locate_key(content: &str, section: Option<&str>, key: &str) -> Option<usize> {
    let mut offset = 0usize;
    let mut in_section = section.is_none();

    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('[') {
            // Entering a table header switches the active section.
            let header = trimmed.trim_start_matches('[').trim_end_matches(']');
            in_section = section == Some(header);
        } else if in_section {
            if let Some(rest) = trimmed.strip_prefix(key) {
                let next = rest.chars().next();
                if matches!(next, Some(' ') | Some('\t') | Some('=')) {
                    return Some(offset + (line.len() - trimmed.len()));
                }
            }
        }
        offset += line.len() + 1; // +1 for the newline
    }
    None
}

/// Render config errors to stderr through miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    use miette::GraphicalReportHandler;

    let handler = GraphicalReportHandler::new();
    for error in errors {
        let mut buf = String::new();
        let diagnostic: &dyn Diagnostic = error;
        if handler.render_report(&mut buf, diagnostic).is_ok() {
            eprint!("{buf}");
        } else {
            eprintln!("Error: {error}");
        }
    }
}

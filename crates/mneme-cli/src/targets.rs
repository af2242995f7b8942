//! Targets file parsing.
//!
//! A targets file lists one identity per line. Surrounding whitespace is
//! ignored, as are blank lines and lines whose first non-blank character
//! is `#`.

use std::path::Path;

use mneme_core::{AddressMode, AppError, Identity, IdentityBatch};

/// Parses targets file content into a batch.
///
/// In [`AddressMode::Handles`] every line is normalized as a handle; in
/// [`AddressMode::Ids`] every line must be a decimal account id.
///
/// # Errors
///
/// - [`AppError::InvalidIdentity`] for a line that cannot be parsed,
///   prefixed with its line number
/// - [`AppError::EmptyBatch`] when no identity remains
pub fn parse_targets(content: &str, mode: AddressMode) -> Result<IdentityBatch, AppError> {
    let mut identities = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let identity = Identity::parse(line, mode).map_err(|_| {
            AppError::InvalidIdentity(format!(
                "line {}: '{}' is not a valid {}",
                index + 1,
                line,
                describe(mode)
            ))
        })?;
        identities.push(identity);
    }

    IdentityBatch::new(identities)
}

/// Reads and parses a targets file.
pub fn read_targets(path: &Path, mode: AddressMode) -> Result<IdentityBatch, AppError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read targets file '{}': {}",
            path.display(),
            e
        ))
    })?;
    parse_targets(&content, mode)
}

fn describe(mode: AddressMode) -> &'static str {
    match mode {
        AddressMode::Handles => "handle",
        AddressMode::Ids => "numeric id",
    }
}

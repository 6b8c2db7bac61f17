//! Input validation for gridops-runner.
//!
//! All validation is pure (no side effects) and fully testable. Identifiers
//! supplied by the control plane only reach the filesystem or a child
//! process as an [`AppSlug`] or [`RemoteName`], which can only be built here.

use std::fmt;

use thiserror::Error;

/// Maximum slug length.
pub const SLUG_MAX_LEN: usize = 64;

/// Maximum remote name length.
pub const REMOTE_MAX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is empty")]
    Empty { field: &'static str },

    #[error("{field} too long ({len} > {max})")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{field} contains '..' (path traversal)")]
    ParentDir { field: &'static str },

    #[error("{field} contains '/'")]
    PathSeparator { field: &'static str },

    #[error("{field} contains whitespace")]
    Whitespace { field: &'static str },

    #[error("{field} must not start with '{leading}'")]
    LeadingChar { field: &'static str, leading: char },

    #[error("{field} contains invalid character {ch:?} (allowed: {allowed})")]
    InvalidChar {
        field: &'static str,
        ch: char,
        allowed: &'static str,
    },
}

/// A validated application identifier, safe to use as a directory name and
/// as a positional argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppSlug(String);

impl AppSlug {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for AppSlug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated remote-storage name, safe to embed in a mount point path, a
/// unit file name and the unit's `ExecStart=` line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteName(String);

impl RemoteName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RemoteName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate an application slug.
///
/// Rules:
/// - Not empty, at most 64 characters
/// - No `..` and no `/`
/// - Only ascii letters, digits, underscore, hyphen
/// - Must not start with `-` (would be read as an option by `tar`)
pub fn validate_slug(slug: &str) -> Result<AppSlug, ValidationError> {
    const FIELD: &str = "app_slug";

    check_common(FIELD, slug, SLUG_MAX_LEN)?;
    if let Some(ch) = slug
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(ValidationError::InvalidChar {
            field: FIELD,
            ch,
            allowed: "a-z, A-Z, 0-9, _, -",
        });
    }
    if slug.starts_with('-') {
        return Err(ValidationError::LeadingChar {
            field: FIELD,
            leading: '-',
        });
    }
    Ok(AppSlug(slug.to_string()))
}

/// Validate a remote-storage name.
///
/// Rules:
/// - Not empty, at most 64 characters
/// - No `..`, no `/`, no whitespace
/// - Only ascii letters, digits and `_ . + @ -`; this excludes `:` (remote
///   separator in `remote:path`) and `%` (systemd specifier)
/// - Must not start with `-` or `.`
pub fn validate_remote_name(remote: &str) -> Result<RemoteName, ValidationError> {
    const FIELD: &str = "remote";

    check_common(FIELD, remote, REMOTE_MAX_LEN)?;
    if remote.chars().any(char::is_whitespace) {
        return Err(ValidationError::Whitespace { field: FIELD });
    }
    if let Some(ch) = remote
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '@' | '-')))
    {
        return Err(ValidationError::InvalidChar {
            field: FIELD,
            ch,
            allowed: "a-z, A-Z, 0-9, _, ., +, @, -",
        });
    }
    if let Some(leading @ ('-' | '.')) = remote.chars().next() {
        return Err(ValidationError::LeadingChar {
            field: FIELD,
            leading,
        });
    }
    Ok(RemoteName(remote.to_string()))
}

fn check_common(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if value.contains("..") {
        return Err(ValidationError::ParentDir { field });
    }
    if value.contains('/') {
        return Err(ValidationError::PathSeparator { field });
    }
    if value.len() > max {
        return Err(ValidationError::TooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

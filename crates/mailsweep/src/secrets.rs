//! Secret resolution for the mailbox bearer token.
//!
//! A token can be given in three ways, tried in this order:
//!
//! 1. **Direct value** (`token: "ya29..."`), handy for a quick local run
//! 2. **File reference** (`token_file: /run/secrets/gmail_token`)
//! 3. **Env var reference** (`token_env_var: GMAIL_ACCESS_TOKEN`)

use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Secret from {source_kind} is empty")]
    Empty { source_kind: &'static str },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from the first source that is set and non-empty.
///
/// File contents and environment values are trimmed. A source that is
/// configured but yields an empty string is an error rather than a silent
/// fall-through, so a truncated token file is noticed.
///
/// ```ignore
/// use mailsweep::secrets::resolve_secret;
///
/// let token = resolve_secret(None, Some("~/.mailsweep/token"), Some("GMAIL_ACCESS_TOKEN"))?;
/// ```
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
            path: expanded.clone(),
            source: e,
        })?;
        return non_empty(content.trim(), "file");
    }

    if let Some(var_name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(var_name) {
            Ok(value) => non_empty(value.trim(), "environment"),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: var_name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: var_name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Checks if at least one secret source is configured (non-empty).
pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    direct.is_some_and(|s| !s.is_empty())
        || file_path.is_some_and(|s| !s.is_empty())
        || env_var.is_some_and(|s| !s.is_empty())
}

fn non_empty(value: &str, source_kind: &'static str) -> Result<SecretString> {
    if value.is_empty() {
        return Err(SecretError::Empty { source_kind });
    }
    Ok(SecretString::from(value.to_string()))
}

/// Expands a leading `~` to the user's home directory.
///
/// `~user/path` is not supported.
pub(crate) fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

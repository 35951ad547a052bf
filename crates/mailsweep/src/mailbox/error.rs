//! Remote mailbox error types.

use thiserror::Error;

/// Errors that can occur while talking to the remote mailbox.
#[derive(Error, Debug)]
pub enum MailboxError {
    /// Transport-level failure (connect, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("Mailbox API returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("Unexpected mailbox response: {0}")]
    Decode(String),

    /// The bearer token could not be resolved.
    #[error("Mailbox credentials unavailable: {0}")]
    Credentials(#[from] crate::secrets::SecretError),

    /// Invalid client configuration.
    #[error("Invalid mailbox configuration: {0}")]
    Config(String),

    /// Failure injected by the in-memory mailbox.
    #[error("Mailbox unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, MailboxError>;

//! Remote mailbox access.
//!
//! The engine only needs three calls from the service holding the items:
//! page through identifiers, read an item's metadata and remove an item.
//! [`gmail::GmailClient`] talks to the Gmail REST API,
//! [`memory::MemoryMailbox`] keeps everything in process.

use chrono::{DateTime, Utc};

pub mod error;
pub mod gmail;
pub mod memory;

pub use error::{MailboxError, Result};
pub use gmail::GmailClient;
pub use memory::MemoryMailbox;

/// One page of item identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub ids: Vec<String>,
    /// Token of the following page, `None` on the last page.
    pub next_page_token: Option<String>,
}

/// A raw header as returned by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Metadata of one remote item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailItem {
    pub internal_date: DateTime<Utc>,
    pub headers: Vec<Header>,
}

impl MailItem {
    /// Value of the last header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// Result of a remove call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// The item was already gone. Counts as completion.
    NotFound,
}

/// The remote service holding the items.
pub trait Mailbox: Send + Sync {
    fn list_identifiers(&self, page_token: Option<&str>) -> Result<ListPage>;

    fn get_item(&self, id: &str) -> Result<MailItem>;

    fn remove_item(&self, id: &str) -> Result<RemoveOutcome>;
}

/// Reduces a header value such as `"Jane Doe <Jane@Example.com>"` to the
/// bare, lower-cased address `jane@example.com`.
///
/// Values without a complete `<...>` pair are only lower-cased and trimmed.
pub fn normalize_address(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    if let Some(open) = lowered.find('<') {
        if let Some(len) = lowered[open + 1..].find('>') {
            let inner = lowered[open + 1..open + 1 + len].trim();
            if !inner.is_empty() {
                return inner.to_string();
            }
        }
    }
    lowered.trim().to_string()
}

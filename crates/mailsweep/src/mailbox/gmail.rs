//! Gmail REST client for the thread endpoints.
//!
//! Uses the blocking reqwest client so it can be called straight from
//! worker threads. Only a bearer access token is needed; obtaining and
//! refreshing it happens outside this crate.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::{MailboxError, Result};
use super::{Header, ListPage, MailItem, Mailbox, RemoveOutcome};
use crate::config::MailboxConfig;
use crate::secrets::resolve_secret;

/// Page size requested from the list endpoint.
pub const LIST_PAGE_SIZE: u32 = 500;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum length of an error body kept in [`MailboxError::Status`].
const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadList {
    #[serde(default)]
    threads: Vec<ThreadRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Thread {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Message {
    /// Milliseconds since the epoch, sent as a decimal string.
    internal_date: String,
    payload: Option<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct MessagePart {
    #[serde(default)]
    headers: Vec<RawHeader>,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    name: String,
    value: String,
}

fn truncate_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

fn parse_internal_date(raw: &str) -> Result<DateTime<Utc>> {
    let millis: i64 = raw
        .parse()
        .map_err(|_| MailboxError::Decode(format!("invalid internalDate '{raw}'")))?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| MailboxError::Decode(format!("internalDate out of range: {millis}")))
}

/// The first message of a thread carries its date and headers.
fn item_from_thread(thread: Thread) -> Result<MailItem> {
    let first = thread
        .messages
        .into_iter()
        .next()
        .ok_or_else(|| MailboxError::Decode("thread has no messages".to_string()))?;
    let headers = first
        .payload
        .map(|p| p.headers)
        .unwrap_or_default()
        .into_iter()
        .map(|h| Header::new(h.name, h.value))
        .collect();
    Ok(MailItem {
        internal_date: parse_internal_date(&first.internal_date)?,
        headers,
    })
}

/// Client for `users/{user}/threads`.
pub struct GmailClient {
    client: Client,
    threads_url: String,
    token: SecretString,
}

impl GmailClient {
    /// Creates a client against `api_base` (e.g. `https://gmail.googleapis.com/gmail/v1`).
    pub fn new(api_base: &str, user: &str, token: SecretString) -> Result<Self> {
        if api_base.is_empty() || user.is_empty() {
            return Err(MailboxError::Config(
                "api base and user must not be empty".to_string(),
            ));
        }
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            threads_url: format!("{}/users/{}/threads", api_base.trim_end_matches('/'), user),
            token,
        })
    }

    /// Builds a client from configuration, resolving the token.
    pub fn from_config(config: &MailboxConfig) -> Result<Self> {
        let token = resolve_secret(
            config.token.as_deref(),
            config.token_file.as_deref(),
            config.token_env_var.as_deref(),
        )?;
        Self::new(&config.api_base, &config.user, token)
    }

    fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(MailboxError::Status {
            status: status.as_u16(),
            body: truncate_body(&body),
        })
    }
}

impl Mailbox for GmailClient {
    fn list_identifiers(&self, page_token: Option<&str>) -> Result<ListPage> {
        let mut query: Vec<(&str, String)> = vec![
            ("maxResults", LIST_PAGE_SIZE.to_string()),
            ("fields", "nextPageToken,threads/id".to_string()),
        ];
        if let Some(token) = page_token.filter(|t| !t.is_empty()) {
            query.push(("pageToken", token.to_string()));
        }

        let response = self
            .client
            .get(&self.threads_url)
            .bearer_auth(self.token.expose_secret())
            .query(&query)
            .send()?;
        let list: ThreadList = Self::check(response)?.json()?;

        debug!("Listed {} threads", list.threads.len());

        Ok(ListPage {
            ids: list.threads.into_iter().map(|t| t.id).collect(),
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    fn get_item(&self, id: &str) -> Result<MailItem> {
        let response = self
            .client
            .get(format!("{}/{}", self.threads_url, id))
            .bearer_auth(self.token.expose_secret())
            .query(&[("format", "metadata")])
            .send()?;
        let thread: Thread = Self::check(response)?.json()?;
        item_from_thread(thread)
    }

    fn remove_item(&self, id: &str) -> Result<RemoveOutcome> {
        let response = self
            .client
            .post(format!("{}/{}/trash", self.threads_url, id))
            .bearer_auth(self.token.expose_secret())
            .send()?;
        if response.status() == StatusCode::NOT_FOUND {
            warn!("Thread {} was already gone", id);
            return Ok(RemoveOutcome::NotFound);
        }
        Self::check(response)?;
        Ok(RemoveOutcome::Removed)
    }
}

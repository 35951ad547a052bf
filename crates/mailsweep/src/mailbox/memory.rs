//! In-process mailbox for tests and dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::error::{MailboxError, Result};
use super::{Header, ListPage, MailItem, Mailbox, RemoveOutcome};

#[derive(Default)]
struct State {
    order: Vec<String>,
    items: HashMap<String, MailItem>,
    removed: Vec<String>,
    fail_get: HashSet<String>,
    fail_remove: HashSet<String>,
    fail_list: bool,
    list_calls: usize,
    get_calls: usize,
}

/// A mailbox held in memory, paged like the real service.
///
/// Page tokens are the decimal offset of the next page. Failures can be
/// scripted per item to exercise error handling.
pub struct MemoryMailbox {
    page_size: usize,
    state: Mutex<State>,
}

impl MemoryMailbox {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds an item with `From` and `To` headers.
    pub fn insert(&self, id: &str, from: &str, to: &str, internal_date: DateTime<Utc>) {
        self.insert_item(
            id,
            MailItem {
                internal_date,
                headers: vec![Header::new("From", from), Header::new("To", to)],
            },
        );
    }

    pub fn insert_item(&self, id: &str, item: MailItem) {
        let mut state = self.state();
        if state.items.insert(id.to_string(), item).is_none() {
            state.order.push(id.to_string());
        }
    }

    /// Makes every `get_item(id)` fail.
    pub fn fail_get(&self, id: &str) {
        self.state().fail_get.insert(id.to_string());
    }

    /// Makes every `remove_item(id)` fail.
    pub fn fail_remove(&self, id: &str) {
        self.state().fail_remove.insert(id.to_string());
    }

    /// Makes every `list_identifiers` call fail.
    pub fn fail_list(&self) {
        self.state().fail_list = true;
    }

    /// Ids removed so far, in removal order.
    pub fn removed(&self) -> Vec<String> {
        self.state().removed.clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state().items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    pub fn get_calls(&self) -> usize {
        self.state().get_calls
    }
}

impl Mailbox for MemoryMailbox {
    fn list_identifiers(&self, page_token: Option<&str>) -> Result<ListPage> {
        let mut state = self.state();
        state.list_calls += 1;
        if state.fail_list {
            return Err(MailboxError::Unavailable("list failed".to_string()));
        }

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| MailboxError::Decode(format!("bad page token '{token}'")))?,
            None => 0,
        };
        let end = (offset + self.page_size).min(state.order.len());
        let ids = state
            .order
            .get(offset..end)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        let next_page_token = (end < state.order.len()).then(|| end.to_string());

        Ok(ListPage {
            ids,
            next_page_token,
        })
    }

    fn get_item(&self, id: &str) -> Result<MailItem> {
        let mut state = self.state();
        state.get_calls += 1;
        if state.fail_get.contains(id) {
            return Err(MailboxError::Unavailable(format!("get {id} failed")));
        }
        state.items.get(id).cloned().ok_or(MailboxError::Status {
            status: 404,
            body: format!("item {id} not found"),
        })
    }

    fn remove_item(&self, id: &str) -> Result<RemoveOutcome> {
        let mut state = self.state();
        if state.fail_remove.contains(id) {
            return Err(MailboxError::Unavailable(format!("remove {id} failed")));
        }
        if state.items.remove(id).is_none() {
            return Ok(RemoveOutcome::NotFound);
        }
        state.order.retain(|other| other != id);
        state.removed.push(id.to_string());
        Ok(RemoveOutcome::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailbox_with(n: usize, page_size: usize) -> MemoryMailbox {
        let mailbox = MemoryMailbox::new(page_size);
        for i in 0..n {
            mailbox.insert(&format!("t{i}"), "a@x.com", "me@x.com", Utc::now());
        }
        mailbox
    }

    #[test]
    fn test_paging_walks_all_ids() {
        let mailbox = mailbox_with(5, 2);
        let mut token: Option<String> = None;
        let mut seen = Vec::new();
        loop {
            let page = mailbox.list_identifiers(token.as_deref()).unwrap();
            seen.extend(page.ids);
            token = page.next_page_token;
            if token.is_none() {
                break;
            }
        }
        assert_eq!(seen, vec!["t0", "t1", "t2", "t3", "t4"]);
        assert_eq!(mailbox.list_calls(), 3);
    }

    #[test]
    fn test_empty_mailbox_has_one_empty_page() {
        let mailbox = MemoryMailbox::new(10);
        let page = mailbox.list_identifiers(None).unwrap();
        assert!(page.ids.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_remove_is_reported_once() {
        let mailbox = mailbox_with(1, 10);
        assert_eq!(mailbox.remove_item("t0").unwrap(), RemoveOutcome::Removed);
        assert_eq!(mailbox.remove_item("t0").unwrap(), RemoveOutcome::NotFound);
        assert_eq!(mailbox.removed(), vec!["t0"]);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_scripted_failures() {
        let mailbox = mailbox_with(2, 10);
        mailbox.fail_get("t0");
        mailbox.fail_remove("t1");
        assert!(mailbox.get_item("t0").is_err());
        assert!(mailbox.get_item("t1").is_ok());
        assert!(mailbox.remove_item("t1").is_err());
        assert!(mailbox.contains("t1"));
        assert!(matches!(
            mailbox.get_item("missing"),
            Err(MailboxError::Status { status: 404, .. })
        ));
    }
}

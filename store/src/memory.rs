//! In-memory store and directory used by the test suites

use crate::fields::COMMUNITY_FILTER_FIELD;
use crate::{IdentityDirectory, MembershipRecord, MembershipStore, UserPage};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Default)]
struct StoreState {
    docs: BTreeMap<String, MembershipRecord>,
    failing: HashSet<String>,
    writes: usize,
    deletes: usize,
}

/// Membership collection held in a map keyed by document id
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = MembershipRecord>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock();
            for record in records {
                state.docs.insert(record.id.clone(), record);
            }
        }
        store
    }

    /// Make every write or delete touching `id` fail
    pub fn fail_on(&self, id: &str) {
        self.state.lock().failing.insert(id.to_string());
    }

    pub fn ids(&self) -> Vec<String> {
        self.state.lock().docs.keys().cloned().collect()
    }

    pub fn fields(&self, id: &str) -> Option<Map<String, Value>> {
        self.state.lock().docs.get(id).map(|record| record.fields.clone())
    }

    /// Number of successful `set` calls
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    /// Number of successful `delete` calls
    pub fn delete_count(&self) -> usize {
        self.state.lock().deletes
    }
}

#[async_trait]
impl MembershipStore for InMemoryStore {
    async fn scan(&self, community_filter: Option<&str>) -> Result<Vec<MembershipRecord>> {
        let state = self.state.lock();
        Ok(state
            .docs
            .values()
            .filter(|record| match community_filter {
                Some(cid) => {
                    record.fields.get(COMMUNITY_FILTER_FIELD).and_then(Value::as_str) == Some(cid)
                }
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<MembershipRecord>> {
        Ok(self.state.lock().docs.get(id).cloned())
    }

    async fn set(&self, id: &str, record: &MembershipRecord) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing.contains(id) {
            return Err(anyhow::anyhow!("injected write failure for {}", id));
        }
        let copy = MembershipRecord {
            id: id.to_string(),
            ..record.clone()
        };
        state.docs.insert(copy.id.clone(), copy);
        state.writes += 1;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing.contains(id) {
            return Err(anyhow::anyhow!("injected delete failure for {}", id));
        }
        state.docs.remove(id);
        state.deletes += 1;
        Ok(())
    }
}

/// Fixed list of user ids served in pages, with the offset as cursor
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    user_ids: Vec<String>,
    requests: Mutex<usize>,
}

impl InMemoryDirectory {
    pub fn new<I, S>(user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_ids: user_ids.into_iter().map(Into::into).collect(),
            requests: Mutex::new(0),
        }
    }

    /// Number of pages served so far
    pub fn request_count(&self) -> usize {
        *self.requests.lock()
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn list_users(&self, max_results: usize, page_token: Option<&str>) -> Result<UserPage> {
        *self.requests.lock() += 1;

        let start = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| anyhow::anyhow!("invalid page token {:?}", token))?,
            None => 0,
        };
        let end = (start + max_results.max(1)).min(self.user_ids.len());
        let user_ids = self.user_ids.get(start..end).unwrap_or_default().to_vec();

        // The last page carries no cursor, even when it is exactly full.
        let next_page_token = (end < self.user_ids.len()).then(|| end.to_string());
        Ok(UserPage {
            user_ids,
            next_page_token,
        })
    }
}

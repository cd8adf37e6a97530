//! Storage and identity seams for the membership maintenance jobs
//!
//! This crate provides:
//! - `MembershipStore`: the document collection the jobs read, write and delete
//! - `IdentityDirectory`: a cursor-paginated listing of valid user ids
//! - Firestore and Identity Toolkit implementations of both
//! - In-memory implementations for tests

pub mod credentials;
pub mod fields;
pub mod memory;

#[cfg(feature = "identity_toolkit")]
pub mod auth;
#[cfg(feature = "identity_toolkit")]
pub mod identity;

#[cfg(feature = "firestore_backend")]
pub mod firestore;

pub use credentials::ServiceAccountKey;
pub use fields::FieldChain;
pub use memory::{InMemoryDirectory, InMemoryStore};

#[cfg(feature = "identity_toolkit")]
pub use identity::IdentityToolkitDirectory;

#[cfg(feature = "firestore_backend")]
pub use self::firestore::FirestoreMembershipStore;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Default collection holding membership documents
pub const MEMBERSHIPS_COLLECTION: &str = "memberships";

/// A membership document: its key plus every stored field
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipRecord {
    pub id: String,
    /// JSON view of the fields, read by the reference chains
    pub fields: Map<String, Value>,
    /// Field values as the backend holds them; this is what a copy writes
    pub stored: StoredFields,
}

impl MembershipRecord {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
            stored: StoredFields::Json,
        }
    }
}

/// Backend-native form of a record's fields
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StoredFields {
    /// No native form: the JSON view is the whole document
    #[default]
    Json,
    /// Firestore values exactly as read, including types JSON cannot carry
    #[cfg(feature = "firestore_backend")]
    Firestore(std::collections::HashMap<String, ::firestore::FirestoreValue>),
}

/// One page of user ids returned by an identity directory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPage {
    pub user_ids: Vec<String>,
    /// Continuation cursor, `None` once the listing is exhausted
    pub next_page_token: Option<String>,
}

/// Document collection holding membership records.
///
/// Writes are last-write-wins; nothing here is transactional.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Fetch every record, or only those whose primary community field
    /// equals `community_filter`. The result is fully materialized.
    async fn scan(&self, community_filter: Option<&str>) -> anyhow::Result<Vec<MembershipRecord>>;

    async fn get(&self, id: &str) -> anyhow::Result<Option<MembershipRecord>>;

    async fn exists(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Replace the whole document at `id` with the content of `record`
    /// (no merge). `record.id` is ignored.
    async fn set(&self, id: &str, record: &MembershipRecord) -> anyhow::Result<()>;

    async fn delete(&self, id: &str) -> anyhow::Result<()>;
}

/// Cursor-paginated listing of every valid user id
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn list_users(
        &self,
        max_results: usize,
        page_token: Option<&str>,
    ) -> anyhow::Result<UserPage>;
}

//! Firestore implementation of the membership collection
//!
//! Records keep the raw Firestore values for copying and a JSON view of the
//! same fields for reading references, so any field layout works without a
//! fixed schema and no stored type is lost on a move.

use crate::fields::COMMUNITY_FILTER_FIELD;
use crate::{MembershipRecord, MembershipStore, StoredFields, MEMBERSHIPS_COLLECTION};
use anyhow::{Context, Result};
use async_trait::async_trait;
use firestore::*;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, instrument};

/// Firestore-backed membership collection
#[derive(Debug)]
pub struct FirestoreMembershipStore {
    db: FirestoreDb,
    collection: String,
}

impl FirestoreMembershipStore {
    /// Connect with application default credentials
    pub async fn new(project_id: &str) -> Result<Self> {
        info!("Connecting to Firestore project: {}", project_id);

        let db = FirestoreDb::new(project_id)
            .await
            .with_context(|| format!("failed to connect to Firestore project {}", project_id))?;

        info!("Firestore connection established successfully");
        Ok(Self {
            db,
            collection: MEMBERSHIPS_COLLECTION.to_string(),
        })
    }

    /// Connect with an explicit service account key file
    pub async fn with_key_file(project_id: &str, key_path: &Path) -> Result<Self> {
        info!(
            "Connecting to Firestore project: {} (key file {})",
            project_id,
            key_path.display()
        );

        let db = FirestoreDb::with_options_service_account_key_file(
            FirestoreDbOptions::new(project_id.to_string()),
            key_path.to_path_buf(),
        )
        .await
        .with_context(|| format!("failed to connect to Firestore project {}", project_id))?;

        info!("Firestore connection established successfully");
        Ok(Self {
            db,
            collection: MEMBERSHIPS_COLLECTION.to_string(),
        })
    }

    /// Use a collection other than `memberships`
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    fn document_path(&self, id: &str) -> String {
        format!("{}/{}/{}", self.db.get_documents_path(), self.collection, id)
    }
}

fn to_record(doc: &FirestoreDocument) -> MembershipRecord {
    let id = document_id(&doc.name).to_string();
    let stored: HashMap<String, FirestoreValue> = doc
        .fields
        .iter()
        .map(|(name, value)| (name.clone(), FirestoreValue::from(value.clone())))
        .collect();

    // Bytes have no JSON form; such a field stays out of the view but is
    // still part of the stored copy.
    let fields: Map<String, Value> = stored
        .iter()
        .filter_map(|(name, value)| match Value::deserialize(value.clone()) {
            Ok(json) => Some((name.clone(), json)),
            Err(e) => {
                debug!("Field {} of {} has no JSON view: {}", name, id, e);
                None
            }
        })
        .collect();

    MembershipRecord {
        id,
        fields,
        stored: StoredFields::Firestore(stored),
    }
}

/// Full document written for `record` at `path`
fn to_document(path: &str, record: &MembershipRecord) -> Result<FirestoreDocument> {
    let doc = match &record.stored {
        StoredFields::Firestore(values) => {
            firestore_document_from_map(path, values.iter().map(|(k, v)| (k, v.clone())))?
        }
        StoredFields::Json => firestore_document_from_serializable(path, &record.fields)?,
    };
    Ok(doc)
}

/// Last path segment of a full document name
fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[async_trait]
impl MembershipStore for FirestoreMembershipStore {
    #[instrument(skip(self))]
    async fn scan(&self, community_filter: Option<&str>) -> Result<Vec<MembershipRecord>> {
        let docs = match community_filter {
            Some(cid) => {
                self.db
                    .fluent()
                    .select()
                    .from(self.collection.as_str())
                    .filter(|f| f.field(COMMUNITY_FILTER_FIELD).eq(cid))
                    .query()
                    .await?
            }
            None => {
                self.db
                    .fluent()
                    .select()
                    .from(self.collection.as_str())
                    .query()
                    .await?
            }
        };

        debug!("Fetched {} documents from {}", docs.len(), self.collection);
        Ok(docs.iter().map(to_record).collect())
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Option<MembershipRecord>> {
        let doc = self
            .db
            .fluent()
            .select()
            .by_id_in(self.collection.as_str())
            .one(id)
            .await?;

        Ok(doc.as_ref().map(to_record))
    }

    #[instrument(skip(self, record))]
    async fn set(&self, id: &str, record: &MembershipRecord) -> Result<()> {
        let document = to_document(&self.document_path(id), record)
            .with_context(|| format!("failed to encode membership {}", id))?;

        // No field mask: the stored document is replaced, never merged.
        self.db
            .fluent()
            .update()
            .in_col(self.collection.as_str())
            .document(document)
            .execute()
            .await?;

        debug!("Wrote membership {}", id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<()> {
        self.db
            .fluent()
            .delete()
            .from(self.collection.as_str())
            .document_id(id)
            .execute()
            .await?;

        debug!("Deleted membership {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde::Serializer;

    const SOURCE_PATH: &str = "projects/p/databases/(default)/documents/memberships/m1";
    const TARGET_PATH: &str = "projects/p/databases/(default)/documents/memberships/c1_u1";

    struct Avatar(&'static [u8]);

    impl serde::Serialize for Avatar {
        fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            serializer.serialize_bytes(self.0)
        }
    }

    #[test]
    fn test_typed_fields_survive_a_copy() {
        let joined_at: FirestoreValue =
            FirestoreTimestamp(Utc.timestamp_opt(1_700_000_000, 0).unwrap()).into();
        let avatar: FirestoreValue = Avatar(&[0xde, 0xad, 0xbe, 0xef]).into();
        let source = firestore_document_from_map(
            SOURCE_PATH,
            [
                ("cid", "c1".into()),
                ("uid", "u1".into()),
                ("joinedAt", joined_at.clone()),
                ("avatar", avatar.clone()),
            ],
        )
        .unwrap();

        let record = to_record(&source);
        assert_eq!(record.id, "m1");
        assert_eq!(record.fields["cid"], "c1");
        assert_eq!(record.fields["uid"], "u1");
        assert!(!record.fields.contains_key("avatar"));

        let copy = to_document(TARGET_PATH, &record).unwrap();
        assert_eq!(copy.name, TARGET_PATH);
        assert_eq!(copy.fields.get("joinedAt"), Some(&joined_at.value));
        assert_eq!(copy.fields.get("avatar"), Some(&avatar.value));
        assert_eq!(copy.fields, source.fields);
    }

    #[test]
    fn test_json_record_is_encoded_field_by_field() {
        let fields = serde_json::json!({"cid": "c1", "uid": "u1", "active": true});
        let record = MembershipRecord::new("m1", fields.as_object().cloned().unwrap());

        let doc = to_document(TARGET_PATH, &record).unwrap();
        let expected: FirestoreValue = "u1".into();
        assert_eq!(doc.fields.len(), 3);
        assert_eq!(doc.fields.get("uid"), Some(&expected.value));
    }

    #[test]
    fn test_document_id_from_full_name() {
        assert_eq!(
            document_id("projects/p/databases/(default)/documents/memberships/c1_u1"),
            "c1_u1"
        );
        assert_eq!(document_id("c1_u1"), "c1_u1");
    }
}

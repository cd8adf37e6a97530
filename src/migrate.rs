//! Deterministic membership ids
//!
//! Copies every membership to `{communityId}_{userId}` so it can be fetched
//! by key. Old documents are kept unless `--deleteOld` is given, and an
//! existing document at the target key is only replaced with `--overwrite`.

use crate::config::{self, RunOptions};
use anyhow::{Context, Result};
use clap::Parser;
use membership_store::fields::{COMMUNITY, USER};
use membership_store::{
    FirestoreMembershipStore, MembershipRecord, MembershipStore, MEMBERSHIPS_COLLECTION,
};
use std::fmt;
use tracing::{info, warn};

/// Membership migration options
#[derive(Debug, Clone, Parser)]
pub struct MigrateOpts {
    /// Google Cloud project (defaults to GOOGLE_CLOUD_PROJECT)
    #[arg(long = "projectId", value_name = "ID")]
    pub project_id: Option<String>,

    /// Membership collection
    #[arg(long, value_name = "NAME", default_value = MEMBERSHIPS_COLLECTION)]
    pub collection: String,

    /// Report the moves without writing anything
    #[arg(long = "dryRun")]
    pub dry_run: bool,

    /// Delete the old document once it has been copied
    #[arg(long = "deleteOld")]
    pub delete_old: bool,

    /// Replace a document that already exists at the target id
    #[arg(long)]
    pub overwrite: bool,

    /// Keep migrating after a failed document and report the failures at the end
    #[arg(long = "continueOnError")]
    pub continue_on_error: bool,
}

impl From<MigrateOpts> for RunOptions {
    fn from(opts: MigrateOpts) -> Self {
        Self {
            project_id: opts.project_id,
            collection: opts.collection,
            preview: opts.dry_run,
            delete_source: opts.delete_old,
            allow_overwrite: opts.overwrite,
            continue_on_error: opts.continue_on_error,
            ..Default::default()
        }
    }
}

/// What a record needs, judged from its own fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Community or user reference absent
    MissingReference,
    /// Already stored under its canonical key
    AlreadyCanonical,
    Move { target: String },
}

/// Tallies of one migration run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub scanned: usize,
    /// Moved, or would be moved in preview
    pub moved: usize,
    /// Missing references plus target conflicts
    pub skipped: usize,
    pub conflicts: usize,
    /// Already at the canonical key; not counted as moved or skipped
    pub unchanged: usize,
    pub sources_deleted: usize,
    pub failed: usize,
}

impl fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Done. moved={} skipped={}", self.moved, self.skipped)?;
        if self.failed > 0 {
            write!(f, " failed={}", self.failed)?;
        }
        Ok(())
    }
}

pub fn canonical_id(community: &str, user: &str) -> String {
    format!("{}_{}", community, user)
}

pub fn plan_target(record: &MembershipRecord) -> Plan {
    let (Some(community), Some(user)) = (
        COMMUNITY.extract(&record.fields),
        USER.extract(&record.fields),
    ) else {
        return Plan::MissingReference;
    };

    let target = canonical_id(&community, &user);
    if target == record.id {
        Plan::AlreadyCanonical
    } else {
        Plan::Move { target }
    }
}

/// Move every membership to its canonical key.
///
/// The existence check on the target and the write that follows are two
/// separate calls, not a transaction: two runs racing on the same collection
/// can both see the target as free and the later write wins. Only one run
/// may be active against a collection at a time.
pub async fn migrate_memberships(
    store: &dyn MembershipStore,
    options: &RunOptions,
    summary: &mut MigrationSummary,
) -> Result<()> {
    info!("Starting memberships migration");
    info!(
        "dryRun={} deleteOld={} overwrite={}",
        options.preview, options.delete_source, options.allow_overwrite
    );

    let records = store.scan(None).await.context("failed to fetch memberships")?;
    info!("Found {} membership docs", records.len());
    summary.scanned = records.len();

    for record in &records {
        match migrate_record(store, record, options, summary).await {
            Ok(()) => {}
            Err(e) if options.continue_on_error => {
                warn!("Failed to migrate {}: {:#}", record.id, e);
                summary.failed += 1;
            }
            Err(e) => {
                return Err(e.context(format!(
                    "migration of {} failed after {} moves",
                    record.id, summary.moved
                )));
            }
        }
    }

    if summary.failed > 0 {
        return Err(anyhow::anyhow!("{} memberships failed to migrate", summary.failed));
    }
    Ok(())
}

async fn migrate_record(
    store: &dyn MembershipStore,
    record: &MembershipRecord,
    options: &RunOptions,
    summary: &mut MigrationSummary,
) -> Result<()> {
    let target = match plan_target(record) {
        Plan::MissingReference => {
            warn!("Skipping doc {}: missing cid or uid", record.id);
            summary.skipped += 1;
            return Ok(());
        }
        Plan::AlreadyCanonical => {
            summary.unchanged += 1;
            return Ok(());
        }
        Plan::Move { target } => target,
    };

    if !options.allow_overwrite && store.exists(&target).await? {
        warn!("Target {} already exists. Skipping {}", target, record.id);
        summary.skipped += 1;
        summary.conflicts += 1;
        return Ok(());
    }

    info!("Migrating {} -> {}", record.id, target);
    if options.preview {
        summary.moved += 1;
        return Ok(());
    }

    store.set(&target, record).await?;
    summary.moved += 1;

    if options.delete_source {
        store.delete(&record.id).await?;
        summary.sources_deleted += 1;
    }
    Ok(())
}

/// Connect with application default credentials and run the migration
pub async fn run(opts: MigrateOpts) -> Result<()> {
    let options = RunOptions::from(opts);

    let project_id = config::resolve_project_id(options.project_id.as_deref(), None)?;
    let store = FirestoreMembershipStore::new(&project_id)
        .await
        .context("Failed to initialize Firestore. Make sure GOOGLE_APPLICATION_CREDENTIALS is set.")?
        .with_collection(options.collection.as_str());

    let mut summary = MigrationSummary::default();
    let result = migrate_memberships(&store, &options, &mut summary).await;
    println!("{}", summary);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, value: serde_json::Value) -> MembershipRecord {
        MembershipRecord::new(id, value.as_object().cloned().unwrap())
    }

    #[test]
    fn test_plan_uses_legacy_names() {
        assert_eq!(
            plan_target(&record("old", json!({"community_id": "c1", "userId": "u1"}))),
            Plan::Move {
                target: "c1_u1".to_string()
            }
        );
        assert_eq!(
            plan_target(&record("c1_u1", json!({"cid": "c1", "uid": "u1"}))),
            Plan::AlreadyCanonical
        );
        assert_eq!(
            plan_target(&record("old", json!({"cid": "c1"}))),
            Plan::MissingReference
        );
        assert_eq!(
            plan_target(&record("old", json!({"uid": "u1"}))),
            Plan::MissingReference
        );
    }

    #[test]
    fn test_numeric_references_are_joined_as_text() {
        assert_eq!(
            plan_target(&record("old", json!({"cid": 7, "uid": "u1"}))),
            Plan::Move {
                target: "7_u1".to_string()
            }
        );
        assert_eq!(
            plan_target(&record("old", json!({"cid": 1.0, "uid": "u1"}))),
            Plan::Move {
                target: "1_u1".to_string()
            }
        );
    }

    #[test]
    fn test_options_from_flags() {
        let opts =
            MigrateOpts::try_parse_from(["migrate-memberships", "--deleteOld", "--overwrite"]).unwrap();
        let options = RunOptions::from(opts);

        assert!(options.delete_source);
        assert!(options.allow_overwrite);
        assert!(!options.preview);
        assert_eq!(options.community_filter, None);
    }
}

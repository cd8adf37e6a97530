//! Orphan membership cleanup
//!
//! Lists every Firebase Auth user, scans the memberships collection and
//! deletes the documents whose user reference is missing or points at a user
//! that no longer exists.
//!
//! The user snapshot and the membership scan are taken at different moments.
//! A user created after the snapshot but referenced by a membership before
//! the delete is not protected, so run this while sign-ups are quiet.

use crate::config::{self, RunOptions};
use crate::identity::list_all_user_ids;
use anyhow::{Context, Result};
use clap::Parser;
use membership_store::auth::TokenSource;
use membership_store::fields::{reference_string, MEMBER_USER};
use membership_store::{
    FirestoreMembershipStore, IdentityDirectory, IdentityToolkitDirectory, MembershipRecord,
    MembershipStore, MEMBERSHIPS_COLLECTION,
};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Orphan cleanup options
#[derive(Debug, Clone, Parser)]
pub struct CleanupOpts {
    /// Service account key file (falls back to GOOGLE_APPLICATION_CREDENTIALS)
    #[arg(long = "serviceAccount", value_name = "PATH")]
    pub service_account: Option<PathBuf>,

    /// Only scan memberships whose `cid` equals this id
    #[arg(long = "communityId", value_name = "ID")]
    pub community_id: Option<String>,

    /// Google Cloud project (defaults to the key's project_id)
    #[arg(long = "projectId", value_name = "ID")]
    pub project_id: Option<String>,

    /// Membership collection
    #[arg(long, value_name = "NAME", default_value = MEMBERSHIPS_COLLECTION)]
    pub collection: String,

    /// Report orphans without deleting them
    #[arg(long = "dryRun")]
    pub dry_run: bool,

    /// Keep deleting after a failed delete and report the failures at the end
    #[arg(long = "continueOnError")]
    pub continue_on_error: bool,
}

impl From<CleanupOpts> for RunOptions {
    fn from(opts: CleanupOpts) -> Self {
        Self {
            service_account_path: opts.service_account,
            community_filter: opts.community_id,
            project_id: opts.project_id,
            collection: opts.collection,
            preview: opts.dry_run,
            continue_on_error: opts.continue_on_error,
            ..Default::default()
        }
    }
}

/// Why a membership was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanReason {
    /// No user field under any accepted name
    MissingReference,
    /// User field present but the user does not exist
    DanglingReference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub id: String,
    pub user_ref: Option<String>,
    pub reason: OrphanReason,
}

impl fmt::Display for Orphan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.user_ref.as_deref().unwrap_or("null"))
    }
}

/// Tallies of one cleanup run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub scanned: usize,
    pub orphans: Vec<Orphan>,
    pub deleted: usize,
    pub failed: usize,
}

impl fmt::Display for CleanupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Done. scanned={} orphans={} deleted={}",
            self.scanned,
            self.orphans.len(),
            self.deleted
        )?;
        if self.failed > 0 {
            write!(f, " failed={}", self.failed)?;
        }
        Ok(())
    }
}

/// Flag every record without a valid user reference.
///
/// User ids are strings, so only a string reference can match one; a
/// numeric or boolean `uid` is always dangling.
pub fn classify(records: &[MembershipRecord], user_ids: &HashSet<String>) -> Vec<Orphan> {
    records
        .iter()
        .filter_map(|record| match MEMBER_USER.find(&record.fields) {
            None => Some(Orphan {
                id: record.id.clone(),
                user_ref: None,
                reason: OrphanReason::MissingReference,
            }),
            Some(Value::String(uid)) if user_ids.contains(uid) => None,
            Some(value) => Some(Orphan {
                id: record.id.clone(),
                user_ref: Some(reference_string(value)),
                reason: OrphanReason::DanglingReference,
            }),
        })
        .collect()
}

/// Find orphan memberships and, unless previewing, delete them one by one.
///
/// The orphan list is always reported before anything is deleted. Deletes
/// stop at the first failure unless `continue_on_error` is set; `summary`
/// holds the counts reached either way.
pub async fn cleanup_orphans(
    store: &dyn MembershipStore,
    directory: &dyn IdentityDirectory,
    options: &RunOptions,
    summary: &mut CleanupSummary,
) -> Result<()> {
    if !options.preview {
        warn!("Users created after the auth snapshot are not protected from deletion");
    }

    info!("Fetching auth users...");
    let user_ids = list_all_user_ids(directory)
        .await
        .context("failed to list auth users")?;
    info!("Auth users count: {}", user_ids.len());

    if let Some(cid) = &options.community_filter {
        info!("Filtering by communityId = {}", cid);
    }
    info!("Fetching memberships...");
    let records = store
        .scan(options.community_filter.as_deref())
        .await
        .context("failed to fetch memberships")?;
    info!("Membership docs found: {}", records.len());

    summary.scanned = records.len();
    summary.orphans = classify(&records, &user_ids);

    info!("Orphans detected: {}", summary.orphans.len());
    for orphan in &summary.orphans {
        info!(" - {}", orphan);
    }

    if summary.orphans.is_empty() {
        return Ok(());
    }
    if options.preview {
        info!("Dry run, exiting without deletions.");
        return Ok(());
    }

    info!("Deleting orphan memberships...");
    for orphan in &summary.orphans {
        match store.delete(&orphan.id).await {
            Ok(()) => summary.deleted += 1,
            Err(e) if options.continue_on_error => {
                warn!("Failed to delete {}: {:#}", orphan.id, e);
                summary.failed += 1;
            }
            Err(e) => {
                error!(
                    "Delete of {} failed after {} successful deletions",
                    orphan.id, summary.deleted
                );
                return Err(e.context(format!("failed to delete membership {}", orphan.id)));
            }
        }
    }
    info!("Deleted: {}", summary.deleted);

    if summary.failed > 0 {
        return Err(anyhow::anyhow!("{} orphan deletions failed", summary.failed));
    }
    Ok(())
}

/// Resolve credentials, connect, and run the cleanup
pub async fn run(opts: CleanupOpts) -> Result<()> {
    let options = RunOptions::from(opts);

    let key = config::resolve_service_account(options.service_account_path.as_deref())?;
    let project_id = config::resolve_project_id(options.project_id.as_deref(), Some(&key))?;

    let store = FirestoreMembershipStore::with_key_file(&project_id, &key.path)
        .await?
        .with_collection(options.collection.as_str());
    let directory = IdentityToolkitDirectory::new(&project_id, TokenSource::ServiceAccount(key));

    let mut summary = CleanupSummary::default();
    let result = cleanup_orphans(&store, &directory, &options, &mut summary).await;
    println!("{}", summary);
    result
}

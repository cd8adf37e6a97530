//! Maintenance jobs for the Firestore memberships collection
//!
//! - `cleanup`: delete memberships whose user no longer exists in Firebase Auth
//! - `migrate`: move memberships to deterministic `{communityId}_{userId}` ids
//!
//! Both jobs are one-shot, sequential and meant to be run by hand, with
//! `--dryRun` first.

pub mod cleanup;
pub mod config;
pub mod identity;
pub mod migrate;

pub use cleanup::{cleanup_orphans, CleanupOpts, CleanupSummary, Orphan, OrphanReason};
pub use config::{ConfigError, RunOptions};
pub use identity::list_all_user_ids;
pub use migrate::{migrate_memberships, MigrateOpts, MigrationSummary};

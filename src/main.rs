//! Membership maintenance cli
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

use membership_admin::*;

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;

/// Cli
#[derive(Debug, Parser)]
#[command(
    name = "membership-admin",
    about = "Maintenance jobs for the memberships collection.",
    long_about = "Maintenance jobs for the memberships collection.\n\n\
        Run every job with --dryRun first. The orphan cleanup compares a snapshot of \
        Firebase Auth users with a later scan of memberships; users created in between \
        are not protected.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Commands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Delete memberships whose user no longer exists in Firebase Auth
    CleanupOrphans(CleanupOpts),
    /// Move memberships to `{communityId}_{userId}` document ids
    MigrateMemberships(MigrateOpts),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Cli::parse();
    let system = actix_rt::System::new();
    let (result, config_exit) = match args.command {
        Commands::CleanupOrphans(opts) => (system.block_on(cleanup::run(opts)), EXIT_CONFIG),
        // Exit code 2 is reserved for the cleanup credential checks.
        Commands::MigrateMemberships(opts) => (system.block_on(migrate::run(opts)), EXIT_FAILURE),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.downcast_ref::<ConfigError>().is_some() => {
            eprintln!("{}", e);
            ExitCode::from(config_exit)
        }
        Err(e) => {
            error!("Error: {:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

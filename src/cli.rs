use clap::{Args, Parser, Subcommand};

use crate::types::{EditionMatchPolicy, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "shelfsync",
    about = "Sync Audiobookshelf listening progress to Hardcover"
)]
pub struct Cli {
    /// Path to the users file with tokens and per-user preferences
    #[arg(
        long,
        env = "SHELFSYNC_USERS_FILE",
        default_value = "~/.shelfsync/users.json",
        global = true
    )]
    pub users_file: String,

    /// Directory for caches and sync state
    #[arg(
        long,
        env = "SHELFSYNC_DATA_DIR",
        default_value = "~/.shelfsync",
        global = true
    )]
    pub data_dir: String,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Options for the default `sync` command.
    #[command(flatten)]
    pub sync: SyncArgs,
}

impl Cli {
    /// The command to run; a bare `shelfsync` invocation means `sync`.
    pub fn effective_command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Sync(self.sync.clone()))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a sync for all configured users (the default)
    Sync(SyncArgs),
    /// Show sync state and cache statistics
    Status(StatusArgs),
    /// Delete the persisted lookup caches
    ClearCache(ClearCacheArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Only sync the user(s) with these ids
    #[arg(long = "user")]
    pub users: Vec<String>,

    /// Compute and log decisions without writing to Hardcover
    #[arg(long)]
    pub dry_run: bool,

    /// Run continuously, waiting N seconds between runs
    #[arg(long)]
    pub watch: Option<u64>,

    /// Ignore the incremental state and re-examine every book
    #[arg(long)]
    pub full: bool,

    /// Number of books processed between rate-limit pauses
    #[arg(long, default_value_t = 25)]
    pub batch_size: usize,

    /// Pause between batches, in seconds
    #[arg(long, default_value_t = 2)]
    pub batch_pause: u64,

    /// Behavior when a matched book has no audiobook edition
    #[arg(long, value_enum, default_value = "skip")]
    pub edition_match: EditionMatchPolicy,

    /// Write unmatched/ambiguous books to this JSON file at end of run
    #[arg(long)]
    pub mismatch_export: Option<String>,

    /// Maximum retries for transient API failures
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Base delay between retries, in seconds
    #[arg(long, default_value_t = 2)]
    pub retry_delay: u64,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Only show the user with this id
    #[arg(long)]
    pub user: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ClearCacheArgs {
    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_invocation_defaults_to_sync() {
        let cli = Cli::try_parse_from(["shelfsync"]).unwrap();
        match cli.effective_command() {
            Command::Sync(args) => {
                assert!(!args.dry_run);
                assert_eq!(args.batch_size, 25);
                assert_eq!(args.edition_match, EditionMatchPolicy::Skip);
            }
            other => panic!("expected sync, got {:?}", other),
        }
    }

    #[test]
    fn test_sync_flags() {
        let cli = Cli::try_parse_from([
            "shelfsync",
            "sync",
            "--dry-run",
            "--user",
            "alice",
            "--user",
            "bob",
            "--batch-size",
            "10",
            "--edition-match",
            "continue",
        ])
        .unwrap();
        match cli.effective_command() {
            Command::Sync(args) => {
                assert!(args.dry_run);
                assert_eq!(args.users, vec!["alice", "bob"]);
                assert_eq!(args.batch_size, 10);
                assert_eq!(args.edition_match, EditionMatchPolicy::Continue);
            }
            other => panic!("expected sync, got {:?}", other),
        }
    }

    #[test]
    fn test_clear_cache_subcommand() {
        let cli = Cli::try_parse_from(["shelfsync", "clear-cache", "-y"]).unwrap();
        match cli.effective_command() {
            Command::ClearCache(args) => assert!(args.yes),
            other => panic!("expected clear-cache, got {:?}", other),
        }
    }
}

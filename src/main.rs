//! shelfsync: keep Hardcover reading statuses in step with Audiobookshelf
//! listening progress.
//!
//! Each configured user gets an independent, cancellable sync task. Within
//! a run, books are matched onto Hardcover editions (ASIN → ISBN → text
//! search), reconciled through a finished/reading/DNF state machine, and
//! written only when the position actually moved. Lookup caches and an
//! incremental state file keep repeat runs cheap.

#![warn(clippy::all)]

mod audiobookshelf;
mod cache;
mod cli;
mod config;
mod hardcover;
mod retry;
mod shutdown;
mod state;
mod sync;
mod types;
mod users;

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use audiobookshelf::AbsClient;
use cli::{ClearCacheArgs, Command, StatusArgs};
use config::Config;
use hardcover::HardcoverClient;
use state::SyncTracker;
use sync::{
    run_user_sync, MismatchCollector, RunnerConfig, SyncCaches, SyncContext, SyncManager,
    SyncPhase,
};
use users::SyncUser;

/// Run the status command: print state and cache summaries per user.
fn run_status(users_file: &Path, data_dir: &Path, args: StatusArgs) -> anyhow::Result<()> {
    let filter: Vec<String> = args.user.into_iter().collect();
    let users = users::load_users(users_file, &filter)?;

    for user in &users {
        let user_dir = config::user_data_dir(data_dir, &user.id);
        println!("User: {}", user.id);

        let state_path = user_dir.join("state.json");
        if state_path.exists() {
            let tracker = SyncTracker::open_or_default(&state_path);
            println!("  Books tracked:  {}", tracker.book_count());
            match tracker.last_sync() {
                Some(t) => println!("  Last sync:      {}", t.format("%Y-%m-%d %H:%M:%S UTC")),
                None => println!("  Last sync:      never"),
            }
            if let Some(t) = tracker.last_full_sync() {
                println!("  Last full sync: {}", t.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        } else {
            println!("  No sync state yet (run a sync first)");
        }

        let caches = SyncCaches::open(&user_dir);
        caches.load_all();
        println!(
            "  Caches:         identity={} edition={} user_book={}",
            caches.identity.len(),
            caches.edition.len(),
            caches.user_book.len()
        );
        println!();
    }
    Ok(())
}

/// Run the clear-cache command: delete every user's cache files.
fn run_clear_cache(
    users_file: &Path,
    data_dir: &Path,
    args: ClearCacheArgs,
) -> anyhow::Result<()> {
    let users = users::load_users(users_file, &[])?;
    let cache_dirs: Vec<PathBuf> = users
        .iter()
        .map(|u| config::user_data_dir(data_dir, &u.id).join("cache"))
        .filter(|p| p.exists())
        .collect();

    if cache_dirs.is_empty() {
        println!("No caches to clear.");
        return Ok(());
    }

    if !args.yes {
        println!("This will delete the lookup caches at:");
        for dir in &cache_dirs {
            println!("  {}", dir.display());
        }
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    for dir in &cache_dirs {
        std::fs::remove_dir_all(dir)?;
    }
    println!("Caches cleared.");
    Ok(())
}

/// `mismatches.json` + user `alice` → `mismatches-alice.json`.
fn mismatch_export_path(base: &Path, user_id: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("mismatches");
    let ext = base.extension().and_then(|s| s.to_str()).unwrap_or("json");
    base.with_file_name(format!("{stem}-{user_id}.{ext}"))
}

/// One sync pass for every configured user, each as its own task.
async fn run_all_users(
    manager: &SyncManager,
    users: &[SyncUser],
    config: &Config,
) -> anyhow::Result<()> {
    let mut handles = Vec::new();
    for user in users {
        let user = user.clone();
        let user_id = user.id.clone();
        let config = config.clone();
        let sink = manager.progress_sink(&user_id);
        let handle = manager.start_sync(&user_id, move |token| async move {
            let user_dir = config.user_data_dir(&user.id);
            let source = AbsClient::new(&user.abs_url, &user.abs_token, config.retry.clone());
            let target = HardcoverClient::new(&user.hardcover_token, config.retry.clone());
            let caches = SyncCaches::open(&user_dir);
            let tracker = SyncTracker::open_or_default(user_dir.join("state.json"));
            let mismatches = MismatchCollector::new();

            let ctx = SyncContext {
                user: &user,
                source: &source,
                target: &target,
                caches: &caches,
                tracker: &tracker,
                mismatches: &mismatches,
                progress: &sink,
            };
            let runner_config = RunnerConfig {
                batch_size: config.batch_size,
                batch_pause: config.batch_pause,
                edition_match: config.edition_match,
                dry_run: config.dry_run,
                full: config.full,
            };
            let summary = run_user_sync(&ctx, &runner_config, token).await?;

            let unmatched = mismatches.export();
            if !unmatched.is_empty() {
                println!("Unmatched books for {}:", user.id);
                for m in &unmatched {
                    println!("  {} by {} ({})", m.title, m.author, m.reason);
                }
            }
            if let Some(base) = &config.mismatch_export {
                let path = mismatch_export_path(base, &user.id);
                match mismatches.export_to_file(&path) {
                    Ok(()) => tracing::info!(path = %path.display(), "Mismatches exported"),
                    Err(e) => tracing::warn!("Failed to export mismatches: {}", e),
                }
            }
            Ok(summary)
        })?;
        handles.push(handle);
    }

    futures_util::future::join_all(handles).await;
    Ok(())
}

async fn run_sync(config: Config) -> anyhow::Result<()> {
    let users = users::load_users(&config.users_file, &config.user_filter)?;
    tracing::info!(
        users = users.len(),
        dry_run = config.dry_run,
        "Starting shelfsync"
    );

    let shutdown_token = shutdown::install_signal_handler();
    let manager = SyncManager::new();

    // Process shutdown cancels every per-user run.
    {
        let manager = manager.clone();
        let token = shutdown_token.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            manager.cancel_all();
        });
    }

    loop {
        run_all_users(&manager, &users, &config).await?;

        let failed: Vec<&SyncUser> = users
            .iter()
            .filter(|u| {
                manager
                    .status(&u.id)
                    .is_some_and(|s| s.phase == SyncPhase::Error)
            })
            .collect();
        for user in &failed {
            let detail = manager
                .status(&user.id)
                .and_then(|s| s.detail)
                .unwrap_or_default();
            tracing::error!(user = %user.id, "Sync ended in error: {}", detail);
        }

        let Some(interval) = config.watch else {
            if !failed.is_empty() {
                anyhow::bail!("{} user sync(s) failed", failed.len());
            }
            return Ok(());
        };

        if shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested, exiting...");
            return Ok(());
        }
        tracing::info!("Waiting {} seconds until the next run...", interval);
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(interval)) => {}
            _ = shutdown_token.cancelled() => {
                tracing::info!("Shutdown during wait, exiting...");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let users_file = config::expand_tilde(&cli.users_file);
    let data_dir = config::expand_tilde(&cli.data_dir);

    match cli.effective_command() {
        Command::Status(args) => run_status(&users_file, &data_dir, args),
        Command::ClearCache(args) => run_clear_cache(&users_file, &data_dir, args),
        Command::Sync(args) => {
            let config = Config::from_cli(args, &cli.users_file, &cli.data_dir);
            run_sync(config).await
        }
    }
}

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::config;
use crate::error::describe;
use crate::providers;
use crate::sync::cursor::{CursorStore, FileCursorStore};
use crate::sync::report::SyncReport;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Sync { config: Option<PathBuf> },
    Status { config: Option<PathBuf> },
    Help,
}

/// Parse CLI args (without the program name).
///
/// Supported forms:
///   rmt sync [-c <path>]
///   rmt status [--config <path>]
///   rmt help
pub fn parse_args(args: &[String]) -> Result<Command> {
    let Some(verb) = args.first() else {
        return Ok(Command::Help);
    };

    let mut config = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                i += 1;
                match args.get(i) {
                    Some(path) => config = Some(PathBuf::from(path)),
                    None => bail!("Missing value for -c/--config flag"),
                }
            }
            other => bail!("Unexpected argument: {other}"),
        }
        i += 1;
    }

    match verb.as_str() {
        "sync" => Ok(Command::Sync { config }),
        "status" => Ok(Command::Status { config }),
        "help" | "-h" | "--help" => Ok(Command::Help),
        other => bail!("Unknown command: {other}\n\nRun `rmt help` for usage."),
    }
}

pub async fn handle_sync(config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let config = config::load_config(&path)?;
    let jobs = providers::create_jobs(&config);

    if jobs.is_empty() {
        bail!("No [[sync]] entries in {}", path.display());
    }

    let store = FileCursorStore::new(config.cursor_path());
    let report = crate::sync::run(&jobs, &store, config.sync_options()).await?;
    print_report(&report);

    if !report.is_success() {
        bail!("{} record(s) failed to sync", report.failures.len());
    }
    Ok(())
}

pub fn handle_status(config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let config = config::load_config(&path)?;
    let store = FileCursorStore::new(config.cursor_path());

    match store.load()? {
        Some(state) => {
            println!("Last sync: {} ({})", state.last_sync, store.path().display());
            for (list, ids) in &state.retry {
                for (id, cursor) in ids {
                    println!("  retrying #{id} on list {list} from {cursor}");
                }
            }
        }
        None => println!("No cursor at {} (next sync bootstraps)", store.path().display()),
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    if report.bootstrapped {
        println!("First run: cursor set to {}. Nothing was synced; the next run picks up changes from here.", report.since);
        return;
    }

    println!("Changes since {}", report.since);
    for summary in &report.destinations {
        println!(
            "  list {}: {} created, {} updated, {} comment(s)",
            summary.destination, summary.created, summary.matched, summary.comments_added
        );
    }
    if report.destinations.is_empty() {
        println!("  nothing to sync");
    } else {
        println!(
            "Total: {} created, {} updated, {} comment(s)",
            report.created(),
            report.matched(),
            report.comments_added()
        );
    }
    for failure in &report.failures {
        println!(
            "  FAILED #{} on list {}: {}",
            failure.remote_id,
            failure.destination,
            describe(&failure.error)
        );
    }
    if report.unlabelled() > 0 {
        println!("  {} card(s) created without their color label", report.unlabelled());
    }
    for malformed in &report.malformed {
        println!("  skipped {malformed}");
    }
    match report.cursor_advanced {
        Some(cursor) => println!("Cursor advanced to {cursor}"),
        None => println!("Cursor left at {}", report.since),
    }
    if report.retrying > 0 {
        println!("{} failed record(s) will be retried next run", report.retrying);
    }
}

pub fn print_help() {
    println!("rmt: sync Redmine issues to Trello cards\n");
    println!("USAGE:");
    println!("  rmt sync      Sync issues changed since the last run");
    println!("  rmt status    Show the stored sync cursor");
    println!();
    println!("OPTIONS:");
    println!("  -c, --config <path>  Config file (default ~/.rmt/config.toml)");
    println!();
    println!("The first sync only records a starting point; later runs copy changes.");
}

//! CLI for the slotdb activity slot store.
//!
//! Provides commands for inspecting stores, reading slots, and feeding
//! activity pulses by hand.

use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use slotdb::{Store, StoreOptions};

/// slotdb: embedded activity slot store CLI.
#[derive(Parser)]
#[command(name = "slotdb", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Display store metadata, targets, projects, and disk usage.
    Info {
        /// Path to the store directory.
        store_path: PathBuf,
    },

    /// List every target that has slots.
    Targets {
        /// Path to the store directory.
        store_path: PathBuf,
    },

    /// Read the slots of a target.
    Slots {
        /// Path to the store directory.
        store_path: PathBuf,

        /// Target name.
        target: String,

        /// How far back to read (e.g., "1h", "30m", "7d"); "all" reads everything.
        #[arg(long, default_value = "all")]
        range: String,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Show open sessions.
    Actions {
        /// Path to the store directory.
        store_path: PathBuf,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Send an activity pulse for a target.
    Pulse {
        /// Path to the store directory.
        store_path: PathBuf,

        /// Target name.
        target: String,

        /// Send an inactive pulse instead of an active one.
        #[arg(long)]
        inactive: bool,

        /// Pulse timestamp in unix seconds (defaults to now).
        #[arg(long)]
        at: Option<u32>,

        /// Session expiry gap in seconds.
        #[arg(long)]
        expiry: Option<u32>,
    },

    /// Close sessions that have been idle longer than the expiry gap.
    Expire {
        /// Path to the store directory.
        store_path: PathBuf,

        /// Sweep time in unix seconds (defaults to now).
        #[arg(long)]
        now: Option<u32>,

        /// Session expiry gap in seconds.
        #[arg(long)]
        expiry: Option<u32>,
    },

    /// Truncate slot buckets left inconsistent by an interrupted write.
    Repair {
        /// Path to the store directory.
        store_path: PathBuf,
    },

    /// Create a project, or list projects and their targets.
    Project {
        /// Path to the store directory.
        store_path: PathBuf,

        /// Project path to create; lists all projects when omitted.
        project: Option<String>,
    },
}

/// Output format for slot and session listings.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON document.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { store_path } => cmd_info(&store_path),
        Commands::Targets { store_path } => cmd_targets(&store_path),
        Commands::Slots {
            store_path,
            target,
            range,
            format,
        } => cmd_slots(&store_path, &target, &range, &format),
        Commands::Actions { store_path, format } => cmd_actions(&store_path, &format),
        Commands::Pulse {
            store_path,
            target,
            inactive,
            at,
            expiry,
        } => cmd_pulse(&store_path, &target, !inactive, at, expiry),
        Commands::Expire {
            store_path,
            now,
            expiry,
        } => cmd_expire(&store_path, now, expiry),
        Commands::Repair { store_path } => cmd_repair(&store_path),
        Commands::Project {
            store_path,
            project,
        } => cmd_project(&store_path, project.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Opens an existing store; read-only commands never create one.
fn open_existing(store_path: &Path) -> Result<Store, Box<dyn std::error::Error>> {
    if !store_path.join("meta.json").exists() {
        return Err(format!("No store found at '{}'", store_path.display()).into());
    }
    Ok(Store::open(store_path)?)
}

/// Opens or creates a store, overriding the session expiry if given.
fn open_with_expiry(store_path: &Path, expiry: Option<u32>) -> Result<Store, Box<dyn std::error::Error>> {
    let mut options = StoreOptions::default();
    if let Some(expiry) = expiry {
        options.session_expiry_secs = expiry;
    }
    Ok(Store::open_with(store_path, options)?)
}

/// Implements `slotdb info <store_path>`.
fn cmd_info(store_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(store_path)?;

    println!("Store: {}", store_path.display());
    println!();
    println!("  Version: {}", store.version());
    println!("  Tag: {}", store.tag().unwrap_or("-"));
    match store.created_at() {
        Ok(created) => println!("  Created: {}", format_timestamp(created)),
        Err(_) => println!("  Created: -"),
    }
    println!("  Host: {}", store.host().unwrap_or("-"));
    println!("  User: {}", store.username().unwrap_or("-"));
    println!(
        "  Platform: {}/{}",
        store.os().unwrap_or("-"),
        store.arch().unwrap_or("-")
    );
    println!();

    let targets = store.get_targets();
    println!("Targets: {}", targets.len());
    println!("Open sessions: {}", store.get_actions()?.len());

    let projects = store.list_projects();
    if !projects.is_empty() {
        println!();
        println!("Projects: {}", projects.len());
        for project in &projects {
            let members = store.project_targets(project)?.len();
            println!("  - {project} ({members} targets)");
        }
    }

    let total_size = dir_size(&store_path.join("slots"))?;
    println!();
    println!("Slot storage: {} ({total_size} bytes)", format_bytes(total_size));

    Ok(())
}

/// Implements `slotdb targets <store_path>`.
fn cmd_targets(store_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(store_path)?;
    for target in store.get_targets() {
        println!("{target}");
    }
    Ok(())
}

/// Implements `slotdb slots <store_path> <target>`.
fn cmd_slots(
    store_path: &Path,
    target: &str,
    range: &str,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(store_path)?;

    let start = if range == "all" {
        0
    } else {
        now_secs().saturating_sub(parse_duration(range)?).max(1)
    };
    let buckets = store.bucket_slots(target, start, 0)?;
    let count: usize = buckets.iter().map(|b| b.slots.len()).sum();
    let total: u64 = buckets
        .iter()
        .flat_map(|b| &b.slots)
        .map(|slot| u64::from(slot.duration))
        .sum();

    match format {
        OutputFormat::Csv => {
            println!("# target={target}, buckets={}, slots={count}, seconds={total}", buckets.len());
            println!("bucket,start,duration");
            for bucket in &buckets {
                for slot in &bucket.slots {
                    println!("{},{},{}", bucket.bucket, slot.start, slot.duration);
                }
            }
        }
        OutputFormat::Json => {
            let json_buckets: Vec<serde_json::Value> = buckets
                .iter()
                .map(|b| {
                    serde_json::json!({
                        "bucket": b.bucket.raw(),
                        "starts": b.slots.iter().map(|s| s.start).collect::<Vec<_>>(),
                        "durations": b.slots.iter().map(|s| s.duration).collect::<Vec<_>>(),
                    })
                })
                .collect();

            let output = serde_json::json!({
                "target": target,
                "count": count,
                "seconds": total,
                "buckets": json_buckets,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `slotdb actions <store_path>`.
fn cmd_actions(store_path: &Path, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(store_path)?;
    let open = store.get_actions()?;

    match format {
        OutputFormat::Csv => {
            println!("target,start,last");
            for ((target, start), last) in open.targets.iter().zip(&open.starts).zip(&open.lasts) {
                println!("{target},{start},{last}");
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "targets": open.targets,
                "starts": open.starts,
                "lasts": open.lasts,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `slotdb pulse <store_path> <target>`.
fn cmd_pulse(
    store_path: &Path,
    target: &str,
    active: bool,
    at: Option<u32>,
    expiry: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_with_expiry(store_path, expiry)?;
    let ts = at.unwrap_or_else(now_secs);
    store.add_action(target, active, ts)?;

    let state = if active { "active" } else { "inactive" };
    println!("{state} pulse for {target} at {}", format_timestamp(ts));
    Ok(())
}

/// Implements `slotdb expire <store_path>`.
fn cmd_expire(store_path: &Path, now: Option<u32>, expiry: Option<u32>) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_with_expiry(store_path, expiry)?;
    let before = store.get_actions()?.len();
    let closed = match now {
        Some(now) => store.check_expirations(now)?,
        None => store.check_expirations_now()?,
    };
    let after = store.get_actions()?.len();

    if closed {
        println!("Closed {} session(s), {after} still open", before.saturating_sub(after));
    } else {
        println!("Nothing to expire, {after} session(s) open");
    }
    Ok(())
}

/// Implements `slotdb repair <store_path>`.
fn cmd_repair(store_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(store_path)?;
    let repaired = store.repair()?;
    println!("Repaired {repaired} bucket(s)");
    Ok(())
}

/// Implements `slotdb project <store_path> [project]`.
fn cmd_project(store_path: &Path, project: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(store_path)?;

    if let Some(project) = project {
        store.create_project(project)?;
        let members = store.project_targets(project)?;
        println!("Project {project}: {} target(s)", members.len());
        return Ok(());
    }

    for project in store.list_projects() {
        println!("{project}");
        for target in store.project_targets(&project)? {
            println!("  {target}");
        }
    }
    Ok(())
}

/// Current unix time in seconds.
fn now_secs() -> u32 {
    u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX)
}

/// Formats unix seconds as local time.
fn format_timestamp(ts: u32) -> String {
    Local
        .timestamp_opt(i64::from(ts), 0)
        .single()
        .map_or_else(|| ts.to_string(), |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Parses a human-readable duration string (e.g., "1h", "30m", "7d") to seconds.
fn parse_duration(s: &str) -> Result<u32, Box<dyn std::error::Error>> {
    let s = s.trim();
    let Some((unit_at, _)) = s.char_indices().last() else {
        return Err("Empty duration string".into());
    };
    let (num_str, unit) = s.split_at(unit_at);
    let num: u32 = num_str.parse()?;

    let secs = match unit {
        "s" => Some(num),
        "m" => num.checked_mul(60),
        "h" => num.checked_mul(3600),
        "d" => num.checked_mul(86400),
        _ => return Err(format!("Unknown duration unit: '{unit}'. Use s, m, h, or d.").into()),
    };

    secs.ok_or_else(|| format!("Duration '{s}' is too large").into())
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

/// Recursively calculates directory size.
fn dir_size(path: &Path) -> Result<u64, Box<dyn std::error::Error>> {
    let mut total = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path)?;
            } else {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}

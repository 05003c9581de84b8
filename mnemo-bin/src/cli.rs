use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use mnemo_config::{ConfigLoader, LoggingConfig, MnemoConfig};
use mnemo_core::Requester;
use mnemo_memory::{Category, MemoryEngine, RecallQuery, Standing};

/// Mnemo: long-lived semantic memory for conversational agents
#[derive(Parser)]
#[command(name = "mnemo", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to mnemo.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show totals, categories and the most recalled memories
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a semantic query against the store
    Recall {
        /// Query text
        query: String,
        /// Recall as this owner (global memories only if omitted)
        #[arg(short, long)]
        owner: Option<String>,
        /// Maximum results (defaults to memory.recall_limit)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Access level of the requester (owner and family see health and relationship memories)
        #[arg(long, default_value = "owner")]
        access_level: String,
        /// Only memories of this category (fact, preference, event, ...)
        #[arg(long, value_parser = parse_category)]
        category: Option<Category>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Find near-duplicate memories (dry run unless --apply)
    Dedup {
        /// Delete the weaker memory of each pair
        #[arg(long)]
        apply: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete memories by id
    Forget {
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
    /// Delete every memory whose expiry has passed
    Sweep,
    /// Wipe every memory and the stored embedding dimension
    Reset {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let loader = ConfigLoader::load(self.config.as_deref())?;
        let config = loader.get();

        // --verbose > --quiet > --log-level > config
        let level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_tracing(&config.logging, level);

        match self.command {
            Commands::Stats { json } => cmd_stats(&config, json),
            Commands::Recall {
                query,
                owner,
                limit,
                access_level,
                category,
                json,
            } => {
                let requester = match owner {
                    Some(id) => Requester::user(id),
                    None => Requester::anonymous(),
                }
                .with_access_level(access_level);
                cmd_recall(&config, query, requester, limit, category, json).await
            }
            Commands::Dedup { apply, json } => cmd_dedup(&config, apply, json),
            Commands::Forget { ids } => cmd_forget(&config, &ids),
            Commands::Sweep => cmd_sweep(&config),
            Commands::Reset { yes } => cmd_reset(&config, yes),
        }
    }
}

fn init_tracing(logging: &LoggingConfig, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    match logging.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

/// Strict category parsing for flags; unknown names are an error.
fn parse_category(s: &str) -> Result<Category, String> {
    let name = s.trim().to_lowercase();
    Category::ALL
        .into_iter()
        .find(|c| c.as_str() == name)
        .ok_or_else(|| {
            let valid: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
            format!("unknown category '{s}', expected one of: {}", valid.join(", "))
        })
}

fn open_engine(config: &MnemoConfig) -> anyhow::Result<MemoryEngine> {
    MemoryEngine::from_config(config).with_context(|| {
        format!(
            "cannot open memory store at {}",
            config.memory.db_path.display()
        )
    })
}

fn cmd_stats(config: &MnemoConfig, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let stats = engine.stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("\x1b[1mMemory store\x1b[0m ({})", config.memory.db_path.display());
    println!("{}", "-".repeat(60));
    println!("  total:      {}", stats.total);
    println!("  permanent:  {}", stats.permanent);
    println!("  expired:    {} (not yet swept)", stats.expired);
    println!(
        "  dimension:  {}",
        stats
            .dimension
            .map(|d| d.to_string())
            .unwrap_or_else(|| "not established".into())
    );
    println!(
        "  provider:   {}",
        stats.provider.as_deref().unwrap_or("unknown")
    );
    if stats.halted {
        println!("  \x1b[31mwrites halted: embedding dimension mismatch, run `mnemo reset --yes`\x1b[0m");
    }

    if !stats.by_category.is_empty() {
        println!("\n\x1b[1mBy category\x1b[0m");
        for (category, count) in &stats.by_category {
            println!("  {category:<14} {count}");
        }
    }
    if !stats.by_source.is_empty() {
        println!("\n\x1b[1mBy source\x1b[0m");
        for (source, count) in &stats.by_source {
            println!("  {source:<14} {count}");
        }
    }
    if !stats.most_accessed.is_empty() {
        println!("\n\x1b[1mMost accessed\x1b[0m");
        for s in &stats.most_accessed {
            println!("  {:>5}x  {}  {}", s.access_count, s.id, s.content);
        }
    }
    Ok(())
}

async fn cmd_recall(
    config: &MnemoConfig,
    query: String,
    requester: Requester,
    limit: Option<usize>,
    category: Option<Category>,
    json: bool,
) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let mut q = RecallQuery::new(query, requester);
    if let Some(limit) = limit {
        q = q.with_limit(limit);
    }
    if let Some(c) = category {
        q = q.with_category(c);
    }

    let results = engine.try_recall(&q, &config.memory).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No memories matched.");
        return Ok(());
    }

    println!("\x1b[1mRecalled\x1b[0m ({} memories)", results.len());
    println!("{}", "-".repeat(80));
    for m in &results {
        let marker = match m.standing {
            Standing::Clear => String::new(),
            Standing::Authoritative => " [authoritative]".into(),
            Standing::Conflicted { with } => format!(" [conflicts with {with}]"),
        };
        println!(
            "{:.3}  {:<12} {}{}",
            m.similarity,
            m.record.category.as_str(),
            m.record.content,
            marker
        );
        println!("       id={} recall_count={}", m.record.id, m.record.recall_count);
    }
    Ok(())
}

fn cmd_forget(config: &MnemoConfig, ids: &[Uuid]) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let report = engine.forget(ids)?;
    for id in &report.deleted {
        println!("forgot {id}");
    }
    for id in &report.not_found {
        println!("not found: {id}");
    }
    Ok(())
}

fn cmd_sweep(config: &MnemoConfig) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let swept = engine.sweep_expired()?;
    println!("swept {swept} expired memories");
    Ok(())
}

fn cmd_dedup(config: &MnemoConfig, apply: bool, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let report = engine.dedup(&config.memory, apply)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if report.pairs.is_empty() {
        println!("No duplicates found.");
        return Ok(());
    }
    for p in &report.pairs {
        println!("{:.3}  keep   {}  {}", p.similarity, p.keep, p.keep_preview);
        println!("       remove {}  {}", p.remove, p.remove_preview);
    }
    if apply {
        println!("removed {} duplicate memories", report.removed.len());
    } else {
        println!(
            "{} duplicates found; re-run with --apply to delete them",
            report.pairs.len()
        );
    }
    Ok(())
}

fn cmd_reset(config: &MnemoConfig, yes: bool) -> anyhow::Result<()> {
    if !yes {
        bail!("reset deletes every memory; re-run with --yes to confirm");
    }
    let engine = open_engine(config)?;
    let before = engine.store().len();
    engine.reset()?;
    info!(deleted = before, "store reset from the command line");
    println!("reset complete, {before} memories deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_category_is_strict() {
        assert_eq!(parse_category("health"), Ok(Category::Health));
        assert_eq!(parse_category(" Preference "), Ok(Category::Preference));
        let err = parse_category("helth").unwrap_err();
        assert!(err.contains("helth"));
        assert!(err.contains("relationship"));
    }

    #[test]
    fn test_unknown_category_flag_rejected() {
        assert!(Cli::try_parse_from(["mnemo", "recall", "dogs", "--category", "helth"]).is_err());
        assert!(Cli::try_parse_from(["mnemo", "recall", "dogs", "--category", "event"]).is_ok());
    }

    #[test]
    fn test_dedup_defaults_to_dry_run() {
        let cli = Cli::try_parse_from(["mnemo", "dedup"]).unwrap();
        assert!(matches!(cli.command, Commands::Dedup { apply: false, json: false }));
        let cli = Cli::try_parse_from(["mnemo", "dedup", "--apply"]).unwrap();
        assert!(matches!(cli.command, Commands::Dedup { apply: true, .. }));
    }
}

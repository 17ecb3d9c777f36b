//! Tracehound CLI
//!
//! Probe usernames, emails and phone numbers across a platform catalog, and
//! correlate what turns up.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use hound_core::{
    Confidence, DetectionMethod, IdentifierKind, PlatformCategory, PlatformFilter,
    PlatformRegistry,
};
use hound_runtime::{BatchRequest, EngineConfig, Investigation, Orchestrator};

#[derive(Parser)]
#[command(name = "tracehound")]
#[command(author, version, about = "Tracehound: identifier probing and profile correlation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1", global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe one identifier across the catalog
    Probe {
        /// Username, email address or phone number
        identifier: String,

        #[command(flatten)]
        engine: EngineArgs,

        /// Also list platforms that gave no conclusive answer
        #[arg(long)]
        exhaustive: bool,

        /// Write the full batch report as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Probe several identifiers and correlate the profiles found
    Investigate {
        /// Identifier to include (repeatable)
        #[arg(short = 'i', long = "identifier", required = true, num_args = 1..)]
        identifiers: Vec<String>,

        #[command(flatten)]
        engine: EngineArgs,

        /// Write the full investigation report as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Write the relationship graph in Graphviz DOT format
        #[arg(long)]
        dot: Option<PathBuf>,
    },

    /// List the platform catalog
    Platforms {
        /// Platform catalog file or directory (default: embedded catalog)
        #[arg(long, env = "TRACEHOUND_CATALOG")]
        catalog: Option<PathBuf>,

        /// Only platforms accepting this identifier kind
        #[arg(short, long)]
        kind: Option<IdentifierKind>,
    },
}

/// Flags shared by every command that runs the engine
#[derive(Args, Debug, Clone)]
struct EngineArgs {
    /// Identifier kind (username, email, phone); detected when omitted
    #[arg(short, long)]
    kind: Option<IdentifierKind>,

    /// Platform catalog file or directory (default: embedded catalog)
    #[arg(long, env = "TRACEHOUND_CATALOG")]
    catalog: Option<PathBuf>,

    /// Engine config file (TOML)
    #[arg(short, long, env = "TRACEHOUND_CONFIG")]
    config: Option<PathBuf>,

    /// Only probe platforms in this category (repeatable)
    #[arg(long = "category")]
    categories: Vec<PlatformCategory>,

    /// Only probe these platforms (repeatable)
    #[arg(long = "platform")]
    platforms: Vec<String>,

    /// Skip NSFW platforms
    #[arg(long)]
    exclude_nsfw: bool,

    /// Batch timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum concurrent probes
    #[arg(long)]
    concurrency: Option<usize>,

    /// Persistent cache directory
    #[arg(long, env = "TRACEHOUND_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Always probe, never read or write the cache
    #[arg(long)]
    no_cache: bool,

    /// Proxy URL, e.g. socks5h://127.0.0.1:9050 for Tor
    #[arg(long, env = "TRACEHOUND_PROXY")]
    proxy: Option<String>,
}

impl EngineArgs {
    /// Config file (or defaults) with command-line overrides applied
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };

        if let Some(timeout) = self.timeout {
            config.orchestrator.batch_timeout_secs = timeout;
        }
        if let Some(concurrency) = self.concurrency {
            config.orchestrator.concurrency = concurrency;
        }
        if let Some(dir) = &self.cache_dir {
            config.cache.dir = Some(dir.clone());
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        if let Some(proxy) = &self.proxy {
            config.http.proxy = Some(proxy.clone());
        }

        config.validate()?;
        Ok(config)
    }

    fn filter(&self) -> PlatformFilter {
        PlatformFilter::new()
            .with_categories(self.categories.iter().copied())
            .with_names(&self.platforms)
            .exclude_nsfw(self.exclude_nsfw)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match cli.command {
        Commands::Probe {
            identifier,
            engine,
            exhaustive,
            json,
        } => {
            run_probe(&identifier, &engine, exhaustive, json).await?;
        }
        Commands::Investigate {
            identifiers,
            engine,
            json,
            dot,
        } => {
            run_investigation(identifiers, &engine, json, dot).await?;
        }
        Commands::Platforms { catalog, kind } => {
            list_platforms(catalog.as_deref(), kind)?;
        }
    }

    Ok(())
}

fn load_catalog(catalog: Option<&Path>) -> Result<PlatformRegistry> {
    let registry = match catalog {
        Some(path) if path.is_dir() => PlatformRegistry::load_from_dir(path)?,
        Some(path) => PlatformRegistry::load_from_file(path)?,
        None => PlatformRegistry::load_embedded()?,
    };
    debug!("Catalog holds {} platforms", registry.len());
    Ok(registry)
}

async fn run_probe(
    identifier: &str,
    args: &EngineArgs,
    exhaustive: bool,
    json: Option<PathBuf>,
) -> Result<()> {
    println!("🔎 Tracehound - identifier probing\n");

    let config = args.engine_config()?;
    let registry = load_catalog(args.catalog.as_deref())?;
    let engine = Orchestrator::from_config(&config, registry)?;

    let mut request = BatchRequest::new(identifier)
        .with_filter(args.filter())
        .exhaustive(exhaustive);
    if let Some(kind) = args.kind {
        request = request.with_kind(kind);
    }

    let report = engine.run(request).await;
    let counts = report.summary.counts;

    println!("🎯 Identifier: {} ({})", report.identifier, report.kind);
    println!("⏱️  Timeout: {}s\n", config.orchestrator.batch_timeout_secs);

    for result in report.results.values() {
        let marker = match (result.exists, result.confidence) {
            (true, Confidence::High) => "✅",
            (true, Confidence::Low) => "⚠️ ",
            (false, _) => "❔",
        };
        println!("{} {}", marker, result.describe());
    }
    if report.results.is_empty() {
        println!("No profiles found.");
    }

    println!(
        "\n📊 {} platforms: {} checked, {} cached, {} found, {} errored, {} timed out ({:.1}s)",
        counts.selected,
        counts.checked,
        counts.cached,
        counts.found,
        counts.errored,
        counts.timed_out,
        report.summary.duration.as_secs_f64()
    );
    if report.summary.deadline_hit {
        println!("⚠️  Batch deadline reached. Try increasing --timeout.");
    }
    if !exhaustive && !report.unresolved.is_empty() {
        println!(
            "   {} platforms gave no result; rerun with --exhaustive to list them",
            report.unresolved.len()
        );
    }

    if let Some(path) = json {
        let content = serde_json::to_string_pretty(&report)?;
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("📄 Report saved to: {}", path.display());
    }

    Ok(())
}

async fn run_investigation(
    identifiers: Vec<String>,
    args: &EngineArgs,
    json: Option<PathBuf>,
    dot: Option<PathBuf>,
) -> Result<()> {
    println!("🕵️ Tracehound - investigation of {} identifiers\n", identifiers.len());

    let config = args.engine_config()?;
    let registry = load_catalog(args.catalog.as_deref())?;
    let engine = Arc::new(Orchestrator::from_config(&config, registry)?);

    let report = Investigation::new(engine, config.analysis.clone())
        .with_kind(args.kind)
        .with_filter(args.filter())
        .run(identifiers)
        .await;

    println!("{}", report.to_text());

    if let Some(path) = json {
        fs::write(&path, report.to_json()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("📄 Report saved to: {}", path.display());
    }
    if let Some(path) = dot {
        fs::write(&path, report.graph.to_dot())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("🕸️  Graph saved to: {}", path.display());
    }

    Ok(())
}

fn list_platforms(catalog: Option<&Path>, kind: Option<IdentifierKind>) -> Result<()> {
    let registry = load_catalog(catalog)?;

    println!(
        "{:<24} {:<14} {:<22} {:<12} NSFW",
        "NAME", "CATEGORY", "KINDS", "DETECTION"
    );
    let mut listed = 0;
    for platform in registry.iter() {
        if kind.is_some_and(|k| !platform.supports(k)) {
            continue;
        }
        let kinds: Vec<&str> = platform.kinds.iter().map(|k| k.as_str()).collect();
        let detection = match platform.detection {
            DetectionMethod::StatusCode => "status_code",
            DetectionMethod::Pattern => "pattern",
        };
        println!(
            "{:<24} {:<14} {:<22} {:<12} {}",
            platform.name,
            platform.category.as_str(),
            kinds.join(","),
            detection,
            if platform.nsfw { "yes" } else { "" }
        );
        listed += 1;
    }
    println!("\n{} platforms", listed);

    Ok(())
}

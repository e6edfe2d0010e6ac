use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use ktrace::{Config, TraceStream};

/// Load per-CPU kernel traces and print them in time order.
#[derive(Parser)]
#[command(name = "ktrace", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    /// Overrides `log_level` from the config file.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a trace and print load statistics.
    Summary {
        file: PathBuf,

        /// Split switch and wake-up events into origin and target entries.
        #[arg(long)]
        coupling: bool,
    },

    /// Load a trace and print its entries in time order.
    Dump {
        file: PathBuf,

        /// Stop after this many entries.
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,

        /// Split switch and wake-up events into origin and target entries.
        #[arg(long)]
        coupling: bool,
    },

    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via RUSTFLAGS.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Version = cli.command {
        println!("ktrace {}", version::full());
        return Ok(());
    }

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?;
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Summary { file, coupling } => {
            cfg.coupling.enabled |= coupling;
            summary(&file, &cfg)
        }
        Command::Dump {
            file,
            limit,
            coupling,
        } => {
            cfg.coupling.enabled |= coupling;
            dump(&file, &cfg, limit)
        }
        Command::Version => Ok(()),
    }
}

fn open(file: &Path, cfg: &Config) -> Result<TraceStream> {
    let mut stream = TraceStream::open(file, cfg)?;
    stream
        .load()
        .with_context(|| format!("loading trace {}", file.display()))?;
    Ok(stream)
}

fn summary(file: &Path, cfg: &Config) -> Result<()> {
    let stream = open(file, cfg)?;
    let Some(s) = stream.summary() else {
        return Ok(());
    };

    println!("file:       {}", file.display());
    println!("cpus:       {}", s.cpus);
    println!("records:    {}", s.records);
    println!("entries:    {}", s.entries);
    println!("synthetic:  {}", s.synthetic);
    println!("overflow:   {} ({} records lost)", s.overflow, s.missed_records);
    println!("corrected:  {}", s.corrected);
    println!("tasks:      {}", stream.tasks().len());

    let idle: Vec<String> = stream.idle_cpus().iter().map(usize::to_string).collect();
    println!("idle cpus:  [{}]", idle.join(", "));

    let coupled: Vec<String> = stream
        .present_coupled_kinds()
        .into_iter()
        .filter_map(|id| stream.synthetic_name(id))
        .collect();
    println!("coupled:    [{}]", coupled.join(", "));

    for (kind, count) in &s.per_kind {
        println!("  {:<20} {count}", kind.as_str());
    }
    if s.unknown_kinds > 0 {
        println!("  {:<20} {}", "<unknown>", s.unknown_kinds);
    }
    println!("elapsed:    {:?}", s.elapsed);

    Ok(())
}

fn dump(file: &Path, cfg: &Config, limit: usize) -> Result<()> {
    let stream = open(file, cfg)?;

    for (i, e) in stream.entries().iter().take(limit).enumerate() {
        if !e.text_visible() {
            continue;
        }
        let name = stream
            .event_name(e)
            .unwrap_or_else(|_| format!("<event {}>", e.event_id));
        println!(
            "{i:>8} {:>16} [{:03}] {:>16}-{:<7} {:<4} {:<22} {}",
            e.timestamp,
            e.cpu,
            stream.task_name(e),
            e.pid,
            stream.latency(e),
            name,
            stream.info(e),
        );
    }

    Ok(())
}

// SPDX-License-Identifier: AGPL-3.0-or-later

//! CLI tool for Perf Observer (perfobs)
//!
//! Usage:
//!   perfobs system \[--mask N\]        - Machine-wide metrics
//!   perfobs pid <PID> \[--mask N\]     - One process by pid
//!   perfobs name <NAME> \[--mask N\]   - Every process with a name
//!   perfobs processes                - List running processes
//!   perfobs masks                    - Show metric mask bits
//!   perfobs sample-config            - Print a sample configuration

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use colored::Colorize;
#[cfg(feature = "cli")]
use std::path::PathBuf;
#[cfg(feature = "cli")]
use std::time::Duration;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "perfobs")]
#[command(about = "Perf Observer: system and per-process performance counter snapshots", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(short, long, global = true)]
    interval: Option<u64>,

    /// Number of polls, 0 to poll until Ctrl+C
    #[arg(short = 'n', long, default_value = "1", global = true)]
    count: u64,

    /// Output format (json or text)
    #[arg(short, long, global = true)]
    format: Option<String>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Poll machine-wide metrics
    System {
        /// Metric mask (see `perfobs masks`)
        #[arg(short, long)]
        mask: Option<u32>,
    },
    /// Poll one process by pid
    Pid {
        pid: u32,
        /// Metric mask (see `perfobs masks`)
        #[arg(short, long)]
        mask: Option<u32>,
    },
    /// Poll every process sharing a name (e.g. notepad.exe)
    Name {
        name: String,
        /// Metric mask (see `perfobs masks`)
        #[arg(short, long)]
        mask: Option<u32>,
    },
    /// List running processes
    Processes,
    /// Show the metric mask bits of each observer kind
    Masks,
    /// Print a sample configuration file
    SampleConfig,
}

#[cfg(feature = "cli")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use perfobs::config::OutputFormat;
    use perfobs::{Config, MetricMask, Observer, Platform};

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_toml_file(path)?,
        None => Config::default(),
    };
    if let Some(interval) = cli.interval {
        config.poll.interval_ms = interval.max(1);
    }
    if let Some(format) = &cli.format {
        config.poll.format = match format.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "text" => OutputFormat::Text,
            other => return Err(format!("Unknown output format: {}", other).into()),
        };
    }

    env_logger::Builder::new()
        .filter_level(config.poll.log_level.as_filter())
        .parse_default_env()
        .init();

    let settings = PollSettings {
        interval: Duration::from_millis(config.poll.interval_ms),
        count: cli.count,
        format: config.poll.format,
    };

    match &cli.command {
        Commands::System { mask } => {
            let platform = Platform::native(&config)?;
            let mask = mask.map(MetricMask::from_bits).unwrap_or(config.poll.system_mask());
            run_observer(Observer::system(&platform)?, mask, &settings)?;
        }
        Commands::Pid { pid, mask } => {
            let platform = Platform::native(&config)?;
            let mask = mask.map(MetricMask::from_bits).unwrap_or(config.poll.process_mask());
            run_observer(Observer::process_id(&platform, *pid)?, mask, &settings)?;
        }
        Commands::Name { name, mask } => {
            let platform = Platform::native(&config)?;
            let mask = mask.map(MetricMask::from_bits).unwrap_or(config.poll.process_mask());
            run_observer(Observer::process_name(&platform, name)?, mask, &settings)?;
        }
        Commands::Processes => {
            let platform = Platform::native(&config)?;
            print_processes(&platform.list_processes()?, settings.format)?;
        }
        Commands::Masks => print_masks(settings.format)?,
        Commands::SampleConfig => print!("{}", Config::sample_toml()),
    }

    Ok(())
}

#[cfg(feature = "cli")]
struct PollSettings {
    interval: Duration,
    count: u64,
    format: perfobs::config::OutputFormat,
}

#[cfg(feature = "cli")]
fn run_observer(
    mut observer: perfobs::Observer,
    mask: perfobs::MetricMask,
    settings: &PollSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    use perfobs::config::OutputFormat;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut polls = 0u64;
    while running.load(Ordering::SeqCst) {
        let result = observer.poll(mask)?;
        let timestamp = chrono::Local::now();

        match settings.format {
            OutputFormat::Json => {
                let doc = serde_json::json!({
                    "timestamp": timestamp.to_rfc3339(),
                    "kind": observer.kind(),
                    "target": observer.target_name(),
                    "mask": mask.bits(),
                    "result": result,
                });
                println!("{}", serde_json::to_string(&doc)?);
            }
            OutputFormat::Text => {
                let stamp = timestamp.format("%H:%M:%S%.3f").to_string();
                let maps = result.into_many();
                if maps.is_empty() {
                    println!(
                        "{} {} {}",
                        stamp.dimmed(),
                        observer.target_name().cyan().bold(),
                        "no matching processes".yellow()
                    );
                }
                for metrics in &maps {
                    println!(
                        "{} {} {}",
                        stamp.dimmed(),
                        observer.target_name().cyan().bold(),
                        format_metrics(metrics)
                    );
                }
            }
        }

        polls += 1;
        if settings.count != 0 && polls >= settings.count {
            break;
        }

        // Sleep in short slices so Ctrl+C is honoured promptly
        let deadline = std::time::Instant::now() + settings.interval;
        while running.load(Ordering::SeqCst) {
            let now = std::time::Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn format_metrics(metrics: &perfobs::Metrics) -> String {
    use perfobs::mask::keys;

    metrics
        .iter()
        .map(|(key, value)| {
            let value = match *key {
                keys::PROCESSOR_USAGE | keys::DISK_USAGE => format!("{:.1}%", value),
                keys::PHYSICAL_MEMORY_USAGE | keys::VIRTUAL_MEMORY_USAGE => {
                    format!("{}%", value)
                }
                _ => format!("{}", value),
            };
            format!("{}={}", key.white().bold(), value.green())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(feature = "cli")]
fn print_processes(
    records: &[perfobs::ProcessRecord],
    format: perfobs::config::OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    use perfobs::config::OutputFormat;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:>7} {:>7} {:>7} {:>7} {:>12} {:<20} {}",
            "PID", "PPID", "THREADS", "HANDLES", "MEM (KB)", "OWNER", "NAME"
        )
        .white()
        .bold()
    );
    for record in records {
        println!(
            "{:>7} {:>7} {:>7} {:>7} {:>12.0} {:<20} {}",
            record.pid,
            record.ppid,
            record.threads,
            record.handles,
            record.physical_memory_kb,
            record.owner.as_deref().unwrap_or("-"),
            record.name.cyan()
        );
    }
    println!("{} processes", records.len().to_string().yellow());
    Ok(())
}

#[cfg(feature = "cli")]
fn print_masks(format: perfobs::config::OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    use perfobs::config::OutputFormat;

    let catalog = perfobs::mask::catalog();
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    for (title, metrics) in [("System", catalog.system), ("Process", catalog.process)] {
        println!("{}", title.cyan().bold());
        for (flag, key) in metrics {
            println!("  {:>4}  {}", flag.bits().to_string().yellow(), key);
        }
    }
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features not enabled. Please compile with --features cli");
    std::process::exit(1);
}

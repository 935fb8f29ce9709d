use std::path::{Path, PathBuf};
use std::str::FromStr;
use structopt::StructOpt;

use loglens::alerting::{self, AlertDispatcher, AlertQueue, SummaryCollector};
use loglens::config::Config;
use loglens::input::find_log_files;
use loglens::models::{LogFormat, LogKind};
use loglens::output::{OutputFormat, OutputHandler};
use loglens::parser::ApacheLogParser;
use loglens::pipeline::Pipeline;
use loglens::storage::{LogStore, SqliteLogStore};

/// Web server log analysis
#[derive(StructOpt, Debug)]
#[structopt(name = "loglens", about = "Apache log analysis and monitoring")]
struct Cli {
    /// Logging level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[structopt(long, default_value = "info", global = true)]
    log_level: String,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Analyze every log file in the log directory
    Analyze {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Directory containing log files (overrides config)
        #[structopt(long)]
        log_dir: Option<PathBuf>,
        /// Analyze without storing anything in the database
        #[structopt(long)]
        analyze_only: bool,
    },
    /// Generate a default configuration file
    Config {
        /// Output path for the configuration file
        #[structopt(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Parse and display records from a file
    Parse {
        /// Path to log file
        #[structopt(short, long)]
        file: PathBuf,
        /// Number of records to display
        #[structopt(short, long, default_value = "10")]
        lines: usize,
    },
    /// Detect the format of a log file
    Detect {
        /// Path to log file
        #[structopt(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::from_args();

    let level = log::LevelFilter::from_str(&cli.log_level).unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match cli.command {
        Command::Analyze {
            config,
            log_dir,
            analyze_only,
        } => analyze(&config, log_dir, analyze_only).await?,
        Command::Config { output } => {
            Config::default().to_file(&output)?;
            println!("Default configuration written to: {:?}", output);
        }
        Command::Parse { file, lines } => parse(&file, lines)?,
        Command::Detect { file } => {
            match ApacheLogParser::new().detect_format(&file) {
                Some(format) => println!("{}", format),
                None => println!("unknown"),
            }
        }
    }

    Ok(())
}

async fn analyze(
    config_path: &Path,
    log_dir: Option<PathBuf>,
    analyze_only: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("Starting LogLens analysis");

    let mut config = if config_path.exists() {
        Config::from_file(config_path)?
    } else {
        log::warn!("Config file {:?} not found, using defaults", config_path);
        Config::default()
    };
    if let Some(dir) = log_dir {
        config.logs.source_dir = dir;
    }

    let parser = ApacheLogParser::new();
    let pipeline = Pipeline::new(&config)?;
    let store = if analyze_only {
        None
    } else {
        Some(SqliteLogStore::new(&config.database.path)?)
    };
    let mut output = OutputHandler::new(
        OutputFormat::from_name(&config.output.format),
        config.output.file_path.clone(),
    )?;

    let (tx, rx) = AlertDispatcher::create_channel();
    let queue = AlertQueue::new(tx);
    let dispatcher = tokio::spawn(AlertDispatcher::new(config.alerting.clone()).run(rx));

    let log_dir = &config.logs.source_dir;
    log::info!("Looking for log files in {:?}", log_dir);
    if !log_dir.is_dir() {
        log::error!("Log directory {:?} does not exist", log_dir);
        return Err(format!("log directory {:?} does not exist", log_dir).into());
    }

    let files = find_log_files(log_dir, &config.logs.extension)?;
    let mut summary = SummaryCollector::new();
    log::info!("Found {} log files to process", files.len());

    for path in &files {
        let source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        log::info!("Processing {:?}", path);

        let Some(format) = parser.detect_format(path) else {
            log::warn!("Could not determine format of {:?}, skipping", path);
            continue;
        };
        log::info!("Detected format: {}", format);

        let kind = if format == LogFormat::Error {
            LogKind::Error
        } else {
            LogKind::Access
        };
        let batch = match parser.parse_file(path, kind) {
            Ok(batch) => batch,
            Err(e) => {
                log::error!("Failed to read {:?}: {}", path, e);
                continue;
            }
        };

        if !batch.errors.is_empty() {
            log::info!("Parsed {} error log entries", batch.errors.len());
            if let Some(store) = &store {
                store.store_error_logs(&batch.errors, Some(&source))?;
            }
        }

        if batch.access.is_empty() {
            continue;
        }
        log::info!("Parsed {} access log entries", batch.access.len());
        if let Some(store) = &store {
            store.store_access_logs(&batch.access, Some(&source))?;
        }

        summary.add_records(&batch.access);
        let report = pipeline.run(batch.access, Some(&source)).await;
        summary.add_report(&report);

        log::info!(
            "Performance analysis completed: {} issues detected",
            report.performance.issues_detected.len()
        );
        log::info!(
            "Security analysis completed: {} potential threats detected",
            report.security.potential_threats
        );
        log::info!(
            "Anomaly detection completed: {} anomalies detected",
            report.anomalies.anomalies_detected
        );

        if let Some(store) = &store {
            store.store_batch_report(&report)?;
        }
        output.write_report(&report)?;

        match alerting::batch_alerts(&report) {
            Ok(alerts) => alerts.into_iter().for_each(|alert| queue.queue_alert(alert)),
            Err(e) => log::error!("Failed to build alerts for {}: {}", source, e),
        }
    }

    if let Some(timeframe) = summary.timeframe() {
        queue.queue_alert(alerting::daily_summary(&summary.stats(), timeframe));
    }
    drop(queue);
    let delivered = dispatcher.await?;
    output.flush()?;

    log::info!("Log analysis completed successfully ({} alerts sent)", delivered);
    Ok(())
}

fn parse(file: &Path, lines: usize) -> Result<(), Box<dyn std::error::Error>> {
    if !file.exists() {
        eprintln!("File not found: {:?}", file);
        std::process::exit(1);
    }

    let parser = ApacheLogParser::new();
    let kind = match parser.detect_format(file) {
        Some(LogFormat::Error) => LogKind::Error,
        _ => LogKind::Access,
    };
    let batch = parser.parse_file(file, kind)?;

    let total = batch.access.len() + batch.errors.len();
    println!(
        "Parsed {} record(s), skipped {} line(s) (showing {}):\n",
        total,
        batch.skipped,
        lines.min(total)
    );
    for record in batch.access.iter().take(lines) {
        println!(
            "  {} {} {} {} -> {} ({:.3}s) [{}]",
            record
                .timestamp
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            record.ip_address,
            record.method,
            record.endpoint,
            record.status,
            record.response_time,
            record.log_format
        );
    }
    for record in batch.errors.iter().take(lines) {
        println!(
            "  {} [{}] {} {}",
            record
                .timestamp
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            record.level,
            record.client_ip,
            record.message
        );
    }
    Ok(())
}

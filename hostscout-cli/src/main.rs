mod progress;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use hostscout::{
    config::CliOverrides,
    enumerate_and_classify, load_definitions, plan,
    results::{Match, RunSummary},
    worker, EncodingMode, HostDocument, InterruptHandle, InterruptStage, LoadedDefinitions,
    Orchestrator, ProcessLauncher, ScanConfig, SearchResult, ThreadLauncher, UnitStatus,
    WorkerLauncher,
};
use progress::BarProgress;
use std::io::{self, BufReader, IsTerminal, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Exit code after an interrupted scan, matching a shell's SIGINT convention
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
struct ScanArgs {
    /// Capture files or directories to scan
    inputs: Vec<PathBuf>,

    /// Directory holding the check definitions
    #[arg(short = 'd', long = "definitions")]
    definitions: Option<PathBuf>,

    /// Configuration file (YAML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Number of worker processes
    #[arg(short = 'j', long)]
    workers: Option<NonZeroUsize>,

    /// File extensions to accept when walking directories (e.g. txt,cfg)
    #[arg(short = 'e', long)]
    extensions: Option<String>,

    /// Capture files to skip (glob format)
    #[arg(short, long)]
    ignore: Vec<String>,

    /// How to handle invalid UTF-8 in captures (failfast|lossy)
    #[arg(long)]
    encoding: Option<EncodingMode>,

    /// Show only the summary, not individual findings
    #[arg(short, long)]
    stats: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Run units on threads instead of worker processes
    #[arg(long)]
    in_process: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every applicable check against a set of captures
    Scan(Box<ScanArgs>),

    /// Load a definitions directory and list the resulting checks
    Definitions {
        /// Directory holding the check definitions
        dir: PathBuf,
    },

    /// Show how captures are classified
    Classify {
        /// Capture files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// How to handle invalid UTF-8 in captures (failfast|lossy)
        #[arg(long, default_value = "failfast")]
        encoding: EncodingMode,
    },

    /// Execute one unit read from stdin (used by scan)
    #[command(hide = true)]
    Worker,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => scan(*args),
        Commands::Definitions { dir } => {
            init_logging("warn");
            list_definitions(&dir)
        }
        Commands::Classify { inputs, encoding } => {
            init_logging("warn");
            classify_inputs(&inputs, encoding)
        }
        Commands::Worker => run_worker(),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},ignore=warn,globset=warn", level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn scan(args: ScanArgs) -> Result<ExitCode> {
    let started = Instant::now();
    let file_config =
        ScanConfig::load_from(args.config.as_deref()).context("Failed to load configuration")?;
    let config = file_config.merge_with_cli(CliOverrides {
        definitions_dir: args.definitions,
        inputs: args.inputs,
        worker_count: args.workers,
        log_level: args.log_level,
        encoding_mode: args.encoding,
        ignore_patterns: args.ignore,
        file_extensions: args.extensions.as_ref().map(|e| {
            e.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }),
        stats_only: args.stats,
    });
    init_logging(&config.log_level);
    debug!("Effective configuration: {:?}", config);

    if config.inputs.is_empty() {
        bail!("No capture inputs given");
    }

    let definitions = load_definitions(&config.definitions_dir)?;
    report_warnings(&definitions);

    let hosts: Vec<Arc<HostDocument>> = enumerate_and_classify(&config.inputs, &config.host_options())?
        .into_iter()
        .map(Arc::new)
        .collect();
    info!(
        "Loaded {} checks and {} hosts",
        definitions.checks.len(),
        hosts.len()
    );

    let launcher: Arc<dyn WorkerLauncher> = if args.in_process {
        Arc::new(ThreadLauncher::new())
    } else {
        Arc::new(ProcessLauncher::current_exe(["worker"])?)
    };

    let interrupt = InterruptHandle::new();
    let signals = interrupt.clone();
    ctrlc::set_handler(move || {
        if signals.trigger() == InterruptStage::Abort {
            eprintln!("{}", "Aborted".red());
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
    })
    .context("Failed to install Ctrl-C handler")?;

    let units = plan(&definitions.checks, &hosts);
    let progress = BarProgress::new(units.len(), !args.json && io::stderr().is_terminal());
    let orchestrator = Orchestrator::new(launcher, config.worker_count, interrupt.clone());
    let results = orchestrator.run(units, &progress);
    progress.finish();

    let summary = RunSummary::from_results(&results);
    if args.json {
        print_json(&results, &summary, &definitions)?;
    } else {
        if !config.stats_only {
            print_results(&results);
        }
        print_summary(&summary, hosts.len(), started.elapsed());
    }

    if interrupt.is_requested() {
        Ok(ExitCode::from(EXIT_INTERRUPTED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn report_warnings(definitions: &LoadedDefinitions) {
    for warning in &definitions.warnings {
        eprintln!("{} {}", "warning:".yellow(), warning);
    }
}

fn format_fields(m: &Match) -> String {
    if m.fields.is_empty() {
        return String::new();
    }
    let fields: Vec<String> = m
        .fields
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();
    format!("  [{}]", fields.join(", "))
}

fn print_results(results: &[SearchResult]) {
    for result in results {
        if result.status.is_completed() && result.matches.is_empty() {
            continue;
        }

        let header = format!("{} @ {}", result.check_id, result.host_name);
        println!("\n{}", header.blue());
        match &result.status {
            UnitStatus::Completed => {}
            UnitStatus::Failed { .. } => println!("  {}", result.status.to_string().red()),
            status => println!("  {}", status.to_string().yellow()),
        }
        for m in &result.matches {
            let text = m.text.trim_end().lines().collect::<Vec<_>>().join("\n      ");
            println!(
                "  {}: {}{}",
                m.line_number.to_string().green(),
                text,
                format_fields(m)
            );
        }
    }
}

fn print_summary(summary: &RunSummary, host_count: usize, elapsed: Duration) {
    println!(
        "\nFound {} matches on {} of {} hosts",
        summary.total_matches, summary.hosts_with_findings, host_count
    );
    let line = format!(
        "{} units: {} completed, {} failed, {} cancelled, {} terminated in {}",
        summary.total_units,
        summary.completed,
        summary.failed,
        summary.cancelled,
        summary.terminated,
        humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64))
    );
    if summary.is_complete() && summary.failed == 0 {
        println!("{}", line);
    } else {
        println!("{}", line.yellow());
    }
}

fn print_json(
    results: &[SearchResult],
    summary: &RunSummary,
    definitions: &LoadedDefinitions,
) -> Result<()> {
    let warnings: Vec<String> = definitions
        .warnings
        .iter()
        .map(ToString::to_string)
        .collect();
    let output = serde_json::json!({
        "summary": summary,
        "warnings": warnings,
        "results": results,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn list_definitions(dir: &Path) -> Result<ExitCode> {
    let definitions = load_definitions(dir)?;
    report_warnings(&definitions);

    for check in &definitions.checks {
        let mut scope = vec![check.target.to_string()];
        if let Some(producer) = check.producer {
            scope.push(producer.to_string());
        }
        if let Some(distribution) = check.distribution {
            scope.push(distribution.to_string());
        }
        println!(
            "{}  {}  {}",
            check.id.blue(),
            scope.join("/"),
            check.source.display()
        );
    }
    println!("\n{} checks loaded", definitions.checks.len());
    Ok(ExitCode::SUCCESS)
}

fn classify_inputs(inputs: &[PathBuf], encoding: EncodingMode) -> Result<ExitCode> {
    let options = hostscout::HostOptions {
        encoding,
        ..Default::default()
    };
    for host in enumerate_and_classify(inputs, &options)? {
        println!(
            "{}  {}  {}",
            host.name.blue(),
            host.classification,
            &host.id[..12]
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn run_worker() -> Result<ExitCode> {
    init_logging("warn");
    // Ctrl-C goes to the whole process group; the coordinator decides what
    // happens to running units, so workers ignore it.
    ctrlc::set_handler(|| {}).context("Failed to install Ctrl-C handler")?;

    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    worker::serve(&mut reader, &mut writer)?;
    writer.flush()?;
    Ok(ExitCode::SUCCESS)
}

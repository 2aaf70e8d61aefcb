//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use docmap_core::{
    Collaborators, Inference, LlmInference, ProgressReporter, SessionReport, modules_to_json,
    run_session,
};
use docmap_shared::{
    AppConfig, SessionConfig, init_config, load_config, load_config_from, validate_api_key,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docmap: map a documentation site into modules and submodules.
#[derive(Parser)]
#[command(
    name = "docmap",
    version,
    about = "Crawl documentation sites and extract a consolidated module/submodule map.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.docmap/docmap.toml.
    #[arg(long, global = true, env = "DOCMAP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl from the seed URLs and print the module map.
    Run(RunArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Options of `docmap run`. Unset flags fall back to the config file.
#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Seed URLs; their hosts define the crawl scope.
    #[arg(required = true)]
    pub seeds: Vec<String>,

    /// Maximum number of fetches.
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Maximum link depth from a seed.
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Concurrent in-flight requests.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Minimum milliseconds between request starts.
    #[arg(long)]
    pub min_interval_ms: Option<u64>,

    /// Response body cap in bytes.
    #[arg(long)]
    pub max_body_bytes: Option<usize>,

    /// Token bound per segment.
    #[arg(long)]
    pub max_tokens: Option<usize>,

    /// Similarity threshold for merging topics, in [0, 1].
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Only crawl URL paths matching this glob (repeatable).
    #[arg(long = "include")]
    pub include: Vec<String>,

    /// Skip URL paths matching this glob (repeatable).
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Write the module map here instead of stdout.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Also write the full session report (pages, diagnostics) as JSON.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Crawl and segment only; skip topic inference. Emits the session report.
    #[arg(long)]
    pub crawl_only: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docmap=info",
        1 => "docmap=debug",
        _ => "docmap=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Run(args) => cmd_run(&config, &args).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

async fn cmd_run(config: &AppConfig, args: &RunArgs) -> Result<()> {
    let session = session_config(config, args);
    session.validate()?;

    let seeds = args
        .seeds
        .iter()
        .map(|s| Url::parse(s).map_err(|e| eyre!("invalid seed URL '{s}': {e}")))
        .collect::<Result<Vec<_>>>()?;

    // Check the key before any request is made.
    let llm = if args.crawl_only {
        None
    } else {
        let api_key = validate_api_key(config)?;
        Some(LlmInference::new(&config.llm, api_key)?)
    };
    let inference = llm.as_ref().map(|client| client as &dyn Inference);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing with partial results");
            on_signal.cancel();
        }
    });

    info!(
        seeds = seeds.len(),
        max_pages = session.max_pages,
        crawl_only = args.crawl_only,
        "starting run"
    );

    let reporter = CliProgress::new();
    let report = run_session(
        &seeds,
        &session,
        &Collaborators::with_inference(inference),
        cancel,
        &reporter,
    )
    .await?;

    if let Some(path) = &args.report {
        write_output(path, &serde_json::to_string_pretty(&report)?)?;
    }

    let primary = if args.crawl_only {
        serde_json::to_string_pretty(&report)?
    } else {
        modules_to_json(&report.modules)?
    };
    match &args.out {
        Some(path) => write_output(path, &primary)?,
        None => println!("{primary}"),
    }

    print_summary(&report);
    Ok(())
}

/// Merge config-file values with command-line overrides.
fn session_config(config: &AppConfig, args: &RunArgs) -> SessionConfig {
    let mut session = SessionConfig::from(config);

    if let Some(v) = args.max_pages {
        session.max_pages = v;
    }
    if let Some(v) = args.max_depth {
        session.max_depth = v;
    }
    if let Some(v) = args.concurrency {
        session.concurrent_fetches = v;
    }
    if let Some(v) = args.min_interval_ms {
        session.min_request_interval = Duration::from_millis(v);
    }
    if let Some(v) = args.max_body_bytes {
        session.max_body_bytes = v;
    }
    if let Some(v) = args.max_tokens {
        session.max_tokens_per_segment = v;
    }
    if let Some(v) = args.threshold {
        session.similarity_threshold = v;
    }
    if let Some(v) = args.timeout_secs {
        session.request_timeout = Duration::from_secs(v);
    }
    if !args.include.is_empty() {
        session.include_patterns = args.include.clone();
    }
    if !args.exclude.is_empty() {
        session.exclude_patterns = args.exclude.clone();
    }
    session
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content)
        .map_err(|e| eyre!("failed to write {}: {e}", path.display()))?;
    info!(path = %path.display(), bytes = content.len(), "wrote output");
    Ok(())
}

fn print_summary(report: &SessionReport) {
    let d = &report.diagnostics;
    eprintln!();
    if d.cancelled {
        eprintln!("  Run cancelled: results are partial.");
    } else {
        eprintln!("  Run complete.");
    }
    eprintln!("  Session:  {}", report.session_id);
    eprintln!(
        "  Pages:    {} fetched, {} failed",
        d.pages_fetched, d.pages_failed
    );
    eprintln!(
        "  Segments: {} ({} oversized)",
        d.segments, d.oversized_segments
    );
    eprintln!("  Modules:  {}", report.modules.len());
    eprintln!("  Failures: {}", d.failure_count());
    eprintln!("  Time:     {:.1}s", report.elapsed_ms as f64 / 1000.0);
    eprintln!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_fetched(&self, url: &str, current: usize, budget: usize) {
        self.spinner
            .set_message(format!("Fetching [{current}/{budget}] {url}"));
    }

    fn segment_inferred(&self, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Inferring topics [{current}/{total}]"));
    }

    fn done(&self, _report: &SessionReport) {
        self.spinner.finish_and_clear();
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use reqbench_core::{DatasetSize, HarnessConfig, Scenario};
use reqbench_harness::{init_tracing, preset, ScenarioRunner, PRESETS};
use reqbench_metrics::{CountingAllocator, ResultWriter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

#[derive(Parser, Debug)]
#[command(name = "reqbench")]
#[command(about = "Benchmark harness for the requirements-management service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to REQBENCH_CONFIG, then ./config/reqbench)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one scenario and print its summary
    Run(RunArgs),

    /// List built-in presets
    Presets,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Built-in preset name
    #[arg(long, conflicts_with = "scenario", required_unless_present = "scenario")]
    preset: Option<String>,

    /// Scenario TOML file
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Dataset size: small, medium or large
    #[arg(long)]
    dataset: Option<DatasetSize>,

    #[arg(long)]
    concurrency: Option<usize>,

    /// Request count for fixed and ratio workloads
    #[arg(long)]
    requests: Option<usize>,

    /// Duration for sustained and burst workloads
    #[arg(long)]
    duration_ms: Option<u64>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Connection URL for the external backend
    #[arg(long, env = "REQBENCH_DATABASE__EXTERNAL_URL")]
    database_url: Option<String>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Comma-separated report formats (text, markdown, json, csv)
    #[arg(long, value_delimiter = ',')]
    format: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Memory,
    Container,
    External,
}

impl Backend {
    fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Container => "container",
            Self::External => "external",
        }
    }
}

impl RunArgs {
    fn apply_to_config(&self, config: &mut HarnessConfig) {
        if let Some(backend) = self.backend {
            config.database.backend = backend.as_str().to_string();
        }
        if let Some(url) = &self.database_url {
            config.database.external_url = Some(url.clone());
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.display().to_string();
        }
        if !self.format.is_empty() {
            config.output.formats = self.format.clone();
        }
    }

    fn scenario(&self) -> anyhow::Result<Scenario> {
        let mut scenario = match (&self.preset, &self.scenario) {
            (Some(name), _) => preset(name)?,
            (None, Some(path)) => Scenario::from_file(path)
                .with_context(|| format!("failed to load scenario {}", path.display()))?,
            (None, None) => anyhow::bail!("either --preset or --scenario is required"),
        };

        if let Some(size) = self.dataset {
            scenario.dataset_size = size;
        }
        if let Some(concurrency) = self.concurrency {
            scenario = scenario.with_concurrency(concurrency);
        }
        if let Some(requests) = self.requests {
            scenario = scenario.with_requests(requests);
        }
        if let Some(ms) = self.duration_ms {
            scenario = scenario.with_duration(Duration::from_millis(ms));
        }
        if let Some(seed) = self.seed {
            scenario = scenario.with_seed(seed);
        }
        Ok(scenario)
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("received Ctrl-C");
}

async fn run(config_path: Option<PathBuf>, args: RunArgs) -> anyhow::Result<ExitCode> {
    let mut config = match &config_path {
        Some(path) => HarnessConfig::from_file(path),
        None => HarnessConfig::load(),
    }
    .context("failed to load configuration")?;
    args.apply_to_config(&mut config);
    config.validate().context("invalid configuration")?;

    init_tracing(&config.logging)?;

    let scenario = args.scenario()?;
    let runner = ScenarioRunner::new(config)?;
    let outcome = runner.run_until(&scenario, shutdown_signal()).await;

    if let Some(summary) = &outcome.summary {
        println!("{}", ResultWriter::new(summary.clone()).generate_text());
    }
    for path in &outcome.reports {
        println!("report: {}", path.display());
    }
    for failure in outcome.cleanup.failures() {
        eprintln!("cleanup failure: {failure:?}");
    }
    if let Some(err) = &outcome.error {
        eprintln!("error: {err}");
    }

    Ok(ExitCode::from(outcome.exit_code()))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Presets => {
            for (name, description) in PRESETS {
                println!("{name:<24} {description}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(args) => run(cli.config, args).await,
    }
}

use analyzer_jobs::analysis::{create_and_setup_analysis, AnalysisRequest};
use analyzer_jobs::config::{AppConfig, CliConfig, FileConfig};
use analyzer_jobs::store::{NewAnalyzerHost, NewRegisteredTask};
use analyzer_jobs::{metrics, AnalyzerJobs, RunStore, TaskRegistry};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tokio::runtime::Handle;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(name = "analyzer-jobs", version)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the command line.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database file.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Timeout in seconds for requests to analyzer hosts.
    #[clap(long, default_value_t = 30)]
    pub http_timeout_sec: u64,

    /// Age in seconds after which a stage run still marked running is considered
    /// abandoned and failed at startup.
    #[clap(long, default_value_t = 3600)]
    pub stale_run_threshold_sec: u64,

    /// Print the collected metrics in Prometheus text format before exiting.
    #[clap(long)]
    pub dump_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates an analyzer host and waits for its install chain to finish.
    AddHost {
        #[clap(long)]
        name: String,
        #[clap(long)]
        url: String,
        #[clap(long)]
        api_key: Option<String>,
    },

    /// Adds or updates a task registry entry.
    RegisterTask {
        #[clap(long)]
        id: String,
        #[clap(long)]
        task_name: Option<String>,
        #[clap(long)]
        description: Option<String>,
    },

    /// Reports analyzer tasks missing from the registry, one JSON warning per line.
    Check,

    /// Creates an analysis owned by the given user.
    CreateAnalysis {
        #[clap(long)]
        analyzer: String,
        #[clap(long)]
        user: i64,
        #[clap(long)]
        corpus: Option<i64>,
        #[clap(long)]
        corpus_action: Option<i64>,
        /// Document to analyze, may be repeated.
        #[clap(long = "doc")]
        docs: Vec<i64>,
    },

    /// Shows the stage runs of a chain.
    Runs {
        #[clap(long)]
        chain: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        db_path: cli_args.db_path.clone(),
        http_timeout_sec: cli_args.http_timeout_sec,
        stale_run_threshold_sec: cli_args.stale_run_threshold_sec,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    metrics::init_metrics();
    let app = AnalyzerJobs::open(&config, Handle::current())?;

    let result = run_command(&app, cli_args.command).await;
    app.executor.shutdown().await;

    if cli_args.dump_metrics {
        print!("{}", metrics::encode_metrics()?);
    }
    result
}

async fn run_command(app: &AnalyzerJobs, command: Command) -> Result<()> {
    match command {
        Command::AddHost { name, url, api_key } => {
            let host = app
                .hosts
                .create_host(&NewAnalyzerHost { name, url, api_key })?;
            info!("Waiting for the install chain of host {}...", host.id);
            app.executor.wait_idle().await;
            let host = app
                .hosts
                .get_host(host.id)?
                .with_context(|| format!("Analyzer host {} disappeared", host.id))?;
            print_json(&host)
        }
        Command::RegisterTask {
            id,
            task_name,
            description,
        } => {
            let task = app.store.register_task(&NewRegisteredTask {
                id,
                task_name,
                description,
                host_id: None,
            })?;
            print_json(&task)
        }
        Command::Check => {
            let report = app.reconciler().check_drift();
            if report.is_empty() {
                info!("No registry drift detected");
            }
            for warning in report.warnings() {
                print_json(&warning)?;
            }
            Ok(())
        }
        Command::CreateAnalysis {
            analyzer,
            user,
            corpus,
            corpus_action,
            docs,
        } => {
            let record = create_and_setup_analysis(
                &app.store,
                &AnalysisRequest {
                    analyzer_id: analyzer,
                    creator_id: user,
                    corpus_id: corpus,
                    corpus_action_id: corpus_action,
                    document_ids: docs,
                },
            )?;
            print_json(&record)
        }
        Command::Runs { chain } => {
            for run in app.store.get_chain_runs(&chain)? {
                print_json(&run)?;
            }
            Ok(())
        }
    }
}

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use strain_core::{PollConfig, RetryPolicy};
use strain_kubehub::KubeCluster;
use strain_scenarios::{catalogue, ScenarioSpec};
use tracing::{error, info};

mod harness;

use harness::{Placement, Summary};

#[derive(Parser, Debug)]
#[command(name = "strainctl", version, about = "Drive lifecycle scenarios against a cluster")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Path to a kubeconfig (default: inferred)
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long, global = true)]
    context: Option<String>,

    /// Seconds before the first observation of every wait (env STRAIN_PREPOLL_DELAY)
    #[arg(long, global = true)]
    prepoll_delay: Option<f64>,

    /// Observations per wait (env STRAIN_RETRIES_TOTAL)
    #[arg(long, global = true)]
    retries_total: Option<u32>,

    /// Seconds between observations (env STRAIN_SLEEP_TIME)
    #[arg(long, global = true)]
    sleep_time: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available scenarios
    List,
    /// Run a scenario from a YAML/JSON arguments file
    Run {
        /// Arguments file; the `scenario` key selects the scenario
        args: PathBuf,
        /// Namespace every run shares
        #[arg(long = "ns", default_value = "default", conflicts_with = "isolate")]
        namespace: String,
        /// Create a fresh namespace per run and delete it afterwards
        #[arg(long, action = ArgAction::SetTrue)]
        isolate: bool,
        /// Give each isolated namespace a service account that the pods run under
        #[arg(long, action = ArgAction::SetTrue, requires = "isolate")]
        with_service_account: bool,
        /// Number of invocations
        #[arg(long, default_value_t = 1)]
        times: usize,
        /// Invocations in flight at once
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Print the API server version
    Version,
}

fn init_tracing() {
    let env = std::env::var("STRAIN_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("STRAIN_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid STRAIN_METRICS_ADDR; expected host:port");
        }
    }
}

/// Env values overlaid by explicit flags.
fn retry_policy(cli: &Cli) -> Result<RetryPolicy> {
    let mut cfg = PollConfig::from_env();
    if let Some(v) = cli.prepoll_delay { cfg.prepoll_delay = v; }
    if let Some(v) = cli.retries_total { cfg.retries_total = v; }
    if let Some(v) = cli.sleep_time { cfg.sleep_time = v; }
    Ok(cfg.policy()?)
}

fn load_spec(path: &PathBuf) -> Result<ScenarioSpec> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    // YAML is a superset of JSON, so one parser covers both
    let spec: ScenarioSpec = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    spec.validate()?;
    Ok(spec)
}

fn print_summary(output: Output, summary: &Summary, reports: &[harness::RunReport]) -> Result<()> {
    match output {
        Output::Human => {
            println!("scenario: {}  runs: {}", summary.scenario, summary.runs);
            for (verdict, n) in &summary.verdicts {
                println!("  {:<10} {}", verdict.to_string(), n);
            }
            println!("  latency ms  min {:.1}  avg {:.1}  max {:.1}", summary.min_ms, summary.avg_ms, summary.max_ms);
            for r in reports.iter().filter(|r| r.error.is_some()) {
                println!("  #{} [{}] {}", r.iteration, r.verdict, r.error.as_deref().unwrap_or_default());
            }
        }
        Output::Json => {
            let body = serde_json::json!({ "summary": summary, "runs": reports });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::List => match cli.output {
            Output::Human => {
                for name in catalogue::NAMES {
                    println!("{}", name);
                }
            }
            Output::Json => println!("{}", serde_json::to_string_pretty(catalogue::NAMES)?),
        },
        Commands::Run { args, namespace, isolate, with_service_account, times, concurrency } => {
            let spec = load_spec(args)?;
            let policy = retry_policy(&cli)?;
            let client = KubeCluster::connect(cli.kubeconfig.as_deref(), cli.context.as_deref()).await?;
            let placement = if *isolate { Placement::Isolated { service_account: *with_service_account } } else { Placement::Shared(namespace.clone()) };
            info!(scenario = spec.name(), times, concurrency, max_wait_s = policy.max_wait().as_secs_f64(), "starting runs");
            let reports = harness::run_many(&client, &spec, &placement, &policy, *times, *concurrency).await;
            let summary = Summary::from_reports(spec.name(), &reports);
            print_summary(cli.output, &summary, &reports)?;
            if summary.successes() != summary.runs {
                error!(failed = summary.runs - summary.successes(), "some runs did not succeed");
                bail!("{} of {} runs did not succeed", summary.runs - summary.successes(), summary.runs);
            }
        }
        Commands::Version => {
            let client = KubeCluster::connect(cli.kubeconfig.as_deref(), cli.context.as_deref()).await?;
            let version = client.server_version().await?;
            match cli.output {
                Output::Human => println!("{}", version),
                Output::Json => println!("{}", serde_json::json!({ "server_version": version })),
            }
        }
    }
    Ok(())
}

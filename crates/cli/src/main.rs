use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use keel_api::{CompileOptions, InProcApi, KeelApi};
use keel_core::{KeelError, Kind, Settings};
use keel_kubehub::KubePlatform;
use keel_ops::Context;
use metrics::counter;
use serde::Serialize;
use tracing::{error, info};

mod tokens;

/// Exit status for any failed orchestration.
const EXIT_FAILURE: i32 = 100;

#[derive(Parser, Debug)]
#[command(name = "keelctl", version, about = "Deploy and reconcile cluster graphs")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace for ls and upgrade (default: all)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// kubeconfig context to use instead of the current one
    #[arg(long = "context", global = true, env = "KEEL_CONTEXT")]
    context: Option<String>,

    /// Platform version (major.minor); detected from the API server when unset
    #[arg(long = "platform-version", global = true)]
    platform_version: Option<String>,

    /// Write original/source/diff JSON for every patched or replaced object
    #[arg(long = "save-diffs", global = true, action = ArgAction::SetTrue)]
    save_diffs: bool,

    /// Debug logging
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
    Yaml,
}

#[derive(Args, Debug, Default)]
struct CompileArgs {
    /// Token file: YAML mapping or key=value lines
    #[arg(long = "token-file")]
    token_file: Option<PathBuf>,

    /// Token value, repeatable: --token tag=3
    #[arg(long = "token", value_name = "KEY=VALUE")]
    tokens: Vec<String>,

    /// Replica multiplier for deployments and stateful sets
    #[arg(long = "scale")]
    scale: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update everything a graph describes
    Deploy {
        /// Compiled graph (JSON or YAML)
        source: PathBuf,
        #[command(flatten)]
        compile: CompileArgs,
    },
    /// Tear down what a graph describes; reserved namespaces survive
    Remove {
        source: PathBuf,
        #[command(flatten)]
        compile: CompileArgs,
    },
    /// Run one job from a graph, replacing any previous run
    Run {
        source: PathBuf,
        /// Job as namespace.name
        #[arg(long = "job")]
        job: String,
        #[command(flatten)]
        compile: CompileArgs,
    },
    /// Inspect the cluster
    Ls {
        #[command(subcommand)]
        what: Listing,
    },
    /// Point a workload container at a new image
    Upgrade {
        /// Deployment, DaemonSet or StatefulSet
        kind: String,
        name: String,
        container: String,
        image: String,
    },
}

#[derive(Subcommand, Debug)]
enum Listing {
    Namespaces,
    LoadBalancers,
    Workloads,
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let env = std::env::var("KEEL_LOG").unwrap_or_else(|_| fallback.to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KEEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KEEL_METRICS_ADDR; expected host:port");
        }
    }
}

fn compile_options(args: &CompileArgs) -> Result<CompileOptions> {
    let mut tokens = match &args.token_file {
        Some(path) => tokens::load_token_file(path)?,
        None => Default::default(),
    };
    for raw in &args.tokens {
        let (k, v) = tokens::parse_pair(raw)?;
        tokens.insert(k, v);
    }
    Ok(CompileOptions { tokens, scale: args.scale })
}

fn print<T: Serialize>(output: Output, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    match output {
        Output::Human => human(value),
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn command_name(cmd: &Commands) -> &'static str {
    match cmd {
        Commands::Deploy { .. } => "deploy",
        Commands::Remove { .. } => "remove",
        Commands::Run { .. } => "run",
        Commands::Ls { .. } => "ls",
        Commands::Upgrade { .. } => "upgrade",
    }
}

async fn connect(cli: &Cli) -> Result<InProcApi> {
    let mut settings = Settings::from_env();
    settings.save_diffs |= cli.save_diffs;
    if cli.platform_version.is_some() {
        settings.platform_version = cli.platform_version.clone();
    }
    let platform = KubePlatform::connect(cli.context.as_deref()).await?.with_save_diffs(cli.save_diffs);
    info!(context = %cli.context.as_deref().unwrap_or("(current)"), "connected");
    Ok(InProcApi::new(Context::new(Arc::new(platform), settings)))
}

async fn run(cli: Cli) -> Result<()> {
    counter!("keelctl_commands_total", 1u64, "command" => command_name(&cli.command));
    let api = connect(&cli).await?;
    let ns = cli.namespace.as_deref();
    match &cli.command {
        Commands::Deploy { source, compile } => {
            let graph = api.compile(source, &compile_options(compile)?).await?;
            api.deploy_cluster(&graph).await?;
            println!("done");
        }
        Commands::Remove { source, compile } => {
            let graph = api.compile(source, &compile_options(compile)?).await?;
            api.remove_cluster(&graph).await?;
            println!("done");
        }
        Commands::Run { source, job, compile } => {
            let (namespace, name) = job.split_once('.').unwrap_or(("", job.as_str()));
            let graph = api.compile(source, &compile_options(compile)?).await?;
            api.run_job(&graph, namespace, name).await?;
            println!("done");
        }
        Commands::Ls { what: Listing::Namespaces } => {
            let names = api.list_namespaces().await?;
            print(cli.output, &names, |names| names.iter().for_each(|n| println!("{}", n)))?;
        }
        Commands::Ls { what: Listing::LoadBalancers } => {
            let lbs = api.load_balancers(ns).await?;
            print(cli.output, &lbs, |lbs| {
                for lb in lbs {
                    println!("{} • {} • {}", lb.namespace, lb.name, lb.ingress.join(","));
                }
            })?;
        }
        Commands::Ls { what: Listing::Workloads } => {
            let items = api.containers(ns).await?;
            print(cli.output, &items, |items| {
                for c in items {
                    println!("{} • {}/{} • {} • {}", c.namespace, c.kind, c.workload, c.container, c.image);
                }
            })?;
        }
        Commands::Upgrade { kind, name, container, image } => {
            let namespace = ns.unwrap_or(keel_core::DEFAULT_NAMESPACE);
            api.upgrade(Kind::from_name(kind), namespace, name, container, image).await?;
            println!("done");
        }
    }
    Ok(())
}

fn report(e: &anyhow::Error) {
    if let Some(KeelError::Compilation { missing_tokens, .. }) = e.downcast_ref::<KeelError>() {
        if !missing_tokens.is_empty() {
            eprintln!(
                "{} tokens were found in the graph without a value; supply them with --token or --token-file: {}",
                missing_tokens.len(),
                missing_tokens.join(", ")
            );
            return;
        }
    }
    eprintln!("error: {:#}", e);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    init_metrics();
    if let Err(e) = run(cli).await {
        error!(error = %e, "keelctl failed");
        report(&e);
        std::process::exit(EXIT_FAILURE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_tokens() {
        let cli = Cli::try_parse_from([
            "keelctl", "run", "graph.yaml", "--job", "shop.migrate", "--token", "tag=3", "--scale", "2",
        ])
        .unwrap();
        let Commands::Run { job, compile, .. } = cli.command else { panic!("expected run") };
        assert_eq!(job, "shop.migrate");
        let opts = compile_options(&compile).unwrap();
        assert_eq!(opts.tokens["tag"], "3");
        assert_eq!(opts.scale, Some(2.0));
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["keelctl", "ls", "load-balancers", "--ns", "shop", "-o", "json", "-v"]).unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("shop"));
        assert_eq!(cli.output, Output::Json);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Ls { what: Listing::LoadBalancers }));
    }

    #[test]
    fn bad_token_pairs_are_rejected() {
        let args = CompileArgs { tokens: vec!["novalue".into()], ..Default::default() };
        assert!(compile_options(&args).is_err());
    }
}

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use stig_ingest::cli::{self, Cli, Command};
use stig_ingest::output::{Output, format_json};
use stig_ingest::{Catalog, Config, ConfigManager, Pipeline, QueryEngine, StigError, Store};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let usage = e
                .downcast_ref::<StigError>()
                .is_some_and(StigError::is_usage_error);
            ExitCode::from(if usage { 2 } else { 1 })
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "stig_ingest=debug,stig=debug" } else { "stig_ingest=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = ConfigManager::load_config(&cli)
        .await
        .context("failed to load configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let store = Arc::new(
        Store::open(&config.store.path, config.store.id_origin)
            .await
            .with_context(|| format!("failed to open store {}", config.store.path.display()))?,
    );
    let output = Output::new();

    match cli.command {
        Command::Init { catalog } => init(&config, store, &catalog, &output).await,
        Command::Ls {
            benchmark,
            cats,
            json,
        } => {
            let engine = QueryEngine::new(store);
            let rendered = match benchmark {
                None => {
                    let benchmarks = engine.list_benchmarks().await;
                    if json {
                        format_json(&benchmarks)?
                    } else {
                        output.format_benchmarks(&benchmarks)
                    }
                }
                Some(selector) => {
                    let severities = cli::severities(&cats);
                    let rules = engine
                        .list_rules(&cli::benchmark_query(&selector), Some(&severities))
                        .await?;
                    if json {
                        format_json(&rules)?
                    } else {
                        output.format_rules(&rules)
                    }
                }
            };
            print!("{}", rendered);
            Ok(())
        }
        Command::Rule {
            stig_id,
            rule_id,
            benchmark,
            json,
        } => {
            let engine = QueryEngine::new(store);
            let query = cli::rule_query(stig_id, rule_id, benchmark);
            let Some(rule) = engine.get_rule(&query).await? else {
                bail!("no rule found");
            };
            if json {
                println!("{}", format_json(&rule)?);
            } else {
                print!("{}", output.format_rule(&rule));
            }
            Ok(())
        }
    }
}

async fn init(
    config: &Config,
    store: Arc<Store>,
    catalog_path: &std::path::Path,
    output: &Output,
) -> Result<()> {
    let catalog = Catalog::load(catalog_path)
        .await
        .with_context(|| format!("failed to load catalog {}", catalog_path.display()))?;

    let pipeline = Pipeline::from_config(config, Arc::clone(&store))?;
    let report = pipeline
        .ingest_all(&catalog.benchmarks, ConfigManager::get_concurrency(config))
        .await;

    store.save().await.context("failed to save store")?;
    print!("{}", output.format_report(&report));

    if !report.is_success() {
        bail!("{} benchmark(s) failed to ingest", report.failures.len());
    }
    Ok(())
}

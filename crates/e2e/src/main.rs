//! Taskdeck E2E runner
//!
//! Exit codes: 0 all scenarios passed, 1 at least one failed, 2 the suite
//! could not run (bad configuration, unreadable scenarios, rejected login).

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use taskdeck_common::EntityKind;
use tracing::{error, info};

use taskdeck_e2e::playwright::{Browser, PlaywrightPage};
use taskdeck_e2e::runner::global_setup;
use taskdeck_e2e::{ApiClient, HarnessConfig, Scenario, ScenarioRunner};

#[derive(Parser)]
#[command(name = "taskdeck-e2e")]
#[command(author, version, about = "Run Taskdeck browser scenarios", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "E2E_CONFIG", default_value = "e2e.toml")]
    config: PathBuf,

    /// Application root, overrides config and BASE_URL
    #[arg(long)]
    base_url: Option<String>,

    /// Scenario directory
    #[arg(long)]
    scenarios: Option<PathBuf>,

    /// Only run scenarios carrying this tag
    #[arg(long, env = "E2E_TAG")]
    tag: Option<String>,

    /// Only run the scenario with this name
    #[arg(long)]
    name: Option<String>,

    /// Browser engine
    #[arg(long, value_enum, ignore_case = true)]
    browser: Option<Browser>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Delete every user, status, label and task after the run
    #[arg(long)]
    purge: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = HarnessConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?
        .apply_env();

    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(dir) = cli.scenarios {
        config.scenarios_dir = dir;
    }
    if let Some(browser) = cli.browser {
        config.browser.browser = browser;
    }
    if cli.headed {
        config.browser.headless = false;
    }

    let mut scenarios = Scenario::load_all(&config.scenarios_dir)
        .with_context(|| format!("loading scenarios from {}", config.scenarios_dir.display()))?;
    if let Some(tag) = &cli.tag {
        scenarios.retain(|s| s.has_tag(tag));
    }
    if let Some(name) = &cli.name {
        scenarios.retain(|s| &s.name == name);
    }
    if scenarios.is_empty() {
        info!("No scenarios selected");
        return Ok(true);
    }

    let client = Arc::new(ApiClient::from_config(&config)?);
    global_setup(&client, &config).await.context("global setup")?;

    let page = Arc::new(PlaywrightPage::launch(config.playwright()).await?);
    let runner = ScenarioRunner::new(client.clone(), page, &config);

    let suite = runner.run_all(&scenarios).await;
    runner.write_results(&suite)?;

    if cli.purge {
        let stats = client.cleanup_test_data(&EntityKind::CLEANUP_ORDER).await;
        for (kind, count) in stats {
            info!("Purged {} {}", count, kind);
        }
    }

    Ok(suite.success())
}

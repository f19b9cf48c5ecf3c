use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tornbot_daemon::{
    api::{startup_profile, TornApi},
    browser::{BrowserDriver, DisabledBrowserDriver, HttpBrowserDriver},
    config::{BotConfig, Cli},
    executor::GameExecutor,
    scheduler::{Scheduler, StopReason},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = BotConfig::from_cli(cli).context("load configuration")?;

    let api = Arc::new(TornApi::new(cfg.api.clone()).context("build api client")?);
    if let Some(profile) = startup_profile(api.profile().await).context("fetch profile")? {
        info!("running as {} [{}]", profile.name, profile.player_id);
    }

    let driver: Box<dyn BrowserDriver> = match &cfg.browser.driver_url {
        Some(url) => {
            info!("browser driver at {url} (headless={})", cfg.browser.headless);
            Box::new(HttpBrowserDriver::new(url.as_str(), &cfg.browser).context("build browser driver")?)
        }
        None => {
            warn!("every module is disabled; only polling status");
            Box::new(DisabledBrowserDriver)
        }
    };
    let executor = GameExecutor::new(api.clone(), driver, cfg.executor.clone());

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received; stopping after the current step");
            let _ = stop_tx.send(true);
        }
    });

    let mut scheduler = Scheduler::new(
        api,
        executor,
        cfg.modules.clone(),
        cfg.retry.clone(),
        cfg.scheduler.clone(),
        stop_rx,
    );

    match scheduler.run().await {
        StopReason::Signal => {
            info!("stopped");
            Ok(())
        }
        StopReason::FatalAuth(e) => Err(anyhow!(e).context("scheduler stopped")),
    }
}

//! shepherdd — the Shepherd rollout daemon.
//!
//! One process per host. It assembles:
//! - Shared rollout state (redis)
//! - Local install tracker (state file or version command)
//! - GitHub release fetcher
//! - Health checker
//! - Rollout coordinator + two-timer dispatcher
//!
//! # Usage
//!
//! ```text
//! shepherdd --config /etc/shepherd.toml
//! shepherdd --config /etc/shepherd.toml --once
//! ```
//!
//! Exit codes: 0 on shutdown or one-shot completion, 1 on any fatal error.

mod alert;
mod cli;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio::sync::watch;
use tracing::{Instrument, error, info, warn};

use shepherd_core::{ConfigError, ShellRunner, ShepherdConfig};
use shepherd_release::GitHubFetcher;
use shepherd_rollout::{Coordinator, Dispatcher};
use shepherd_state::{RedisState, connection_info, tracker_for};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging depends on the config, so failures up to here go to stderr.
    let (config, missing_file) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("shepherdd: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    let host = resolve_hostname(cli.hostname.as_deref());
    let alerts = match logging::init(&config, &host) {
        Ok(alerts) => alerts,
        Err(e) => {
            eprintln!("shepherdd: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let span = tracing::info_span!("shepherd", host = %host);
    if let Some(path) = missing_file {
        span.in_scope(|| warn!(?path, "config file not found, using flags and defaults"));
    }

    match run(config, host).instrument(span.clone()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            span.in_scope(|| error!(error = %format!("{e:#}"), "shepherd terminated"));
            if let Some(alerts) = alerts {
                alerts.flush().await;
            }
            ExitCode::FAILURE
        }
    }
}

/// File config overlaid with flags, validated. Also returns the config
/// path when the file did not exist.
fn load_config(cli: &Cli) -> anyhow::Result<(ShepherdConfig, Option<PathBuf>)> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let path = cli.config_path(home.as_deref());

    let (mut config, missing) = match ShepherdConfig::from_file(&path) {
        Ok(config) => (config, None),
        Err(ConfigError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            (ShepherdConfig::default(), Some(path))
        }
        Err(e) => return Err(e.into()),
    };
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;
    Ok((config, missing))
}

async fn run(config: ShepherdConfig, host: String) -> anyhow::Result<()> {
    let config = Arc::new(config);
    info!(
        repo = %config.repo,
        namespace = %config.namespace(),
        once = config.once,
        "starting shepherd"
    );

    // ── Components ─────────────────────────────────────────────
    let shared = RedisState::connect(connection_info(&config.redis), config.namespace())
        .await
        .with_context(|| {
            format!("failed to connect to redis at {}:{}", config.redis.host, config.redis.port)
        })?;
    let tracker = tracker_for(&config.install_source());
    let fetcher = GitHubFetcher::from_config(&config).context("failed to build release fetcher")?;

    let coordinator = Coordinator::new(
        config.clone(),
        &host,
        Arc::new(shared),
        tracker,
        Arc::new(fetcher),
        Arc::new(ShellRunner::new()),
    );
    let dispatcher = Dispatcher::from_config(coordinator, &config);

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    dispatcher.run(shutdown_rx).await?;
    info!("shepherd stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}

fn resolve_hostname(flag: Option<&str>) -> String {
    flag.filter(|h| !h.is_empty())
        .map(str::to_string)
        .or_else(system_hostname)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Kernel host name, falling back to `uname -n` where `/proc` is absent.
fn system_hostname() -> Option<String> {
    let from_proc = std::fs::read_to_string("/proc/sys/kernel/hostname").ok();
    let name = from_proc.or_else(|| {
        std::process::Command::new("uname")
            .arg("-n")
            .output()
            .ok()
            .filter(|out| out.status.success())
            .map(|out| String::from_utf8_lossy(&out.stdout).into_owned())
    })?;
    Some(name.trim().to_string()).filter(|h| !h.is_empty())
}

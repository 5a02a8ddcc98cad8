//! Process-wide tracing setup.

use anyhow::Context as _;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use shepherd_core::ShepherdConfig;

use crate::alert::{self, AlertHandle};

/// Filter directives for a configured level. Our own crates log at the
/// configured level; dependencies are capped at `warn` unless more
/// verbose output was asked for explicitly.
pub fn filter_directives(level: &str) -> String {
    match level {
        "debug" => "debug,hyper=info,reqwest=info".to_string(),
        other => format!("warn,shepherdd={other},shepherd_core={other},shepherd_state={other},shepherd_health={other},shepherd_release={other},shepherd_rollout={other}"),
    }
}

/// Install the JSON subscriber. Returns the alert handle when a webhook
/// is configured.
///
/// `RUST_LOG`, when set, replaces the configured level.
pub fn init(config: &ShepherdConfig, host: &str) -> anyhow::Result<Option<AlertHandle>> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(filter_directives(&config.log_level)),
    }
    .context("invalid log filter")?;

    let (alert_layer, handle) = match &config.alert_webhook_url {
        Some(url) if !url.is_empty() => {
            let (layer, handle) = alert::spawn(url, config.alert_channel.clone(), host);
            (Some(layer), Some(handle))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_writer(std::io::stdout),
        )
        .with(alert_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_parse_for_every_level() {
        for level in ["debug", "info", "warn", "error"] {
            assert!(EnvFilter::try_new(filter_directives(level)).is_ok(), "{level}");
        }
    }

    #[test]
    fn non_debug_levels_apply_to_own_crates() {
        let d = filter_directives("info");
        assert!(d.starts_with("warn,"));
        assert!(d.contains("shepherd_rollout=info"));
    }
}

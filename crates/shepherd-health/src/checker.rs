//! Health check probe logic.
//!
//! Runs the health-check command with bounded retries, then keeps probing
//! at a fixed interval until the observation window has fully elapsed.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use shepherd_core::{CommandRunner, ExecError, ShepherdConfig};

/// Result of a single health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The command exited zero.
    Healthy,
    /// The command exited non-zero, timed out, or could not be spawned.
    Unhealthy { output: String, cause: String },
}

impl From<Result<String, ExecError>> for ProbeResult {
    fn from(result: Result<String, ExecError>) -> Self {
        match result {
            Ok(_) => ProbeResult::Healthy,
            Err(e) => ProbeResult::Unhealthy {
                output: e.output().to_string(),
                cause: e.to_string(),
            },
        }
    }
}

/// Verdict for a whole observation window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    /// The window elapsed without an unrecovered failure.
    Healthy,
    /// First unrecovered failure, with captured output for diagnostics.
    Unhealthy { output: String, cause: String },
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthOutcome::Healthy)
    }
}

/// Parameters of one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckConfig {
    pub command: String,
    /// Maximum attempts for the initial check.
    pub retries: u32,
    /// Delay between attempts and between re-checks.
    pub interval: Duration,
    /// Bound on a single attempt.
    pub timeout: Duration,
    /// Total observation window.
    pub window: Duration,
}

impl HealthCheckConfig {
    pub fn from_config(config: &ShepherdConfig) -> Self {
        Self {
            command: config.healthcheck_command.clone(),
            retries: config.healthcheck_retries,
            interval: config.healthcheck_interval,
            timeout: config.healthcheck_timeout,
            window: config.canary_rollout_window,
        }
    }
}

/// Observes a deployed release through the health-check command.
#[derive(Clone)]
pub struct HealthChecker {
    runner: Arc<dyn CommandRunner>,
    config: HealthCheckConfig,
}

impl HealthChecker {
    pub fn new(runner: Arc<dyn CommandRunner>, config: HealthCheckConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Observe `tag` (deployed from `asset`) for the configured window.
    ///
    /// Blocks the caller for up to the full window.
    pub async fn observe(&self, tag: &str, asset: &Path) -> HealthOutcome {
        let started = Instant::now();
        let deadline = started + self.config.window;
        info!(%tag, ?asset, window = ?self.config.window, "start health check");

        if let ProbeResult::Unhealthy { output, cause } = self.initial_check(tag, asset).await {
            warn!(%tag, %cause, %output, "health check failed, retries exhausted");
            return HealthOutcome::Unhealthy { output, cause };
        }

        let interval = self.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let window_end = tokio::time::sleep_until(deadline);
        tokio::pin!(window_end);

        let mut checks: u32 = 1;
        loop {
            tokio::select! {
                biased;
                _ = &mut window_end => {
                    info!(%tag, checks, elapsed = ?started.elapsed(), "health check window elapsed cleanly");
                    return HealthOutcome::Healthy;
                }
                _ = ticker.tick() => {
                    checks += 1;
                    if let ProbeResult::Unhealthy { output, cause } = self.probe(tag, asset).await {
                        warn!(%tag, checks, %cause, %output, "health check failed within window");
                        return HealthOutcome::Unhealthy { output, cause };
                    }
                }
            }
        }
    }

    /// First check, retried up to `retries` attempts with `interval` delay.
    async fn initial_check(&self, tag: &str, asset: &Path) -> ProbeResult {
        let attempts = self.config.retries.max(1);
        let mut last = ProbeResult::Healthy;
        for attempt in 1..=attempts {
            last = self.probe(tag, asset).await;
            match &last {
                ProbeResult::Healthy => {
                    debug!(%tag, attempt, "initial health check passed");
                    return last;
                }
                ProbeResult::Unhealthy { cause, .. } => {
                    debug!(%tag, attempt, attempts, %cause, "health check attempt failed");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.interval).await;
            }
        }
        last
    }

    async fn probe(&self, tag: &str, asset: &Path) -> ProbeResult {
        self.runner
            .execute(&self.config.command, tag, asset, Some(self.config.timeout))
            .await
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    /// Replays scripted results; once exhausted every probe passes.
    #[derive(Default)]
    struct ScriptedRunner {
        results: Mutex<VecDeque<bool>>,
        calls: Mutex<Vec<(Instant, Option<Duration>)>>,
    }

    impl ScriptedRunner {
        fn with(results: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.iter().copied().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn execute(
            &self,
            command: &str,
            _tag: &str,
            _asset: &Path,
            timeout: Option<Duration>,
        ) -> Result<String, ExecError> {
            self.calls.lock().unwrap().push((Instant::now(), timeout));
            let ok = self.results.lock().unwrap().pop_front().unwrap_or(true);
            if ok {
                Ok("ok\n".to_string())
            } else {
                Err(ExecError::Failed {
                    command: command.to_string(),
                    status: "exit status: 1".to_string(),
                    output: "connection refused\n".to_string(),
                })
            }
        }
    }

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            command: "./health.sh".to_string(),
            retries: 3,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            window: Duration::from_secs(600),
        }
    }

    fn checker(runner: Arc<ScriptedRunner>) -> HealthChecker {
        HealthChecker::new(runner, config())
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_only_after_full_window() {
        let runner = ScriptedRunner::with(&[]);
        let start = Instant::now();

        let outcome = checker(runner.clone()).observe("v1", Path::new("a.tgz")).await;

        assert_eq!(outcome, HealthOutcome::Healthy);
        assert_eq!(start.elapsed(), Duration::from_secs(600));
        // t = 0, 60, ..., 540
        assert_eq!(runner.call_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_is_time_bounded() {
        let runner = ScriptedRunner::with(&[]);
        checker(runner.clone()).observe("v1", Path::new("a.tgz")).await;
        let calls = runner.calls.lock().unwrap();
        assert!(calls.iter().all(|(_, t)| *t == Some(Duration::from_secs(30))));
    }

    #[tokio::test(start_paused = true)]
    async fn initial_failure_recovers_within_retries() {
        let runner = ScriptedRunner::with(&[false, true]);

        let outcome = checker(runner.clone()).observe("v1", Path::new("a.tgz")).await;

        assert!(outcome.is_healthy());
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[1].0 - calls[0].0, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_without_waiting_out_window() {
        let runner = ScriptedRunner::with(&[false, false, false]);
        let start = Instant::now();

        let outcome = checker(runner.clone()).observe("v3", Path::new("a.tgz")).await;

        match outcome {
            HealthOutcome::Unhealthy { output, cause } => {
                assert!(output.contains("connection refused"));
                assert!(cause.contains("./health.sh"));
            }
            other => panic!("expected Unhealthy, got {other:?}"),
        }
        assert_eq!(runner.call_count(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_during_observation_is_not_retried() {
        // Initial pass, one good re-check, then a failure followed by
        // results that would have recovered if retried.
        let runner = ScriptedRunner::with(&[true, true, false, true, true]);
        let start = Instant::now();

        let outcome = checker(runner.clone()).observe("v3", Path::new("a.tgz")).await;

        assert!(!outcome.is_healthy());
        assert_eq!(runner.call_count(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn single_retry_config_fails_on_first_error() {
        let runner = ScriptedRunner::with(&[false]);
        let mut cfg = config();
        cfg.retries = 1;

        let outcome = HealthChecker::new(runner.clone(), cfg)
            .observe("v1", Path::new("a.tgz"))
            .await;

        assert!(!outcome.is_healthy());
        assert_eq!(runner.call_count(), 1);
    }

    #[test]
    fn probe_result_from_exec_error() {
        let r = ProbeResult::from(Result::<String, ExecError>::Err(ExecError::TimedOut {
            command: "./health.sh".to_string(),
            timeout: Duration::from_secs(30),
        }));
        match r {
            ProbeResult::Unhealthy { output, cause } => {
                assert!(output.is_empty());
                assert!(cause.contains("timed out"));
            }
            ProbeResult::Healthy => panic!("timeout must be unhealthy"),
        }
    }

    #[test]
    fn config_is_derived_from_daemon_config() {
        let daemon = ShepherdConfig {
            healthcheck_command: "./hc.sh".to_string(),
            healthcheck_retries: 5,
            ..Default::default()
        };
        let cfg = HealthCheckConfig::from_config(&daemon);
        assert_eq!(cfg.command, "./hc.sh");
        assert_eq!(cfg.retries, 5);
        assert_eq!(cfg.window, daemon.canary_rollout_window);
    }
}

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::OsintTool;
use crate::config::{ExecutionMode, Settings};
use crate::providers::{ProviderError, Providers};
use crate::scan::is_option_like;
use crate::runner::{
    find_result_file, read_result_file, run_command, EventSink, RunOptions, RunnerError,
    ScanEventKind,
};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Runner(RunnerError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("tool '{0}' cannot run without a CLI flag in {1} mode")]
    Unsupported(String, ExecutionMode),
    #[error("target '{0}' must not start with '-'")]
    OptionLikeTarget(String),
    #[error("scan cancelled")]
    Cancelled,
}

impl From<RunnerError> for ScanError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::Cancelled => ScanError::Cancelled,
            other => ScanError::Runner(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub results: Value,
    pub output_file: Option<PathBuf>,
}

/// Executes single scans against providers, the infoooze CLI or the simulator.
pub struct ScanEngine {
    mode: ExecutionMode,
    infoooze_bin: String,
    scan_timeout: Duration,
    simulated_delay: Duration,
    results_dirs: Vec<PathBuf>,
    providers: Providers,
}

impl ScanEngine {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            mode: settings.mode,
            infoooze_bin: settings.infoooze_bin.clone(),
            scan_timeout: settings.scan_timeout,
            simulated_delay: settings.simulated_delay,
            results_dirs: settings.results_dirs.clone(),
            providers: Providers::new(&settings.providers)?,
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub async fn execute(
        &self,
        tool: &OsintTool,
        target: &str,
        cancel: &CancellationToken,
        sink: Option<&EventSink>,
    ) -> Result<ScanOutcome, ScanError> {
        if let Some(kind) = tool.provider {
            let lookup = tokio::select! {
                result = self.providers.lookup(kind, target) => result,
                _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            };
            match lookup {
                Ok(results) => {
                    return Ok(ScanOutcome {
                        results,
                        output_file: None,
                    })
                }
                Err(err) if self.can_fall_back(tool) => {
                    warn!(tool = %tool.id, provider = %kind, %err, "provider lookup failed, falling back to CLI");
                    if let Some(sink) = sink {
                        sink.emit(
                            ScanEventKind::Status,
                            format!("{kind} lookup failed ({err}), running infoooze instead"),
                        );
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        match self.mode {
            ExecutionMode::Cli => self.run_cli(tool, target, cancel, sink).await,
            ExecutionMode::Simulated => self.simulate(tool, target, cancel, sink).await,
        }
    }

    fn can_fall_back(&self, tool: &OsintTool) -> bool {
        self.mode == ExecutionMode::Cli && tool.flag.is_some()
    }

    async fn run_cli(
        &self,
        tool: &OsintTool,
        target: &str,
        cancel: &CancellationToken,
        sink: Option<&EventSink>,
    ) -> Result<ScanOutcome, ScanError> {
        let Some(flag) = tool.flag.as_deref() else {
            return Err(ScanError::Unsupported(tool.id.clone(), self.mode));
        };
        if is_option_like(target) {
            return Err(ScanError::OptionLikeTarget(target.to_string()));
        }
        let options = RunOptions::new(self.scan_timeout).with_cancel(cancel.clone());
        info!(tool = %tool.id, target, bin = %self.infoooze_bin, "running infoooze");
        let output = run_command(&self.infoooze_bin, &[flag, target], &options, sink).await?;

        let mut results = json!({
            "stdout": output.stdout,
            "stderr": output.stderr,
            "exitCode": output.exit_code,
            "dataSource": "infoooze CLI",
        });
        let output_file = find_result_file(
            &self.results_dirs,
            target,
            &tool.id,
            Utc::now().date_naive(),
        )
        .await;
        if let Some(path) = &output_file {
            results["outputFile"] = json!(path.display().to_string());
            if let Some(content) = read_result_file(path).await {
                results["fileContent"] = json!(content);
            }
        }

        Ok(ScanOutcome {
            results,
            output_file,
        })
    }

    async fn simulate(
        &self,
        tool: &OsintTool,
        target: &str,
        cancel: &CancellationToken,
        sink: Option<&EventSink>,
    ) -> Result<ScanOutcome, ScanError> {
        tokio::select! {
            _ = tokio::time::sleep(self.simulated_delay) => {}
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
        }
        let data = format!("Simulated {} run against {}", tool.name, target);
        if let Some(sink) = sink {
            sink.emit(ScanEventKind::Stdout, data.as_str());
        }
        Ok(ScanOutcome {
            results: json!({
                "tool": tool.id,
                "target": target,
                "data": data,
                "timestamp": Utc::now(),
                "simulated": true,
                "dataSource": "simulation",
            }),
            output_file: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolCatalog;

    fn engine(mode: ExecutionMode, bin: &str, delay: Duration) -> ScanEngine {
        let settings = Settings {
            mode,
            infoooze_bin: bin.to_string(),
            simulated_delay: delay,
            results_dirs: Vec::new(),
            ..Settings::default()
        };
        ScanEngine::new(&settings).expect("engine")
    }

    fn tool(id: &str) -> OsintTool {
        ToolCatalog::from_embedded()
            .expect("catalog")
            .get(id)
            .cloned()
            .expect("tool")
    }

    #[tokio::test]
    async fn simulated_results_are_marked() {
        let engine = engine(ExecutionMode::Simulated, "infoooze", Duration::from_millis(10));
        let outcome = engine
            .execute(&tool("whois"), "example.com", &CancellationToken::new(), None)
            .await
            .expect("simulated scan");
        assert_eq!(outcome.results["simulated"], true);
        assert_eq!(outcome.results["target"], "example.com");
    }

    #[tokio::test]
    async fn simulated_scans_can_be_cancelled() {
        let engine = engine(ExecutionMode::Simulated, "infoooze", Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .execute(&tool("whois"), "example.com", &cancel, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
    }

    #[tokio::test]
    async fn provider_failures_are_not_replaced_in_simulated_mode() {
        let engine = engine(ExecutionMode::Simulated, "infoooze", Duration::from_millis(10));
        let err = engine
            .execute(&tool("mail-finder"), "example.com", &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScanError::Provider(ProviderError::MissingApiKey(_))
        ));
    }

    #[tokio::test]
    async fn missing_binary_surfaces_spawn_error() {
        let engine = engine(ExecutionMode::Cli, "reconboard-missing-binary", Duration::ZERO);
        let err = engine
            .execute(&tool("whois"), "example.com", &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Runner(RunnerError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cli_mode_passes_flag_and_target() {
        let engine = engine(ExecutionMode::Cli, "echo", Duration::ZERO);
        let outcome = engine
            .execute(&tool("whois"), "example.com", &CancellationToken::new(), None)
            .await
            .expect("echo runs");
        assert_eq!(outcome.results["stdout"], "-w example.com");
        assert_eq!(outcome.results["exitCode"], 0);
        assert!(outcome.output_file.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cli_mode_refuses_option_like_targets() {
        let engine = engine(ExecutionMode::Cli, "echo", Duration::ZERO);
        let err = engine
            .execute(&tool("whois"), "--version", &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::OptionLikeTarget(target) if target == "--version"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn provider_failure_falls_back_to_cli() {
        let engine = engine(ExecutionMode::Cli, "echo", Duration::ZERO);
        let outcome = engine
            .execute(&tool("mail-finder"), "example.com", &CancellationToken::new(), None)
            .await
            .expect("fallback runs");
        assert_eq!(outcome.results["stdout"], "-m example.com");
    }

    #[tokio::test]
    async fn api_only_tools_fail_without_provider_data() {
        let engine = engine(ExecutionMode::Cli, "echo", Duration::ZERO);
        let err = engine
            .execute(
                &tool("cryptocurrency-trace"),
                "0xde0B295669a9FD93d5F28D9Ec85E40f4cb697BAe",
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Provider(ProviderError::MissingApiKey(_))));
    }
}

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BIND: &str = "0.0.0.0:3001";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://reconboard.db?mode=rwc";
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 300;

/// How scans for CLI-backed tools are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Spawn the infoooze binary.
    Cli,
    /// Wait for the configured delay and return a placeholder marked as simulated.
    Simulated,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionMode::Cli => "cli",
            ExecutionMode::Simulated => "simulated",
        })
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub timeout: Duration,
    pub github_token: Option<String>,
    pub github_url: String,
    pub ipinfo_token: Option<String>,
    pub ipinfo_url: String,
    pub hunter_api_key: Option<String>,
    pub hunter_url: String,
    pub moralis_api_key: Option<String>,
    pub moralis_url: String,
    pub veriphone_api_key: Option<String>,
    pub veriphone_url: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            github_token: None,
            github_url: "https://api.github.com".to_string(),
            ipinfo_token: None,
            ipinfo_url: "https://ipinfo.io".to_string(),
            hunter_api_key: None,
            hunter_url: "https://api.hunter.io".to_string(),
            moralis_api_key: None,
            moralis_url: "https://deep-index.moralis.io/api/v2.2".to_string(),
            veriphone_api_key: None,
            veriphone_url: "https://api.veriphone.io".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub bind: SocketAddr,
    /// `None` keeps all state in memory.
    pub database_url: Option<String>,
    pub tools_config: Option<PathBuf>,
    pub mode: ExecutionMode,
    pub infoooze_bin: String,
    pub scan_timeout: Duration,
    pub simulated_delay: Duration,
    pub history_limit: usize,
    pub results_dirs: Vec<PathBuf>,
    pub allowed_origins: Vec<String>,
    pub rate_limit: RateLimitSettings,
    pub providers: ProviderSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3001)),
            database_url: None,
            tools_config: None,
            mode: ExecutionMode::Cli,
            infoooze_bin: "infoooze".to_string(),
            scan_timeout: Duration::from_secs(DEFAULT_SCAN_TIMEOUT_SECS),
            simulated_delay: Duration::from_millis(2000),
            history_limit: DEFAULT_HISTORY_LIMIT,
            results_dirs: vec![PathBuf::from("./results")],
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            rate_limit: RateLimitSettings {
                max_requests: 100,
                window: Duration::from_secs(15 * 60),
            },
            providers: ProviderSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.scan_timeout.is_zero(), "scan timeout must be greater than zero");
        ensure!(self.history_limit > 0, "history limit must be greater than zero");
        ensure!(
            self.rate_limit.max_requests > 0 && !self.rate_limit.window.is_zero(),
            "rate limit must allow at least one request per non-empty window"
        );
        ensure!(
            !self.infoooze_bin.trim().is_empty(),
            "infoooze binary must not be empty"
        );
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(name = "reconboard-server")]
#[command(version, about = "REST API for OSINT reconnaissance tools", long_about = None)]
pub struct ServerArgs {
    /// Address the HTTP server listens on
    #[arg(long, env = "RECONBOARD_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// SQLite database used to persist scan history and reports
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    pub database_url: String,

    /// Keep history and reports in memory only
    #[arg(long, default_value_t = false)]
    pub no_persist: bool,

    /// YAML tool catalog replacing the built-in one
    #[arg(long, env = "RECONBOARD_TOOLS_CONFIG")]
    pub tools_config: Option<PathBuf>,

    /// Execution mode for CLI-backed tools
    #[arg(long, env = "RECONBOARD_MODE", value_enum, default_value_t = ExecutionMode::Cli)]
    pub mode: ExecutionMode,

    /// Path or name of the infoooze executable
    #[arg(long, env = "INFOOOZE_BIN", default_value = "infoooze")]
    pub infoooze_bin: String,

    /// Seconds before a running tool is killed
    #[arg(long, env = "RECONBOARD_SCAN_TIMEOUT", default_value_t = DEFAULT_SCAN_TIMEOUT_SECS)]
    pub scan_timeout: u64,

    /// Milliseconds a simulated scan takes
    #[arg(long, env = "RECONBOARD_SIMULATED_DELAY_MS", default_value_t = 2000)]
    pub simulated_delay_ms: u64,

    /// Number of finished scans kept in history
    #[arg(long, env = "RECONBOARD_HISTORY_LIMIT", default_value_t = DEFAULT_HISTORY_LIMIT)]
    pub history_limit: usize,

    /// Directories searched for infoooze result files
    #[arg(
        long,
        env = "RECONBOARD_RESULTS_DIRS",
        value_delimiter = ',',
        default_value = "./results"
    )]
    pub results_dirs: Vec<PathBuf>,

    /// Origins allowed by CORS ("*" allows any)
    #[arg(
        long,
        env = "RECONBOARD_ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:3000,http://127.0.0.1:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// Requests allowed per client within one rate limit window
    #[arg(long, env = "RECONBOARD_RATE_LIMIT", default_value_t = 100)]
    pub rate_limit: u32,

    /// Rate limit window in seconds
    #[arg(long, env = "RECONBOARD_RATE_WINDOW", default_value_t = 900)]
    pub rate_window: u64,

    /// Seconds before a provider HTTP request is abandoned
    #[arg(long, env = "RECONBOARD_PROVIDER_TIMEOUT", default_value_t = 10)]
    pub provider_timeout: u64,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub github_url: String,

    #[arg(long, env = "IPINFO_TOKEN", hide_env_values = true)]
    pub ipinfo_token: Option<String>,

    #[arg(long, env = "IPINFO_API_URL", default_value = "https://ipinfo.io")]
    pub ipinfo_url: String,

    #[arg(long, env = "HUNTER_API_KEY", hide_env_values = true)]
    pub hunter_api_key: Option<String>,

    #[arg(long, env = "HUNTER_API_URL", default_value = "https://api.hunter.io")]
    pub hunter_url: String,

    #[arg(long, env = "MORALIS_API_KEY", hide_env_values = true)]
    pub moralis_api_key: Option<String>,

    #[arg(
        long,
        env = "MORALIS_API_URL",
        default_value = "https://deep-index.moralis.io/api/v2.2"
    )]
    pub moralis_url: String,

    #[arg(long, env = "VERIPHONE_API_KEY", hide_env_values = true)]
    pub veriphone_api_key: Option<String>,

    #[arg(long, env = "VERIPHONE_API_URL", default_value = "https://api.veriphone.io")]
    pub veriphone_url: String,
}

impl ServerArgs {
    pub fn into_settings(self) -> Settings {
        Settings {
            bind: self.bind,
            database_url: (!self.no_persist).then_some(self.database_url),
            tools_config: self.tools_config,
            mode: self.mode,
            infoooze_bin: self.infoooze_bin,
            scan_timeout: Duration::from_secs(self.scan_timeout),
            simulated_delay: Duration::from_millis(self.simulated_delay_ms),
            history_limit: self.history_limit,
            results_dirs: self.results_dirs,
            allowed_origins: self
                .allowed_origins
                .into_iter()
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            rate_limit: RateLimitSettings {
                max_requests: self.rate_limit,
                window: Duration::from_secs(self.rate_window),
            },
            providers: ProviderSettings {
                timeout: Duration::from_secs(self.provider_timeout),
                github_token: self.github_token,
                github_url: self.github_url,
                ipinfo_token: self.ipinfo_token,
                ipinfo_url: self.ipinfo_url,
                hunter_api_key: self.hunter_api_key,
                hunter_url: self.hunter_url,
                moralis_api_key: self.moralis_api_key,
                moralis_url: self.moralis_url,
                veriphone_api_key: self.veriphone_api_key,
                veriphone_url: self.veriphone_url,
            },
        }
    }
}

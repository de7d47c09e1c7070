use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde_json::Map;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::catalog::{OsintTool, RiskLevel, ToolCatalog, ToolFilter};
use crate::config::{ExecutionMode, ProviderSettings, Settings, DEFAULT_SCAN_TIMEOUT_SECS};
use crate::engine::ScanEngine;
use crate::runner::{EventSink, ScanEvent, ScanEventKind};
use crate::scan::{is_option_like, ScanRecord};

// ============================================================================
// TERMINAL DESIGN
// ============================================================================

const RECONBOARD_LOGO: &str = r#"
    ____                        __                        __
   / __ \___  _________  ____  / /_  ____  ____ ______ ___/ /
  / /_/ / _ \/ ___/ __ \/ __ \/ __ \/ __ \/ __ `/ ___/ __  /
 / _, _/  __/ /__/ /_/ / / / / /_/ / /_/ / /_/ / /  / /_/ /
/_/ |_|\___/\___/\____/_/ /_/_.___/\____/\__,_/_/   \__,_/
"#;

const TAGLINE: &str = "OSINT reconnaissance from the terminal";
const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// CLI STRUCTURE
// ============================================================================

#[derive(Parser)]
#[command(name = "reconboard")]
#[command(version = VERSION)]
#[command(about = "Run OSINT reconnaissance tools from the command line", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML tool catalog replacing the built-in one
    #[arg(long, global = true, env = "RECONBOARD_TOOLS_CONFIG")]
    tools_config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tool catalog
    #[command(visible_alias = "ls")]
    Tools {
        /// Case-insensitive match on name or description
        #[arg(short, long)]
        search: Option<String>,

        /// Only tools in this category (network, domain, social, file, misc)
        #[arg(short, long)]
        category: Option<String>,

        /// Only tools with this risk level (low, medium, high)
        #[arg(short, long)]
        risk: Option<String>,
    },

    /// Run a single tool against a target
    Scan {
        /// Tool id from the catalog, e.g. whois
        tool: String,

        /// Domain, IP, username, address or URL to investigate
        target: String,

        /// Seconds before the tool is killed
        #[arg(short, long, default_value_t = DEFAULT_SCAN_TIMEOUT_SECS)]
        timeout: u64,

        /// Produce a labelled simulated result instead of running infoooze
        #[arg(long)]
        simulated: bool,

        /// Path or name of the infoooze executable
        #[arg(long, env = "INFOOOZE_BIN", default_value = "infoooze")]
        bin: String,
    },

    /// Show version information
    Version,
}

// ============================================================================
// TERMINAL UI
// ============================================================================

struct TerminalUI;

impl TerminalUI {
    fn show_intro() {
        println!("{}", RECONBOARD_LOGO.bright_cyan().bold());
        println!("{}", "═".repeat(70).bright_black());
        println!("{:^70}", TAGLINE.bright_white().bold());
        println!("{:^70}", format!("v{}", VERSION).bright_black());
        println!("{}", "═".repeat(70).bright_black());
        println!();
    }

    fn print_section(title: &str) {
        println!();
        println!("{}", format!("┌─ {} ", title).bright_white().bold());
        println!("{}", "│".bright_black());
    }

    fn print_section_end() {
        println!("{}", "└─".bright_black());
    }

    fn print_success(message: &str) {
        println!("  {} {}", "✓".bright_green().bold(), message.bright_white());
    }

    fn print_error(message: &str) {
        eprintln!("  {} {}", "✗".bright_red().bold(), message.bright_red());
    }

    fn print_info(message: &str) {
        println!("  {} {}", "ℹ".bright_blue(), message);
    }

    fn risk_badge(risk: RiskLevel) -> ColoredString {
        match risk {
            RiskLevel::Low => "low".bright_green(),
            RiskLevel::Medium => "medium".bright_yellow(),
            RiskLevel::High => "high".bright_red().bold(),
        }
    }

    fn print_tool(tool: &OsintTool) {
        let flag = tool.flag.as_deref().unwrap_or("api");
        println!(
            "  {:<22} {:<5} {:<8} {:<7} {}",
            tool.id.bright_cyan().bold(),
            flag.bright_black(),
            tool.category.as_str(),
            Self::risk_badge(tool.risk_level),
            tool.description
        );
    }
}

// ============================================================================
// COMMAND DISPATCH
// ============================================================================

pub struct ReconboardCli;

impl ReconboardCli {
    pub async fn run() -> Result<()> {
        let cli = Cli::parse();
        init_tracing(cli.verbose);

        let catalog = match &cli.tools_config {
            Some(path) => ToolCatalog::from_path(path)?,
            None => ToolCatalog::from_embedded()?,
        };

        match cli.command {
            None => {
                TerminalUI::show_intro();
                TerminalUI::print_info("Run `reconboard --help` to list commands.");
                Ok(())
            }
            Some(Commands::Tools {
                search,
                category,
                risk,
            }) => {
                Self::cmd_tools(
                    &catalog,
                    &ToolFilter {
                        search,
                        category,
                        risk,
                    },
                );
                Ok(())
            }
            Some(Commands::Scan {
                tool,
                target,
                timeout,
                simulated,
                bin,
            }) => Self::cmd_scan(&catalog, &tool, &target, timeout, simulated, bin).await,
            Some(Commands::Version) => {
                Self::cmd_version(&catalog);
                Ok(())
            }
        }
    }

    fn cmd_tools(catalog: &ToolCatalog, filter: &ToolFilter) {
        let tools = catalog.filter(filter);
        TerminalUI::print_section(&format!("TOOLS ({} of {})", tools.len(), catalog.len()));
        if tools.is_empty() {
            TerminalUI::print_info("No tools match the given filters.");
        }
        for tool in &tools {
            TerminalUI::print_tool(tool);
        }
        TerminalUI::print_section_end();
    }

    async fn cmd_scan(
        catalog: &ToolCatalog,
        tool_id: &str,
        target: &str,
        timeout: u64,
        simulated: bool,
        bin: String,
    ) -> Result<()> {
        let tool = catalog
            .get(tool_id)
            .ok_or_else(|| anyhow!("Invalid tool '{tool_id}'"))?;
        let target = target.trim();
        if target.is_empty() {
            return Err(anyhow!("target must not be empty"));
        }
        if is_option_like(target) {
            return Err(anyhow!("target must not start with '-'"));
        }

        let settings = Settings {
            mode: if simulated {
                ExecutionMode::Simulated
            } else {
                ExecutionMode::Cli
            },
            infoooze_bin: bin,
            scan_timeout: Duration::from_secs(timeout),
            providers: provider_settings_from_env(),
            ..Settings::default()
        };
        settings.validate()?;
        let engine = ScanEngine::new(&settings)?;

        TerminalUI::print_section(&format!("SCAN {} → {}", tool.name, target));
        let mut record = ScanRecord::new(tool, target.to_string(), Map::new());
        record.mark_running();

        let (sender, receiver) = broadcast::channel(256);
        let sink = EventSink::new(record.id.clone(), sender);
        let printer = tokio::spawn(print_events(receiver));

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });

        let outcome = engine.execute(tool, target, &cancel, Some(&sink)).await;
        watcher.abort();
        sink.emit(ScanEventKind::Complete, "done");
        drop(sink);
        match printer.await {
            Ok(0) => {}
            Ok(missed) => TerminalUI::print_info(&format!("{missed} output lines were not shown")),
            Err(err) => debug!(?err, "event printer stopped"),
        }

        let failure = match outcome {
            Ok(outcome) => {
                let output_file = outcome
                    .output_file
                    .map(|path| path.display().to_string());
                record.mark_completed(outcome.results, output_file);
                None
            }
            Err(err) => {
                let message = err.to_string();
                record.mark_failed(message.clone());
                Some(message)
            }
        };
        TerminalUI::print_section_end();

        let rendered =
            serde_json::to_string_pretty(&record).context("failed to render scan result")?;
        println!("{rendered}");

        match failure {
            None => {
                TerminalUI::print_success(&format!(
                    "{} finished in {} ms",
                    tool.name,
                    record.duration.unwrap_or_default()
                ));
                Ok(())
            }
            Some(message) => {
                TerminalUI::print_error(&message);
                Err(anyhow!("scan {} failed", record.id))
            }
        }
    }

    fn cmd_version(catalog: &ToolCatalog) {
        println!("{} v{}", "reconboard".bright_cyan().bold(), VERSION);
        println!("{}", TAGLINE);
        println!("Tools in catalog: {}", catalog.len());
    }
}

/// Prints scan output until a terminal event arrives or the channel closes.
/// Returns how many events were skipped because the printer fell behind.
async fn print_events(mut receiver: broadcast::Receiver<ScanEvent>) -> u64 {
    let mut missed = 0;
    loop {
        match receiver.recv().await {
            Ok(event) => match event.kind {
                ScanEventKind::Stdout => println!("  {} {}", "│".bright_black(), event.data),
                ScanEventKind::Stderr => {
                    eprintln!("  {} {}", "│".bright_black(), event.data.bright_yellow())
                }
                ScanEventKind::Status => TerminalUI::print_info(&event.data),
                ScanEventKind::Complete | ScanEventKind::Cancelled => break,
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "scan output arrived faster than it could be printed");
                missed += skipped;
            }
            Err(RecvError::Closed) => break,
        }
    }
    missed
}

fn provider_settings_from_env() -> ProviderSettings {
    let var = |name: &str| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    ProviderSettings {
        github_token: var("GITHUB_TOKEN"),
        ipinfo_token: var("IPINFO_TOKEN"),
        hunter_api_key: var("HUNTER_API_KEY"),
        moralis_api_key: var("MORALIS_API_KEY"),
        veriphone_api_key: var("VERIPHONE_API_KEY"),
        ..ProviderSettings::default()
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "reconboard=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

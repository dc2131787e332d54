//! CLI command definitions, routing, and tracing setup.

use std::io::Write;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use sitechat_core::{Collaborators, SiteChat};
use sitechat_crawler::{CrawlProgress, CrawlReport};
use sitechat_shared::{AppConfig, generation_api_key, init_config, load_config};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SiteChat: a website-grounded support assistant.
#[derive(Parser)]
#[command(
    name = "sitechat",
    version,
    about = "Scan a website and chat with an assistant grounded in its content.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl a site and assemble its context prompt.
    Scan {
        /// Site URL to scan.
        url: String,

        /// Rescan even if a fresh context is cached.
        #[arg(long)]
        force: bool,

        /// Print the assembled prompt.
        #[arg(long)]
        print: bool,
    },

    /// Start an interactive conversation about a site.
    Chat {
        /// Site URL to chat about.
        url: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sitechat=info",
        1 => "sitechat=debug",
        _ => "sitechat=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Scan { url, force, print } => cmd_scan(&url, force, print).await,
        Command::Chat { url } => cmd_chat(&url).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

async fn cmd_scan(url: &str, force: bool, print: bool) -> Result<()> {
    let config = load_config()?;
    let progress = Arc::new(CliProgress::new());
    let collaborators = Collaborators::from_config(&config)?.with_progress(progress.clone());
    let chat = SiteChat::new(&config, collaborators)?;

    info!(url, force, "scanning site");
    let result = chat.scan(url, force).await;
    // A cached result never reaches `finished`.
    progress.spinner.finish_and_clear();
    let result = result?;

    println!();
    println!("  Sections: {}", result.section_count);
    println!("  Scanned:  {}", result.last_scan_at.to_rfc3339());
    println!("  Cached:   {}", if result.from_cache { "yes" } else { "no" });
    println!();

    if print {
        println!("{}", result.prompt_text);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// chat
// ---------------------------------------------------------------------------

async fn cmd_chat(url: &str) -> Result<()> {
    let config = load_config()?;
    if let Err(e) = generation_api_key(&config.generation) {
        warn!(error = %e, "replies will fall back to a fixed apology");
    }

    let chat = SiteChat::from_config(&config)?;
    let mut session = chat.open_session(url)?;

    println!("Chatting about {}. Type /status for session info, /quit to exit.", session.site_url());
    println!("(The first question scans the site and may take a while.)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        match query {
            "" => continue,
            "/quit" | "/exit" => break,
            "/status" => {
                println!("{}", serde_json::to_string_pretty(&session.status())?);
            }
            _ => {
                let reply = session.ask(query).await;
                println!();
                println!("{}", reply.response);
                println!("  [{}]", reply.source);
                println!();
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Crawl spinner using indicatif.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl CrawlProgress for CliProgress {
    fn page_scanned(&self, url: &str, scanned: usize, max_pages: usize) {
        self.spinner
            .set_message(format!("Scanning [{scanned}/{max_pages}] {url}"));
    }

    fn finished(&self, report: &CrawlReport) {
        self.spinner.finish_and_clear();
        if !report.failures.is_empty() {
            println!("  {} page(s) could not be fetched", report.failures.len());
        }
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::LazyLock;

static VERSION_INFO: LazyLock<String> = LazyLock::new(|| {
    let version = env!("CARGO_PKG_VERSION");

    let commit = option_env!("VERGEN_GIT_SHA")
        .map(|s| s.chars().take(7).collect::<String>())
        .unwrap_or_else(|| "unknown".to_string());
    let dirty = match option_env!("VERGEN_GIT_DIRTY") {
        Some("true") => " (dirty)",
        _ => "",
    };

    let built = option_env!("VERGEN_BUILD_DATE").unwrap_or("unknown");
    let target = option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown");
    let rustc = option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown");

    format!(
        "{version}\ncommit: {commit}{dirty}\nbuilt: {built}\ntarget: {target}\nrustc: {rustc}"
    )
});

pub fn version_info() -> &'static str {
    &VERSION_INFO
}

/// Default output file when neither `--output` nor the profile names one.
pub const DEFAULT_OUTPUT: &str = "mneme-items.jsonl";

/// Default ledger database when neither `--ledger` nor the profile names one.
pub const DEFAULT_LEDGER: &str = "mneme-ledger.db";

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "mneme")]
#[command(
    author,
    version = version_info(),
    about = "Resumable harvester for account timelines"
)]
#[command(after_help = "Examples:
  mneme harvest accounts.txt
  mneme harvest ids.txt --ids --validate --output timelines.jsonl
  mneme validate accounts.txt
  mneme ledger status
  mneme ledger reset-failed

Targets file: one handle (or numeric id with --ids) per line.
Blank lines and lines starting with '#' are ignored.")]
pub struct Config {
    /// Base URL of the timeline API
    #[arg(long, env = "MNEME_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Bearer token for the timeline API (required by harvest and validate)
    #[arg(long, env = "MNEME_BEARER_TOKEN", hide_env_values = true, global = true)]
    pub bearer_token: Option<String>,

    /// Progress ledger database
    #[arg(long, env = "MNEME_LEDGER", value_name = "PATH", global = true)]
    pub ledger: Option<PathBuf>,

    /// Custom path to mneme.toml profile
    #[arg(long, value_name = "PATH", global = true)]
    pub profile: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Harvest the timelines of every identity in a targets file
    #[command(after_help = "Examples:
  mneme harvest accounts.txt                  # Skip identities already in the ledger
  mneme harvest accounts.txt --retry-failed   # Also retry identities that failed before
  mneme harvest ids.txt --ids --validate      # Numeric ids, checked before harvesting
  mneme harvest accounts.txt --concurrency 4  # Four identities in flight")]
    Harvest {
        /// File listing the identities to harvest
        #[arg(value_name = "TARGETS_FILE")]
        targets_file: PathBuf,

        /// Treat targets as numeric account ids instead of handles
        #[arg(long)]
        ids: bool,

        /// Look up every identity before harvesting and record unknown ones as failed
        #[arg(long)]
        validate: bool,

        /// Retry identities the ledger records as failed
        #[arg(long)]
        retry_failed: bool,

        /// Items requested per timeline page (1-200)
        #[arg(long, value_name = "N")]
        page_size: Option<u32>,

        /// Number of identities harvested at once
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,

        /// JSON Lines file items are appended to
        #[arg(short, long, env = "MNEME_OUTPUT", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Check which identities in a targets file the service knows about
    #[command(after_help = "Example: mneme validate accounts.txt")]
    Validate {
        /// File listing the identities to check
        #[arg(value_name = "TARGETS_FILE")]
        targets_file: PathBuf,

        /// Treat targets as numeric account ids instead of handles
        #[arg(long)]
        ids: bool,
    },
    /// Inspect or edit the progress ledger
    Ledger {
        #[command(subcommand)]
        action: LedgerCommand,
    },
}

/// Ledger maintenance commands
#[derive(Subcommand, Debug)]
pub enum LedgerCommand {
    /// Show processed and failed counts, and the recorded failures
    Status,
    /// Forget one identity so the next harvest starts it from scratch
    Reset {
        /// Handle or numeric id
        identity: String,

        /// Treat the identity as a numeric account id
        #[arg(long)]
        ids: bool,
    },
    /// Forget every failed identity
    ResetFailed,
}

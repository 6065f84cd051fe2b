//! Clap derive structures for the `basis` CLI.
//!
//! Defines the command tree, global flags, and shared value enums. Kept
//! free of workspace imports so `build.rs` can include it for man pages.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// basis -- monitor Basis smart panels and control circuit standby
#[derive(Debug, Parser)]
#[command(
    name = "basis",
    version,
    about = "Monitor Basis smart panels from the command line",
    long_about = "Reads live telemetry and energy statistics for every panel on a\n\
        Basis cloud account and toggles circuit standby.\n\n\
        Authenticate once with `basis auth set-tokens`; tokens are refreshed\n\
        and stored automatically afterwards.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Account profile to use
    #[arg(long, short = 'p', env = "BASIS_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Cloud API base URL (overrides profile)
    #[arg(long, env = "BASIS_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "BASIS_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format on stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "BASIS_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Where OAuth2 tokens are kept
    #[arg(long, env = "BASIS_TOKEN_STORE", default_value = "keyring", global = true)]
    pub token_store: TokenStoreKind,
}

// ── Value Enums ──────────────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TokenStoreKind {
    /// System keyring
    Keyring,
    /// JSON file in the user data directory
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PeriodArg {
    Day,
    Month,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StandbyState {
    /// Put the circuit in standby
    On,
    /// Return the circuit to live
    Off,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List panels with live power and connectivity
    #[command(alias = "p")]
    Panels,

    /// List circuits with live readings and standby state
    #[command(alias = "c")]
    Circuits(CircuitsArgs),

    /// Show imported and exported energy per panel
    Stats(StatsArgs),

    /// Follow the live snapshot until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Toggle standby for a circuit
    Standby(StandbyArgs),

    /// Manage stored OAuth2 tokens
    Auth(AuthArgs),

    /// Inspect CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Data commands ────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CircuitsArgs {
    /// Only circuits of this panel
    #[arg(long)]
    pub panel: Option<String>,

    /// Hide spare circuits
    #[arg(long)]
    pub hide_spare: bool,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Statistics period (all periods when omitted)
    #[arg(long)]
    pub period: Option<PeriodArg>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Telemetry poll interval in seconds (overrides profile)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Also print circuit rows on every update
    #[arg(long)]
    pub circuits: bool,
}

#[derive(Debug, Args)]
pub struct StandbyArgs {
    /// Circuit id
    pub circuit: String,

    /// Desired state
    pub state: StandbyState,

    /// Panel id (needed only when the circuit id is ambiguous)
    #[arg(long)]
    pub panel: Option<String>,
}

// ── Auth ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommand,
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Store a token pair obtained from the authorization-code flow
    SetTokens {
        /// Access token
        #[arg(long, env = "BASIS_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,

        /// Refresh token
        #[arg(long, env = "BASIS_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: String,

        /// Access token lifetime in seconds
        #[arg(long, default_value = "3600")]
        expires_in: i64,
    },

    /// Show whether tokens are stored and when the access token expires
    Status,

    /// Remove stored tokens
    Logout,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display the resolved profile
    Show,

    /// Write a default config file if none exists
    Init,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

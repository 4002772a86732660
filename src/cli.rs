use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision this host: packages, hostname, VPN, user, keys, firewall, sshd, updates
    Apply(ApplyArgs),

    /// Resolve the configuration and print the planned steps without changing anything
    Validate(ValidateArgs),

    /// Generate a point-to-point WireGuard tunnel (server and client configs)
    Tunnel(ApplyArgs),

    /// Generate shell completion scripts
    Completions(CompletionsArgs),
}

/// Flags shared by every subcommand that reads settings.
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Optional YAML settings file; environment variables override its values
    #[arg(short, long)]
    pub file: Option<Utf8PathBuf>,

    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Filesystem root of the host to provision
    #[arg(long, default_value = "/")]
    pub root: Utf8PathBuf,

    /// Do not change anything, just show what would be done
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Represents log levels for controlling the verbosity of logging output.
///
/// This enum maps directly to the log levels used by the `tracing` crate:
/// - `Trace`: Designates very detailed application-level information.
/// - `Debug`: Designates information useful for debugging, such as every command run.
/// - `Info`: Designates general operational messages, such as step progress.
/// - `Warn`: Designates potentially harmful situations.
/// - `Error`: Designates error events.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Commands {
    /// Log level requested for this command; completions log errors only.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Apply(opts) | Self::Tunnel(opts) => opts.common.log_level,
            Self::Validate(opts) => opts.common.log_level,
            Self::Completions(_) => LogLevel::Error,
        }
    }
}

pub fn parse_args() -> Result<Cli> {
    Ok(Cli::parse())
}

pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod executor;
pub mod facts;
pub mod host;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod step;
pub mod tunnel;

pub use error::ProvisionError;

use std::fmt::Write as _;
use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::Shell;
use tracing::info;
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

use crate::config::{ConfigResolver, Configuration, gather_settings};
use crate::executor::CommandExecutor;
use crate::facts::compute_fqdns;
use crate::host::Host;
use crate::orchestrator::Orchestrator;
use crate::registry::{Profile, StepRegistry};
use crate::report::ProvisioningReport;
use crate::step::Step;
use crate::tunnel::{TunnelOutcome, TunnelProvisioner};

pub fn init_logging(log_level: cli::LogLevel) -> Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => LevelFilter::TRACE,
        cli::LogLevel::Debug => LevelFilter::DEBUG,
        cli::LogLevel::Info => LevelFilter::INFO,
        cli::LogLevel::Warn => LevelFilter::WARN,
        cli::LogLevel::Error => LevelFilter::ERROR,
    };

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_max_level(filter).finish(),
    )
    .context("failed to set global default tracing subscriber")
}

/// Refuses to change the live system without root privileges.
///
/// Dry runs and runs against an alternate root are allowed for any user.
fn ensure_privileges(opts: &cli::ApplyArgs) -> Result<(), ProvisionError> {
    if opts.dry_run || opts.root != "/" {
        return Ok(());
    }
    if rustix::process::geteuid().is_root() {
        return Ok(());
    }
    Err(ProvisionError::Configuration(
        "must run as root (try sudo), or pass --dry-run or --root".to_string(),
    ))
}

fn resolve_configuration<I, K, V>(common: &cli::CommonArgs, vars: I) -> Result<Configuration>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let settings = gather_settings(common.file.as_deref(), vars).context("failed to load settings")?;
    Ok(ConfigResolver::new(settings).resolve()?)
}

/// Runs the provisioning profile against the host at `opts.root`.
///
/// Configuration errors and fact-gathering errors are returned as `Err`;
/// step failures are recorded in the returned report.
pub fn run_apply<I, K, V>(
    opts: &cli::ApplyArgs,
    vars: I,
    executor: Arc<dyn CommandExecutor>,
) -> Result<ProvisioningReport>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let config = resolve_configuration(&opts.common, vars)?;
    ensure_privileges(opts)?;

    let profile = Profile::for_config(&config);
    let steps = StepRegistry::steps(profile);
    info!("using profile {} with {} step(s)", profile, steps.len());

    let host = Host::new(opts.root.clone(), executor, opts.dry_run);
    let report = Orchestrator::new(&steps)
        .run(&config, &host)
        .context("failed to gather host facts")?;
    Ok(report)
}

/// Resolves the configuration and renders the plan `apply` would follow.
pub fn run_validate<I, K, V>(opts: &cli::ValidateArgs, vars: I) -> Result<String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let config = resolve_configuration(&opts.common, vars)?;
    let profile = Profile::for_config(&config);
    info!("validation successful:\n{:#?}", config);

    let mut plan = String::new();
    let fqdns = compute_fqdns(&config.short_hostname, &config.primary_domain, &config.extra_domains);
    let target = facts::resolve_target_user(&config)?;
    writeln!(plan, "profile:     {}", profile)?;
    writeln!(plan, "hostname:    {}", config.short_hostname)?;
    writeln!(plan, "fqdns:       {}", fqdns.join(", "))?;
    writeln!(plan, "ssh port:    {}", config.ssh_port)?;
    writeln!(plan, "keep port 22: {}", config.keep_legacy_port)?;
    writeln!(plan, "user mode:   {}", config.user_mode)?;
    writeln!(plan, "target user: {}", target)?;
    writeln!(plan, "key source:  {}", config.key_source)?;
    writeln!(plan, "steps:")?;
    for (index, step) in StepRegistry::steps(profile).iter().enumerate() {
        writeln!(plan, "  {}. {}", index + 1, step.name())?;
    }
    Ok(plan)
}

/// Provisions the WireGuard tunnel on the host at `opts.root`.
pub fn run_tunnel<I, K, V>(
    opts: &cli::ApplyArgs,
    vars: I,
    executor: Arc<dyn CommandExecutor>,
) -> Result<TunnelOutcome>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let settings =
        gather_settings(opts.common.file.as_deref(), vars).context("failed to load settings")?;
    let tunnel = ConfigResolver::new(settings).resolve_tunnel()?;
    ensure_privileges(opts)?;

    let host = Host::new(opts.root.clone(), executor, opts.dry_run);
    TunnelProvisioner::new(&host, &tunnel)
        .run()
        .with_context(|| format!("failed to provision tunnel {}", tunnel.interface))
}

/// Writes a completion script for `shell` to `out`.
pub fn write_completions(shell: Shell, out: &mut dyn io::Write) {
    let mut cmd = cli::Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, out);
}

/// Writes a completion script for `shell` to stdout.
pub fn print_completions(shell: Shell) {
    write_completions(shell, &mut io::stdout());
}

//! Host firewall (ufw) rule set.
//!
//! The rule set is built as a [`FirewallPlan`] first and only then turned
//! into commands, so the ordering guarantee (the SSH port is allowed before
//! the firewall is enabled) can be checked without running anything.

use std::fmt;

use anyhow::{Context, Result, bail};
use strum::Display;
use tracing::info;

use super::{Precondition, StepContext};
use crate::config::{Configuration, LEGACY_SSH_PORT};
use crate::executor::CommandSpec;

/// Interface the mesh VPN agent creates.
pub const MESH_INTERFACE: &str = "tailscale0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Policy {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// One ufw invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirewallRule {
    Reset,
    DefaultIncoming(Policy),
    DefaultOutgoing(Policy),
    AllowPort(u16, Protocol),
    AllowInterface(String),
    Enable,
}

impl FirewallRule {
    pub fn to_command(&self) -> CommandSpec {
        let args: Vec<String> = match self {
            Self::Reset => vec!["--force".into(), "reset".into()],
            Self::DefaultIncoming(policy) => {
                vec!["default".into(), policy.to_string(), "incoming".into()]
            }
            Self::DefaultOutgoing(policy) => {
                vec!["default".into(), policy.to_string(), "outgoing".into()]
            }
            Self::AllowPort(port, proto) => vec!["allow".into(), format!("{}/{}", port, proto)],
            Self::AllowInterface(iface) => {
                vec!["allow".into(), "in".into(), "on".into(), iface.clone()]
            }
            Self::Enable => vec!["--force".into(), "enable".into()],
        };
        CommandSpec::new("ufw", args)
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_command())
    }
}

/// Ordered firewall rules for one configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallPlan {
    rules: Vec<FirewallRule>,
}

impl FirewallPlan {
    pub fn for_config(config: &Configuration) -> Self {
        let mut rules = vec![
            FirewallRule::Reset,
            FirewallRule::DefaultIncoming(Policy::Deny),
            FirewallRule::DefaultOutgoing(Policy::Allow),
        ];
        if config.keep_legacy_port && config.ssh_port != LEGACY_SSH_PORT {
            rules.push(FirewallRule::AllowPort(LEGACY_SSH_PORT, Protocol::Tcp));
        }
        rules.push(FirewallRule::AllowPort(config.ssh_port, Protocol::Tcp));
        rules.push(FirewallRule::AllowInterface(MESH_INTERFACE.to_string()));
        rules.push(FirewallRule::Enable);
        Self { rules }
    }

    pub fn rules(&self) -> &[FirewallRule] {
        &self.rules
    }

    /// Position of the rule allowing `port`/tcp, if any.
    pub fn position_of_port(&self, port: u16) -> Option<usize> {
        self.rules
            .iter()
            .position(|r| *r == FirewallRule::AllowPort(port, Protocol::Tcp))
    }

    pub fn position_of_enable(&self) -> Option<usize> {
        self.rules.iter().position(|r| *r == FirewallRule::Enable)
    }
}

/// Resets ufw to a deny-by-default rule set that keeps SSH reachable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirewallStep;

impl FirewallStep {
    /// The rule set is rebuilt from scratch each run.
    pub fn precondition(&self, _ctx: &StepContext<'_>) -> Result<Precondition> {
        Ok(Precondition::Pending)
    }

    pub fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        let plan = FirewallPlan::for_config(ctx.config);
        let total = plan.rules().len();
        for (index, rule) in plan.rules().iter().enumerate() {
            tracing::debug!("firewall rule {}/{}: {}", index + 1, total, rule);
            ctx.host
                .run(&rule.to_command())
                .with_context(|| format!("failed to apply firewall rule `{}`", rule))?;
        }
        info!("firewall enabled; ssh allowed on {}/tcp", ctx.config.ssh_port);
        Ok(())
    }

    pub fn verify(&self, ctx: &StepContext<'_>) -> Result<()> {
        let result = ctx
            .host
            .run(&CommandSpec::new("ufw", ["status"]).capturing_stdout())
            .context("failed to read firewall status")?;
        if let Some(status) = result.stdout {
            if !status.contains("Status: active") {
                bail!("firewall is not active");
            }
            let rule = format!("{}/tcp", ctx.config.ssh_port);
            if !status_allows(&status, &rule) {
                bail!("firewall does not allow {}", rule);
            }
        }
        Ok(())
    }
}

/// Returns true if a `ufw status` rule line starts with exactly `rule`.
fn status_allows(status: &str, rule: &str) -> bool {
    status
        .lines()
        .any(|line| line.split_whitespace().next() == Some(rule) && line.contains("ALLOW"))
}

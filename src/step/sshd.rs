//! SSH daemon hardening through a drop-in file.

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use super::{Precondition, StepContext};
use crate::config::{Configuration, LEGACY_SSH_PORT};
use crate::document::{SshdConfig, SshdDropIn};
use crate::document::sshd::DROP_IN_INCLUDE;
use crate::error::ProvisionError;
use crate::executor::CommandSpec;

pub const SSHD_CONFIG_PATH: &str = "/etc/ssh/sshd_config";
/// sshd keeps the first value it reads and includes drop-ins in lexical
/// order, so this name must sort before cloud images' `50-cloud-init.conf`.
pub const HARDENING_DROP_IN: &str = "/etc/ssh/sshd_config.d/00-hostprep-hardening.conf";

/// Ports sshd listens on: the legacy port first while it is kept open.
pub fn listen_ports(config: &Configuration) -> Vec<u16> {
    if config.keep_legacy_port && config.ssh_port != LEGACY_SSH_PORT {
        vec![LEGACY_SSH_PORT, config.ssh_port]
    } else {
        vec![config.ssh_port]
    }
}

/// Disables password and root login and moves sshd to the configured port.
///
/// The daemon is reloaded, never restarted, so existing sessions survive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardenSshdStep;

impl HardenSshdStep {
    fn main_config(ctx: &StepContext<'_>) -> Result<(String, SshdConfig)> {
        let content = ctx
            .host
            .read_optional(SSHD_CONFIG_PATH)?
            .ok_or_else(|| ProvisionError::Document {
                document: SSHD_CONFIG_PATH.to_string(),
                message: "file not found; is openssh-server installed?".to_string(),
            })?;
        let parsed = SshdConfig::parse(&content);
        Ok((content, parsed))
    }

    fn desired_drop_in(ctx: &StepContext<'_>) -> String {
        SshdDropIn::hardening(&listen_ports(ctx.config)).render()
    }

    fn effective_config_command(ctx: &StepContext<'_>) -> CommandSpec {
        CommandSpec::new(
            "sshd",
            ["-T".to_string(), "-f".to_string(), ctx.host.path(SSHD_CONFIG_PATH).to_string()],
        )
        .capturing_stdout()
    }

    fn validate_command(ctx: &StepContext<'_>) -> CommandSpec {
        CommandSpec::new(
            "sshd",
            ["-t".to_string(), "-f".to_string(), ctx.host.path(SSHD_CONFIG_PATH).to_string()],
        )
    }

    pub fn precondition(&self, ctx: &StepContext<'_>) -> Result<Precondition> {
        let (_, main) = Self::main_config(ctx)?;
        let drop_in = ctx.host.read_optional(HARDENING_DROP_IN)?;
        if main.includes(DROP_IN_INCLUDE) && drop_in.as_deref() == Some(Self::desired_drop_in(ctx).as_str()) {
            return Ok(Precondition::Satisfied(format!(
                "sshd already hardened on port {}",
                ctx.config.ssh_port
            )));
        }
        Ok(Precondition::Pending)
    }

    pub fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        let host = ctx.host;
        let (original_main, mut main) = Self::main_config(ctx)?;

        let main_changed = main.ensure_include(DROP_IN_INCLUDE);
        if main_changed {
            host.backup(SSHD_CONFIG_PATH)?;
            host.write_file(SSHD_CONFIG_PATH, &main.render(), 0o644)?;
            info!("added `Include {}` to {}", DROP_IN_INCLUDE, SSHD_CONFIG_PATH);
        }

        let previous = host.read_optional(HARDENING_DROP_IN)?;
        host.write_file(HARDENING_DROP_IN, &Self::desired_drop_in(ctx), 0o644)?;

        if let Err(e) = host.run(&Self::validate_command(ctx)) {
            warn!("sshd rejected the new configuration; restoring the previous state");
            match previous {
                Some(content) => host.write_file(HARDENING_DROP_IN, &content, 0o644)?,
                None => host.remove_file(HARDENING_DROP_IN)?,
            }
            if main_changed {
                host.write_file(SSHD_CONFIG_PATH, &original_main, 0o644)?;
            }
            return Err(e.context("sshd configuration validation failed"));
        }

        host.run(&CommandSpec::new("systemctl", ["reload", "ssh"]))
            .context("failed to reload sshd")?;
        let ports: Vec<String> = listen_ports(ctx.config).iter().map(u16::to_string).collect();
        info!("sshd hardened and listening on port(s) {}", ports.join(", "));
        Ok(())
    }

    pub fn verify(&self, ctx: &StepContext<'_>) -> Result<()> {
        if ctx.host.read_optional(HARDENING_DROP_IN)?.as_deref()
            != Some(Self::desired_drop_in(ctx).as_str())
        {
            bail!("{} does not hold the hardening policy", HARDENING_DROP_IN);
        }
        ctx.host
            .run(&Self::validate_command(ctx))
            .context("sshd configuration no longer validates")?;
        let effective = ctx
            .host
            .run(&Self::effective_config_command(ctx))
            .context("failed to read the effective sshd configuration")?;
        if let Some(output) = effective.stdout {
            let unmet = SshdDropIn::hardening(&listen_ports(ctx.config)).unmet_in(&output);
            if !unmet.is_empty() {
                bail!("sshd does not enforce: {}", unmet.join(", "));
            }
        }
        Ok(())
    }
}

//! Hostname, cloud-init preservation and the loopback alias in `/etc/hosts`.

use anyhow::{Context, Result, bail};
use tracing::info;

use super::{Precondition, StepContext};
use crate::document::HostsFile;
use crate::document::hosts::LOOPBACK_ALIAS_ADDRESS;
use crate::executor::CommandSpec;

pub const HOSTNAME_PATH: &str = "/etc/hostname";
pub const HOSTS_PATH: &str = "/etc/hosts";
pub const CLOUD_INIT_DROP_IN: &str = "/etc/cloud/cloud.cfg.d/99-hostprep-preserve-hostname.cfg";

const CLOUD_INIT_CONTENT: &str = "# Managed by hostprep.\npreserve_hostname: true\nmanage_etc_hosts: false\n";

/// Sets the short hostname and maps every FQDN to the loopback alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetHostnameStep;

impl SetHostnameStep {
    fn desired_hosts(ctx: &StepContext<'_>) -> Result<(HostsFile, bool)> {
        let current = ctx.host.read_optional(HOSTS_PATH)?.unwrap_or_default();
        let mut hosts = HostsFile::parse(&current);
        let names = ctx.facts.hosts_names(&ctx.config.short_hostname);
        let changed = hosts.upsert(LOOPBACK_ALIAS_ADDRESS, &names);
        Ok((hosts, changed))
    }

    fn hostname_current(ctx: &StepContext<'_>) -> Result<bool> {
        let current = ctx.host.read_optional(HOSTNAME_PATH)?;
        Ok(current.as_deref().map(str::trim) == Some(ctx.config.short_hostname.as_str()))
    }

    fn cloud_init_current(ctx: &StepContext<'_>) -> Result<bool> {
        Ok(ctx.host.read_optional(CLOUD_INIT_DROP_IN)?.as_deref() == Some(CLOUD_INIT_CONTENT))
    }

    pub fn precondition(&self, ctx: &StepContext<'_>) -> Result<Precondition> {
        let (_, hosts_changed) = Self::desired_hosts(ctx)?;
        if !hosts_changed && Self::hostname_current(ctx)? && Self::cloud_init_current(ctx)? {
            return Ok(Precondition::Satisfied(format!(
                "hostname is already {}",
                ctx.config.short_hostname
            )));
        }
        Ok(Precondition::Pending)
    }

    pub fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        let short = &ctx.config.short_hostname;

        ctx.host
            .run(&CommandSpec::new("hostnamectl", ["set-hostname", short.as_str()]))
            .context("failed to set hostname")?;
        if !Self::hostname_current(ctx)? {
            ctx.host.write_file(HOSTNAME_PATH, &format!("{}\n", short), 0o644)?;
        }

        if !Self::cloud_init_current(ctx)? {
            ctx.host.write_file(CLOUD_INIT_DROP_IN, CLOUD_INIT_CONTENT, 0o644)?;
            info!("cloud-init will preserve the hostname");
        }

        let (hosts, changed) = Self::desired_hosts(ctx)?;
        if changed {
            ctx.host.backup(HOSTS_PATH)?;
            ctx.host.write_file(HOSTS_PATH, &hosts.render(), 0o644)?;
            info!(
                "mapped {} to {}",
                LOOPBACK_ALIAS_ADDRESS,
                ctx.facts.hosts_names(short).join(" ")
            );
        } else {
            info!("{} alias line already up to date", HOSTS_PATH);
        }
        Ok(())
    }

    pub fn verify(&self, ctx: &StepContext<'_>) -> Result<()> {
        if !Self::hostname_current(ctx)? {
            bail!("{} does not contain {}", HOSTNAME_PATH, ctx.config.short_hostname);
        }
        let hosts = HostsFile::parse(&ctx.host.read_optional(HOSTS_PATH)?.unwrap_or_default());
        let expected = ctx.facts.hosts_names(&ctx.config.short_hostname);
        let mapped = hosts.names_for(LOOPBACK_ALIAS_ADDRESS).unwrap_or_default();
        if !mapped.iter().copied().eq(expected.iter().map(String::as_str)) {
            bail!(
                "{} does not map {} to {}",
                HOSTS_PATH,
                LOOPBACK_ALIAS_ADDRESS,
                expected.join(" ")
            );
        }
        Ok(())
    }
}

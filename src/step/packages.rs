//! Package index refresh, upgrade and base tooling install.

use anyhow::{Context, Result, bail};
use tracing::info;

use super::{Precondition, StepContext};
use crate::executor::CommandSpec;

/// Packages every provisioned host needs for the later steps.
pub const BASE_PACKAGES: &[&str] = &[
    "curl",
    "ca-certificates",
    "ufw",
    "openssh-server",
    "sudo",
    "unattended-upgrades",
];

fn apt_get<I, S>(args: I) -> CommandSpec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    CommandSpec::new("apt-get", args).with_env("DEBIAN_FRONTEND", "noninteractive")
}

/// Refreshes the package index, upgrades installed packages and installs
/// [`BASE_PACKAGES`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePackagesStep {
    packages: Vec<String>,
}

impl Default for UpdatePackagesStep {
    fn default() -> Self {
        Self {
            packages: BASE_PACKAGES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl UpdatePackagesStep {
    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    /// The package manager is itself idempotent, so this step always runs.
    pub fn precondition(&self, _ctx: &StepContext<'_>) -> Result<Precondition> {
        Ok(Precondition::Pending)
    }

    pub fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        ctx.host
            .run(&apt_get(["update"]))
            .context("failed to refresh package index")?;
        ctx.host
            .run(&apt_get([
                "-o",
                "Dpkg::Options::=--force-confold",
                "upgrade",
                "-y",
            ]))
            .context("failed to upgrade installed packages")?;

        info!("installing base packages: {}", self.packages.join(" "));
        let args = ["install", "-y"]
            .into_iter()
            .map(str::to_string)
            .chain(self.packages.iter().cloned());
        ctx.host
            .run(&apt_get(args))
            .context("failed to install base packages")?;
        Ok(())
    }

    pub fn verify(&self, ctx: &StepContext<'_>) -> Result<()> {
        let query = CommandSpec::new(
            "dpkg-query",
            ["-W".to_string()].into_iter().chain(self.packages.iter().cloned()),
        );
        if !ctx.host.probe(&query)? {
            bail!("base packages are not all installed: {}", self.packages.join(" "));
        }
        Ok(())
    }
}

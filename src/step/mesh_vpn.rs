//! Mesh VPN agent (tailscale) install and login.

use anyhow::{Context, Result};
use tracing::info;

use super::{Precondition, StepContext};
use crate::executor::CommandSpec;

pub const TAILSCALE_BINARY: &str = "/usr/bin/tailscale";
pub const TAILSCALE_INSTALL_URL: &str = "https://tailscale.com/install.sh";

/// Installs tailscale if needed, starts its daemon and joins the tailnet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshVpnStep;

impl MeshVpnStep {
    /// `tailscale up` is harmless on a node that is already up, so this step
    /// always runs.
    pub fn precondition(&self, _ctx: &StepContext<'_>) -> Result<Precondition> {
        Ok(Precondition::Pending)
    }

    pub fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        if ctx.host.exists(TAILSCALE_BINARY) {
            info!("tailscale is already installed");
        } else {
            info!("installing tailscale from {}", TAILSCALE_INSTALL_URL);
            let script = format!("curl -fsSL {} | sh", TAILSCALE_INSTALL_URL);
            ctx.host
                .run(&CommandSpec::new("sh", ["-c".to_string(), script]))
                .context("failed to install tailscale")?;
        }

        ctx.host
            .run(&CommandSpec::new("systemctl", ["enable", "--now", "tailscaled"]))
            .context("failed to start tailscaled")?;

        let up = CommandSpec::new(
            "tailscale",
            [
                "up".to_string(),
                "--authkey".to_string(),
                ctx.config.mesh_auth_key.expose().to_string(),
                "--hostname".to_string(),
                ctx.config.short_hostname.clone(),
            ],
        )
        .sensitive();
        ctx.host.run(&up).context("failed to join the tailnet")?;
        info!("joined the tailnet as {}", ctx.config.short_hostname);
        Ok(())
    }

    pub fn verify(&self, ctx: &StepContext<'_>) -> Result<()> {
        ctx.host
            .run(&CommandSpec::new("tailscale", ["status"]))
            .context("tailscale is not connected")?;
        Ok(())
    }
}

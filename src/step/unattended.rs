//! Automatic security updates.

use anyhow::Result;
use tracing::info;

use super::{Precondition, StepContext};
use crate::error::ProvisionError;
use crate::executor::CommandSpec;

pub const UNATTENDED_UPGRADES_SERVICE: &str = "unattended-upgrades";

fn non_critical(message: impl Into<String>) -> ProvisionError {
    ProvisionError::NonCriticalService {
        service: UNATTENDED_UPGRADES_SERVICE.to_string(),
        message: message.into(),
    }
}

/// Enables the unattended-upgrades service. Failure does not stop the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnattendedUpgradesStep;

impl UnattendedUpgradesStep {
    pub fn precondition(&self, _ctx: &StepContext<'_>) -> Result<Precondition> {
        Ok(Precondition::Pending)
    }

    pub fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        ctx.host
            .run(&CommandSpec::new(
                "systemctl",
                ["enable", "--now", UNATTENDED_UPGRADES_SERVICE],
            ))
            .map_err(|e| non_critical(format!("{:#}", e)))?;
        info!("automatic security updates enabled");
        Ok(())
    }

    pub fn verify(&self, ctx: &StepContext<'_>) -> Result<()> {
        let active = ctx.host.probe(&CommandSpec::new(
            "systemctl",
            ["is-active", "--quiet", UNATTENDED_UPGRADES_SERVICE],
        ))?;
        if !active {
            return Err(non_critical("service is not active after enabling it").into());
        }
        Ok(())
    }
}

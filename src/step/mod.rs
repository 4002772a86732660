//! Provisioning steps.
//!
//! A step is a stateless value with a name, a precondition, an apply action
//! and a postcondition. The [`Step`] trait is what the orchestrator drives;
//! [`StepDefinition`] is the closed set of steps hostprep ships, dispatched
//! by exhaustive matching so a new variant fails to compile until every
//! method handles it.
//!
//! Adding a new step requires:
//! 1. A module with the step's data struct and its `precondition`, `apply`
//!    and `verify` methods
//! 2. A variant in `StepDefinition` and the matching arms below
//! 3. A position in [`crate::registry::StepRegistry`]

pub mod authorized_keys;
pub mod firewall;
pub mod hostname;
pub mod mesh_vpn;
pub mod packages;
pub mod sshd;
pub mod unattended;
pub mod user;

use std::borrow::Cow;
use std::fmt;

use anyhow::Result;
use strum::Display;

pub use authorized_keys::AuthorizedKeysStep;
pub use firewall::{FirewallPlan, FirewallRule, FirewallStep};
pub use hostname::SetHostnameStep;
pub use mesh_vpn::MeshVpnStep;
pub use packages::UpdatePackagesStep;
pub use sshd::HardenSshdStep;
pub use unattended::UnattendedUpgradesStep;
pub use user::ManageUserStep;

use crate::config::Configuration;
use crate::facts::HostFacts;
use crate::host::Host;

/// Everything a step may read while it runs.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub config: &'a Configuration,
    pub facts: &'a HostFacts,
    pub host: &'a Host,
}

/// Result of a step's precondition check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// The step has work to do.
    Pending,
    /// The host already matches the step's end state.
    Satisfied(String),
    /// The step does not apply to this configuration.
    NotApplicable(String),
}

/// Whether a step failure stops the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Criticality {
    Fatal,
    NonCritical,
}

/// A unit of provisioning work.
pub trait Step: fmt::Debug {
    /// Unique, human-readable step name.
    fn name(&self) -> Cow<'_, str>;

    fn criticality(&self) -> Criticality {
        Criticality::Fatal
    }

    /// Decides whether the step needs to run.
    fn precondition(&self, ctx: &StepContext<'_>) -> Result<Precondition>;

    /// Performs the step's side effects.
    fn apply(&self, ctx: &StepContext<'_>) -> Result<()>;

    /// Checks that `apply` reached the intended end state.
    fn verify(&self, ctx: &StepContext<'_>) -> Result<()>;
}

/// The steps hostprep knows how to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDefinition {
    UpdatePackages(UpdatePackagesStep),
    SetHostname(SetHostnameStep),
    MeshVpn(MeshVpnStep),
    ManageUser(ManageUserStep),
    AuthorizedKeys(AuthorizedKeysStep),
    Firewall(FirewallStep),
    HardenSshd(HardenSshdStep),
    UnattendedUpgrades(UnattendedUpgradesStep),
}

impl Step for StepDefinition {
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(match self {
            Self::UpdatePackages(_) => "update-packages",
            Self::SetHostname(_) => "set-hostname",
            Self::MeshVpn(_) => "mesh-vpn",
            Self::ManageUser(_) => "manage-user",
            Self::AuthorizedKeys(_) => "authorized-keys",
            Self::Firewall(_) => "firewall",
            Self::HardenSshd(_) => "harden-sshd",
            Self::UnattendedUpgrades(_) => "unattended-upgrades",
        })
    }

    fn criticality(&self) -> Criticality {
        match self {
            Self::UnattendedUpgrades(_) => Criticality::NonCritical,
            _ => Criticality::Fatal,
        }
    }

    fn precondition(&self, ctx: &StepContext<'_>) -> Result<Precondition> {
        match self {
            Self::UpdatePackages(step) => step.precondition(ctx),
            Self::SetHostname(step) => step.precondition(ctx),
            Self::MeshVpn(step) => step.precondition(ctx),
            Self::ManageUser(step) => step.precondition(ctx),
            Self::AuthorizedKeys(step) => step.precondition(ctx),
            Self::Firewall(step) => step.precondition(ctx),
            Self::HardenSshd(step) => step.precondition(ctx),
            Self::UnattendedUpgrades(step) => step.precondition(ctx),
        }
    }

    fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        match self {
            Self::UpdatePackages(step) => step.apply(ctx),
            Self::SetHostname(step) => step.apply(ctx),
            Self::MeshVpn(step) => step.apply(ctx),
            Self::ManageUser(step) => step.apply(ctx),
            Self::AuthorizedKeys(step) => step.apply(ctx),
            Self::Firewall(step) => step.apply(ctx),
            Self::HardenSshd(step) => step.apply(ctx),
            Self::UnattendedUpgrades(step) => step.apply(ctx),
        }
    }

    fn verify(&self, ctx: &StepContext<'_>) -> Result<()> {
        match self {
            Self::UpdatePackages(step) => step.verify(ctx),
            Self::SetHostname(step) => step.verify(ctx),
            Self::MeshVpn(step) => step.verify(ctx),
            Self::ManageUser(step) => step.verify(ctx),
            Self::AuthorizedKeys(step) => step.verify(ctx),
            Self::Firewall(step) => step.verify(ctx),
            Self::HardenSshd(step) => step.verify(ctx),
            Self::UnattendedUpgrades(step) => step.verify(ctx),
        }
    }
}

//! Ordered step lists per provisioning profile.

use strum::Display;

use crate::config::{Configuration, UserMode};
use crate::step::{
    AuthorizedKeysStep, FirewallStep, HardenSshdStep, ManageUserStep, MeshVpnStep,
    SetHostnameStep, StepDefinition, UnattendedUpgradesStep, UpdatePackagesStep,
};

/// Provisioning profile, derived from the user mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Profile {
    /// hostprep creates and manages the login user.
    Classic,
    /// The login user already exists (provided by the cloud image).
    CloudManaged,
}

impl Profile {
    pub fn for_config(config: &Configuration) -> Self {
        match config.user_mode {
            UserMode::Manage => Self::Classic,
            UserMode::TargetExisting => Self::CloudManaged,
        }
    }
}

/// Builds the canonical step sequence.
pub struct StepRegistry;

impl StepRegistry {
    /// Returns the steps for `profile`, in execution order.
    ///
    /// Both profiles carry the same eight steps so ordinals are stable; in
    /// the cloud-managed profile the user step reports itself not applicable.
    pub fn steps(profile: Profile) -> Vec<StepDefinition> {
        tracing::trace!("building step list for profile {}", profile);
        vec![
            StepDefinition::UpdatePackages(UpdatePackagesStep::default()),
            StepDefinition::SetHostname(SetHostnameStep),
            StepDefinition::MeshVpn(MeshVpnStep),
            StepDefinition::ManageUser(ManageUserStep),
            StepDefinition::AuthorizedKeys(AuthorizedKeysStep),
            StepDefinition::Firewall(FirewallStep),
            StepDefinition::HardenSshd(HardenSshdStep),
            StepDefinition::UnattendedUpgrades(UnattendedUpgradesStep),
        ]
    }

    pub fn for_config(config: &Configuration) -> Vec<StepDefinition> {
        Self::steps(Profile::for_config(config))
    }
}

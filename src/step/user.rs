//! Sudo-capable user creation.
//!
//! The sudoers drop-in is never installed unchecked: the existing sudo
//! configuration must parse before it is touched, the candidate file is
//! checked on its own with `visudo -cf`, and the whole configuration is
//! checked again once the file is in place. Any failure puts the previous
//! drop-in back, so a broken sudo setup is never left behind.

use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use tracing::{info, warn};

use super::{Precondition, StepContext};
use crate::config::UserMode;
use crate::executor::CommandSpec;

pub const SUDO_GROUP: &str = "sudo";
pub const GROUP_PATH: &str = "/etc/group";
pub const SUDOERS_DIR: &str = "/etc/sudoers.d";
pub const SUDOERS_MODE: u32 = 0o440;

/// In-host path of the sudoers drop-in for `user`.
pub fn sudoers_path(user: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{}/90-{}", SUDOERS_DIR, user))
}

/// Candidate path; sudo skips drop-ins whose name contains a dot.
fn candidate_path(user: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{}/.hostprep-90-{}", SUDOERS_DIR, user))
}

pub fn sudoers_entry(user: &str) -> String {
    format!("{} ALL=(ALL) NOPASSWD:ALL\n", user)
}

/// Returns true if `/etc/group` content lists `user` as a member of `group`.
pub fn is_group_member(group_content: &str, group: &str, user: &str) -> bool {
    group_content.lines().any(|line| {
        let mut fields = line.split(':');
        fields.next() == Some(group)
            && fields
                .nth(2)
                .is_some_and(|members| members.split(',').any(|m| m.trim() == user))
    })
}

/// Creates the managed user and grants it passwordless sudo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManageUserStep;

impl ManageUserStep {
    fn user_exists(ctx: &StepContext<'_>, user: &str) -> Result<bool> {
        Ok(ctx.host.passwd()?.contains(user))
    }

    fn in_sudo_group(ctx: &StepContext<'_>, user: &str) -> Result<bool> {
        let groups = ctx.host.read_optional(GROUP_PATH)?.unwrap_or_default();
        Ok(is_group_member(&groups, SUDO_GROUP, user))
    }

    fn sudoers_current(ctx: &StepContext<'_>, user: &str) -> Result<bool> {
        Ok(ctx.host.read_optional(sudoers_path(user))?.as_deref() == Some(sudoers_entry(user).as_str()))
    }

    pub fn precondition(&self, ctx: &StepContext<'_>) -> Result<Precondition> {
        if ctx.config.user_mode != UserMode::Manage {
            return Ok(Precondition::NotApplicable(format!(
                "user mode is {}",
                ctx.config.user_mode
            )));
        }
        let user = &ctx.config.new_user;
        if Self::user_exists(ctx, user)?
            && Self::in_sudo_group(ctx, user)?
            && Self::sudoers_current(ctx, user)?
        {
            return Ok(Precondition::Satisfied(format!(
                "user {} already exists with sudo access",
                user
            )));
        }
        Ok(Precondition::Pending)
    }

    pub fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        let user = ctx.config.new_user.as_str();

        if Self::user_exists(ctx, user)? {
            info!("user {} already exists", user);
        } else {
            ctx.host
                .run(&CommandSpec::new(
                    "useradd",
                    ["--create-home", "--shell", "/bin/bash", user],
                ))
                .with_context(|| format!("failed to create user {}", user))?;
            info!("created user {}", user);
        }

        ctx.host
            .run(&CommandSpec::new("usermod", ["-aG", SUDO_GROUP, user]))
            .with_context(|| format!("failed to add {} to the {} group", user, SUDO_GROUP))?;

        if Self::sudoers_current(ctx, user)? {
            info!("{} is already up to date", sudoers_path(user));
        } else {
            self.install_sudoers(ctx, user)?;
        }
        Ok(())
    }

    fn install_sudoers(&self, ctx: &StepContext<'_>, user: &str) -> Result<()> {
        let host = ctx.host;
        let target = sudoers_path(user);
        let candidate = candidate_path(user);
        let entry = sudoers_entry(user);

        if !host.probe(&CommandSpec::new("visudo", ["-c"]))? {
            bail!("existing sudo configuration is invalid; refusing to edit it");
        }

        host.write_file(&candidate, &entry, SUDOERS_MODE)?;
        let checked = host.probe(&CommandSpec::new(
            "visudo",
            ["-cf".to_string(), host.path(&candidate).to_string()],
        ));
        if !matches!(checked, Ok(true)) {
            host.remove_file(&candidate)?;
            checked?;
            bail!("generated sudoers entry for {} failed validation", user);
        }

        let previous = host.read_optional(&target)?;
        host.write_file(&target, &entry, SUDOERS_MODE)?;
        host.remove_file(&candidate)?;

        let checked = host.probe(&CommandSpec::new("visudo", ["-c"]));
        if !matches!(checked, Ok(true)) {
            warn!("sudo configuration invalid after installing {}; restoring", target);
            match previous {
                Some(content) => host.write_file(&target, &content, SUDOERS_MODE)?,
                None => host.remove_file(&target)?,
            }
            checked?;
            bail!("sudo configuration failed validation after installing {}", target);
        }
        info!("installed {}", target);
        Ok(())
    }

    pub fn verify(&self, ctx: &StepContext<'_>) -> Result<()> {
        let user = ctx.config.new_user.as_str();
        if !Self::user_exists(ctx, user)? {
            bail!("user {} does not exist after creation", user);
        }
        if !Self::sudoers_current(ctx, user)? {
            bail!("{} does not grant sudo to {}", sudoers_path(user), user);
        }
        Ok(())
    }
}

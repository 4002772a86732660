//! SSH public key installation for the target user.

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use super::{Precondition, StepContext};
use crate::config::KeySource;
use crate::document::AuthorizedKeys;
use crate::error::ProvisionError;
use crate::executor::CommandSpec;
use crate::facts::resolve_home;
use crate::host::file_mode;

pub const SSH_DIR_MODE: u32 = 0o700;
pub const AUTHORIZED_KEYS_MODE: u32 = 0o600;

/// Where the keys for one run come from, once the source has been looked at.
enum FetchedKeys {
    Content { source: String, content: String },
    /// Dry run against a remote source: nothing was downloaded.
    NotFetched { source: String },
}

/// Installs `~/.ssh/authorized_keys` for the target user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizedKeysStep;

impl AuthorizedKeysStep {
    /// Resolves the target home, looking it up again since the user may have
    /// been created by an earlier step.
    fn home(ctx: &StepContext<'_>) -> Result<Utf8PathBuf> {
        let user = &ctx.facts.target_user;
        let err = match resolve_home(ctx.host, user) {
            Ok(home) => return Ok(home),
            Err(e) => e,
        };
        if let Some(home) = &ctx.facts.target_home {
            return Ok(home.clone());
        }
        if ctx.host.dry_run() {
            let guessed = Utf8Path::new("/home").join(user);
            info!("user {} does not exist yet; assuming home {}", user, guessed);
            return Ok(guessed);
        }
        Err(err.into())
    }

    fn fetch(ctx: &StepContext<'_>) -> Result<FetchedKeys> {
        match &ctx.config.key_source {
            KeySource::DiscoverLocally => {
                let path = ctx.facts.local_keys.as_ref().ok_or(ProvisionError::NoKeySource)?;
                let content = ctx.host.read_optional(path)?.ok_or(ProvisionError::NoKeySource)?;
                Ok(FetchedKeys::Content {
                    source: path.to_string(),
                    content,
                })
            }
            remote => {
                let url = remote.url().ok_or(ProvisionError::NoKeySource)?;
                let result = ctx
                    .host
                    .run(&CommandSpec::new("curl", ["-fsSL", url.as_str()]).capturing_stdout())
                    .with_context(|| format!("failed to download keys from {}", url))?;
                match result.stdout {
                    Some(content) => Ok(FetchedKeys::Content {
                        source: url.to_string(),
                        content,
                    }),
                    None if result.is_dry_run() => Ok(FetchedKeys::NotFetched {
                        source: url.to_string(),
                    }),
                    None => Ok(FetchedKeys::Content {
                        source: url.to_string(),
                        content: String::new(),
                    }),
                }
            }
        }
    }

    /// Keys may change at the source, so this step always runs and only
    /// rewrites the file when its content differs.
    pub fn precondition(&self, _ctx: &StepContext<'_>) -> Result<Precondition> {
        Ok(Precondition::Pending)
    }

    pub fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        let user = ctx.facts.target_user.as_str();
        let home = Self::home(ctx)?;
        let ssh_dir = home.join(".ssh");
        let keys_path = ssh_dir.join("authorized_keys");

        info!("installing keys for {} from {}", user, ctx.config.key_source);
        let (source, content) = match Self::fetch(ctx)? {
            FetchedKeys::Content { source, content } => (source, content),
            FetchedKeys::NotFetched { source } => {
                info!("would install keys from {} into {}", source, keys_path);
                return Ok(());
            }
        };

        let keys = AuthorizedKeys::new(content);
        let count = keys.validate(&source)?;

        ctx.host.create_dir(&ssh_dir, SSH_DIR_MODE)?;
        let rendered = keys.render();
        if ctx.host.read_optional(&keys_path)?.as_deref() == Some(rendered.as_str()) {
            info!("{} already holds the same {} key(s)", keys_path, count);
        } else {
            ctx.host.write_file(&keys_path, &rendered, AUTHORIZED_KEYS_MODE)?;
            info!("installed {} key(s) into {}", count, keys_path);
        }

        ctx.host
            .run(&CommandSpec::new(
                "chown",
                [
                    "-R".to_string(),
                    format!("{}:", user),
                    ctx.host.path(&ssh_dir).to_string(),
                ],
            ))
            .with_context(|| format!("failed to hand {} to {}", ssh_dir, user))?;
        Ok(())
    }

    pub fn verify(&self, ctx: &StepContext<'_>) -> Result<()> {
        let keys_path = Self::home(ctx)?.join(".ssh/authorized_keys");
        let Some(content) = ctx.host.read_optional(&keys_path)? else {
            bail!("{} was not created", keys_path);
        };
        AuthorizedKeys::new(content).validate(keys_path.as_str())?;
        if let Some(mode) = file_mode(&ctx.host.path(&keys_path))
            && mode != AUTHORIZED_KEYS_MODE
        {
            bail!("{} has mode {:o}, expected {:o}", keys_path, mode, AUTHORIZED_KEYS_MODE);
        }
        Ok(())
    }
}

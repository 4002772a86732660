//! Host facts derived from the configuration and the live host.
//!
//! Facts are computed once, before the first step runs, and are read-only
//! afterwards. The home directory of the target user is the one exception a
//! step may look up again: in manage mode the user does not exist until the
//! user-management step has run.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::config::{Configuration, UserMode};
use crate::error::ProvisionError;
use crate::host::Host;

const SUPERUSER: &str = "root";
const SUPERUSER_HOME: &str = "/root";

/// Facts shared read-only by every step of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    /// Primary FQDN first, then one alias per extra domain.
    pub fqdns: Vec<String>,
    pub target_user: String,
    /// Home directory of the target user, if the user already exists.
    pub target_home: Option<Utf8PathBuf>,
    /// In-host path of an existing authorized_keys file usable as a key source.
    pub local_keys: Option<Utf8PathBuf>,
}

impl HostFacts {
    /// Names for the loopback-alias hosts line: every FQDN, then the short name.
    pub fn hosts_names(&self, short_hostname: &str) -> Vec<String> {
        let mut names = self.fqdns.clone();
        names.push(short_hostname.to_string());
        names
    }
}

/// Computes the FQDN list: `short.primary`, then `short.extra` for each
/// extra domain that is non-empty after trimming, in input order.
pub fn compute_fqdns<S: AsRef<str>>(short: &str, primary: &str, extras: &[S]) -> Vec<String> {
    std::iter::once(primary)
        .chain(extras.iter().map(|d| d.as_ref().trim()).filter(|d| !d.is_empty()))
        .map(|domain| format!("{}.{}", short, domain))
        .collect()
}

/// Resolves who receives the SSH keys.
///
/// Manage mode always targets the new user. Otherwise the explicit target
/// user wins, then the invoking (sudo) user unless it is the superuser.
pub fn resolve_target_user(config: &Configuration) -> Result<String, ProvisionError> {
    if config.user_mode == UserMode::Manage {
        return Ok(config.new_user.clone());
    }
    if let Some(user) = &config.target_user {
        return Ok(user.clone());
    }
    match config.invoking_user.as_deref() {
        Some(user) if user != SUPERUSER => Ok(user.to_string()),
        Some(_) => Err(ProvisionError::AmbiguousTargetUser(
            "running as root without TARGET_USER; set TARGET_USER or MANAGE_USER=true".to_string(),
        )),
        None => Err(ProvisionError::AmbiguousTargetUser(
            "no TARGET_USER and no invoking user (SUDO_USER); set TARGET_USER or MANAGE_USER=true"
                .to_string(),
        )),
    }
}

/// Looks up a user's home directory in the host's passwd database.
pub fn resolve_home(host: &Host, user: &str) -> Result<Utf8PathBuf, ProvisionError> {
    let passwd = host.passwd()?;
    let entry = passwd.get(user).ok_or_else(|| ProvisionError::UserResolution {
        user: user.to_string(),
        reason: "no entry in /etc/passwd".to_string(),
    })?;
    if entry.home.as_str().is_empty() || !entry.home.is_absolute() {
        return Err(ProvisionError::UserResolution {
            user: user.to_string(),
            reason: format!("home directory '{}' is not an absolute path", entry.home),
        });
    }
    Ok(entry.home.clone())
}

/// Derives [`HostFacts`] for one run.
pub struct HostFactGatherer<'a> {
    host: &'a Host,
}

impl<'a> HostFactGatherer<'a> {
    pub fn new(host: &'a Host) -> Self {
        Self { host }
    }

    pub fn gather(&self, config: &Configuration) -> Result<HostFacts, ProvisionError> {
        let fqdns = compute_fqdns(&config.short_hostname, &config.primary_domain, &config.extra_domains);
        let target_user = resolve_target_user(config)?;
        let target_home = resolve_home(self.host, &target_user).ok();
        let local_keys = self.discover_local_keys(config)?;
        debug!(?fqdns, %target_user, ?target_home, ?local_keys, "gathered host facts");
        Ok(HostFacts {
            fqdns,
            target_user,
            target_home,
            local_keys,
        })
    }

    /// Finds an existing authorized_keys file: the invoking user's first,
    /// then the superuser's. Absence is not an error.
    pub fn discover_local_keys(
        &self,
        config: &Configuration,
    ) -> Result<Option<Utf8PathBuf>, ProvisionError> {
        let passwd = self.host.passwd()?;
        let mut homes: Vec<Utf8PathBuf> = Vec::new();
        if let Some(user) = config.invoking_user.as_deref().filter(|u| *u != SUPERUSER) {
            match passwd.get(user) {
                Some(entry) => homes.push(entry.home.clone()),
                None => homes.push(Utf8Path::new("/home").join(user)),
            }
        }
        homes.push(
            passwd
                .get(SUPERUSER)
                .map(|e| e.home.clone())
                .unwrap_or_else(|| Utf8PathBuf::from(SUPERUSER_HOME)),
        );

        Ok(homes
            .into_iter()
            .map(|home| home.join(".ssh/authorized_keys"))
            .find(|candidate| self.host.path(candidate).is_file()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeySource, Secret};

    fn config(mode: UserMode, target: Option<&str>, invoking: Option<&str>) -> Configuration {
        Configuration {
            short_hostname: "h".to_string(),
            primary_domain: "d".to_string(),
            extra_domains: vec![],
            user_mode: mode,
            new_user: "superadmin".to_string(),
            target_user: target.map(str::to_string),
            ssh_port: 22222,
            keep_legacy_port: true,
            key_source: KeySource::DiscoverLocally,
            mesh_auth_key: Secret::new("k"),
            invoking_user: invoking.map(str::to_string),
        }
    }

    #[test]
    fn fqdns_trim_and_drop_empty_entries() {
        let extras: Vec<String> = "a, ,b".split(',').map(str::to_string).collect();
        assert_eq!(compute_fqdns("h", "d", &extras), vec!["h.d", "h.a", "h.b"]);
    }

    #[test]
    fn fqdns_without_extras_is_primary_only() {
        assert_eq!(compute_fqdns::<&str>("web1", "example.com", &[]), vec!["web1.example.com"]);
    }

    #[test]
    fn manage_mode_always_targets_new_user() {
        let cfg = config(UserMode::Manage, Some("ubuntu"), Some("alice"));
        assert_eq!(resolve_target_user(&cfg).unwrap(), "superadmin");
    }

    #[test]
    fn explicit_target_beats_invoking_user() {
        let cfg = config(UserMode::TargetExisting, Some("ubuntu"), Some("alice"));
        assert_eq!(resolve_target_user(&cfg).unwrap(), "ubuntu");
    }

    #[test]
    fn invoking_user_is_used_when_not_root() {
        let cfg = config(UserMode::TargetExisting, None, Some("alice"));
        assert_eq!(resolve_target_user(&cfg).unwrap(), "alice");
    }

    #[test]
    fn root_or_missing_invoking_user_is_ambiguous() {
        for invoking in [None, Some("root")] {
            let cfg = config(UserMode::TargetExisting, None, invoking);
            let err = resolve_target_user(&cfg).unwrap_err();
            assert!(matches!(err, ProvisionError::AmbiguousTargetUser(_)));
        }
    }

    #[test]
    fn hosts_names_end_with_short_name() {
        let facts = HostFacts {
            fqdns: vec!["h.d".to_string(), "h.a".to_string()],
            target_user: "u".to_string(),
            target_home: None,
            local_keys: None,
        };
        assert_eq!(facts.hosts_names("h"), vec!["h.d", "h.a", "h"]);
    }
}

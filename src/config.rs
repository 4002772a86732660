//! Settings loading and configuration resolution.
//!
//! Settings come from two layers: an optional YAML file and the process
//! environment, with the environment taking precedence. Both are collected
//! into a raw [`Settings`] value, which [`ConfigResolver`] validates into an
//! immutable [`Configuration`] (for `apply`) or [`TunnelConfig`] (for
//! `tunnel`). Nothing else in the crate reads the environment.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::net::IpAddr;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Deserialize;
use strum::Display;
use url::Url;

use crate::error::ProvisionError;

pub const DEFAULT_PRIMARY_DOMAIN: &str = "example.com";
pub const DEFAULT_NEW_USER: &str = "superadmin";
pub const DEFAULT_SSH_PORT: u16 = 22222;
pub const LEGACY_SSH_PORT: u16 = 22;
pub const DEFAULT_WG_PORT: u16 = 51820;
pub const DEFAULT_WG_INTERFACE: &str = "wg0";
pub const DEFAULT_WG_SERVER_ADDRESS: &str = "10.200.0.1";
pub const DEFAULT_WG_CLIENT_ADDRESS: &str = "10.200.0.2";
pub const DEFAULT_WG_DIR: &str = "/etc/wireguard";

/// Environment variable names, in the order they are documented.
pub mod env {
    pub const SHORT_HOSTNAME: &str = "SHORT_HOSTNAME";
    pub const TAILSCALE_AUTHKEY: &str = "TAILSCALE_AUTHKEY";
    pub const PRIMARY_DOMAIN: &str = "PRIMARY_DOMAIN";
    pub const EXTRA_DOMAINS: &str = "EXTRA_DOMAINS";
    pub const MANAGE_USER: &str = "MANAGE_USER";
    pub const NEW_USER: &str = "NEW_USER";
    pub const TARGET_USER: &str = "TARGET_USER";
    pub const SSH_PORT: &str = "SSH_PORT";
    pub const KEEP_PORT_22: &str = "KEEP_PORT_22";
    pub const GITHUB_KEYS_USER: &str = "GITHUB_KEYS_USER";
    pub const AUTHORIZED_KEYS_URL: &str = "AUTHORIZED_KEYS_URL";
    pub const SUDO_USER: &str = "SUDO_USER";
    pub const WG_ENDPOINT: &str = "WG_ENDPOINT";
    pub const WG_PORT: &str = "WG_PORT";
    pub const WG_INTERFACE: &str = "WG_INTERFACE";
    pub const WG_SERVER_ADDRESS: &str = "WG_SERVER_ADDRESS";
    pub const WG_CLIENT_ADDRESS: &str = "WG_CLIENT_ADDRESS";
    pub const WG_DIR: &str = "WG_DIR";
}

static HOST_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("host label regex is valid")
});

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*$")
        .expect("domain regex is valid")
});

static USERNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("username regex is valid")
});

static GITHUB_USER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)[a-z0-9](?:[a-z0-9-]{0,38})$").expect("github user regex is valid")
});

/// A string that must never be printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value. Callers must not log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Raw, unvalidated settings from a YAML file and/or the environment.
///
/// Every field is optional; defaults and required-field checks are applied
/// by [`ConfigResolver`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub short_hostname: Option<String>,
    #[serde(default)]
    pub tailscale_authkey: Option<Secret>,
    #[serde(default)]
    pub primary_domain: Option<String>,
    #[serde(default)]
    pub extra_domains: Option<Vec<String>>,
    #[serde(default)]
    pub manage_user: Option<bool>,
    #[serde(default)]
    pub new_user: Option<String>,
    #[serde(default)]
    pub target_user: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    #[serde(default)]
    pub keep_port_22: Option<bool>,
    #[serde(default)]
    pub github_keys_user: Option<String>,
    #[serde(default)]
    pub authorized_keys_url: Option<String>,
    /// Invoking-user signal. Only ever taken from the environment.
    #[serde(skip)]
    pub sudo_user: Option<String>,
    #[serde(default)]
    pub wg_endpoint: Option<String>,
    #[serde(default)]
    pub wg_port: Option<u16>,
    #[serde(default)]
    pub wg_interface: Option<String>,
    #[serde(default)]
    pub wg_server_address: Option<IpAddr>,
    #[serde(default)]
    pub wg_client_address: Option<IpAddr>,
    #[serde(default)]
    pub wg_dir: Option<Utf8PathBuf>,
}

/// Parses a boolean setting, accepting the spellings shell users expect.
pub fn parse_bool(key: &str, value: &str) -> Result<bool, ProvisionError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(ProvisionError::Configuration(format!(
            "{} must be a boolean (true/false), got '{}'",
            key, value
        ))),
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16, ProvisionError> {
    match value.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ProvisionError::Configuration(format!(
            "{} must be a port number between 1 and 65535, got '{}'",
            key, value
        ))),
    }
}

fn parse_ip(key: &str, value: &str) -> Result<IpAddr, ProvisionError> {
    value.trim().parse::<IpAddr>().map_err(|_| {
        ProvisionError::Configuration(format!("{} must be an IP address, got '{}'", key, value))
    })
}

impl Settings {
    /// Builds settings from environment-style key/value pairs.
    ///
    /// Unknown keys are ignored and empty values count as unset, so
    /// `SSH_PORT=` behaves like leaving `SSH_PORT` out.
    pub fn from_env<I, K, V>(vars: I) -> Result<Self, ProvisionError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Settings::default();
        for (key, value) in vars {
            let key = key.as_ref();
            let value = value.as_ref();
            if value.trim().is_empty() {
                continue;
            }
            match key {
                env::SHORT_HOSTNAME => settings.short_hostname = Some(value.trim().to_string()),
                env::TAILSCALE_AUTHKEY => {
                    settings.tailscale_authkey = Some(Secret::new(value.trim()))
                }
                env::PRIMARY_DOMAIN => settings.primary_domain = Some(value.trim().to_string()),
                env::EXTRA_DOMAINS => {
                    settings.extra_domains =
                        Some(value.split(',').map(str::to_string).collect());
                }
                env::MANAGE_USER => settings.manage_user = Some(parse_bool(key, value)?),
                env::NEW_USER => settings.new_user = Some(value.trim().to_string()),
                env::TARGET_USER => settings.target_user = Some(value.trim().to_string()),
                env::SSH_PORT => settings.ssh_port = Some(parse_port(key, value)?),
                env::KEEP_PORT_22 => settings.keep_port_22 = Some(parse_bool(key, value)?),
                env::GITHUB_KEYS_USER => settings.github_keys_user = Some(value.trim().to_string()),
                env::AUTHORIZED_KEYS_URL => {
                    settings.authorized_keys_url = Some(value.trim().to_string())
                }
                env::SUDO_USER => settings.sudo_user = Some(value.trim().to_string()),
                env::WG_ENDPOINT => settings.wg_endpoint = Some(value.trim().to_string()),
                env::WG_PORT => settings.wg_port = Some(parse_port(key, value)?),
                env::WG_INTERFACE => settings.wg_interface = Some(value.trim().to_string()),
                env::WG_SERVER_ADDRESS => settings.wg_server_address = Some(parse_ip(key, value)?),
                env::WG_CLIENT_ADDRESS => settings.wg_client_address = Some(parse_ip(key, value)?),
                env::WG_DIR => settings.wg_dir = Some(Utf8PathBuf::from(value.trim())),
                _ => {}
            }
        }
        Ok(settings)
    }

    /// Layers `overrides` on top of `self`; set fields in `overrides` win.
    #[must_use]
    pub fn overlay(self, overrides: Settings) -> Settings {
        Settings {
            short_hostname: overrides.short_hostname.or(self.short_hostname),
            tailscale_authkey: overrides.tailscale_authkey.or(self.tailscale_authkey),
            primary_domain: overrides.primary_domain.or(self.primary_domain),
            extra_domains: overrides.extra_domains.or(self.extra_domains),
            manage_user: overrides.manage_user.or(self.manage_user),
            new_user: overrides.new_user.or(self.new_user),
            target_user: overrides.target_user.or(self.target_user),
            ssh_port: overrides.ssh_port.or(self.ssh_port),
            keep_port_22: overrides.keep_port_22.or(self.keep_port_22),
            github_keys_user: overrides.github_keys_user.or(self.github_keys_user),
            authorized_keys_url: overrides.authorized_keys_url.or(self.authorized_keys_url),
            sudo_user: overrides.sudo_user.or(self.sudo_user),
            wg_endpoint: overrides.wg_endpoint.or(self.wg_endpoint),
            wg_port: overrides.wg_port.or(self.wg_port),
            wg_interface: overrides.wg_interface.or(self.wg_interface),
            wg_server_address: overrides.wg_server_address.or(self.wg_server_address),
            wg_client_address: overrides.wg_client_address.or(self.wg_client_address),
            wg_dir: overrides.wg_dir.or(self.wg_dir),
        }
    }
}

/// Loads a YAML settings file.
pub fn load_settings(path: &Utf8Path) -> Result<Settings, ProvisionError> {
    let file = File::open(path).map_err(|e| ProvisionError::io(path.to_string(), e))?;
    let reader = BufReader::new(file);
    serde_yaml::from_reader(reader).map_err(|e| {
        ProvisionError::Configuration(format!("failed to parse YAML settings {}: {}", path, e))
    })
}

/// Reads the optional settings file and overlays the environment onto it.
pub fn gather_settings<I, K, V>(file: Option<&Utf8Path>, vars: I) -> Result<Settings, ProvisionError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let base = match file {
        Some(path) => load_settings(path)?,
        None => Settings::default(),
    };
    Ok(base.overlay(Settings::from_env(vars)?))
}

/// Who receives the installed SSH keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UserMode {
    /// Create a new sudo-capable user and provision keys for it.
    #[strum(serialize = "manage")]
    Manage,
    /// Provision keys for a user that already exists.
    #[strum(serialize = "target-existing")]
    TargetExisting,
}

/// Where authorized keys are fetched from, after precedence is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// An arbitrary URL serving an authorized_keys document.
    Url(Url),
    /// A GitHub account; keys come from `https://github.com/<user>.keys`.
    GitHubUser(String),
    /// Copy an authorized_keys file already present on the host.
    DiscoverLocally,
}

impl KeySource {
    /// Returns the URL to download keys from, if this is a remote source.
    pub fn url(&self) -> Option<Url> {
        match self {
            Self::Url(url) => Some(url.clone()),
            Self::GitHubUser(user) => Url::parse(&format!("https://github.com/{}.keys", user)).ok(),
            Self::DiscoverLocally => None,
        }
    }
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "url {}", url),
            Self::GitHubUser(user) => write!(f, "github user {}", user),
            Self::DiscoverLocally => f.write_str("local authorized_keys"),
        }
    }
}

/// Immutable, validated configuration for a provisioning run.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub short_hostname: String,
    pub primary_domain: String,
    /// Extra domain suffixes exactly as given; trimming happens when FQDNs are computed.
    pub extra_domains: Vec<String>,
    pub user_mode: UserMode,
    pub new_user: String,
    pub target_user: Option<String>,
    pub ssh_port: u16,
    pub keep_legacy_port: bool,
    pub key_source: KeySource,
    pub mesh_auth_key: Secret,
    /// The user that invoked the tool through sudo, if any.
    pub invoking_user: Option<String>,
}

/// Validated settings for the point-to-point tunnel flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Public address (host name or IP) clients use to reach the server.
    pub endpoint: String,
    pub listen_port: u16,
    pub interface: String,
    pub server_address: IpAddr,
    pub client_address: IpAddr,
    pub dir: Utf8PathBuf,
}

/// Validates raw [`Settings`] into typed configurations.
pub struct ConfigResolver {
    settings: Settings,
}

fn require(key: &str, value: Option<String>) -> Result<String, ProvisionError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ProvisionError::Configuration(format!("{} is required", key))),
    }
}

fn validate_username(key: &str, name: &str) -> Result<(), ProvisionError> {
    if !USERNAME_RE.is_match(name) {
        return Err(ProvisionError::Configuration(format!(
            "{} '{}' is not a valid username",
            key, name
        )));
    }
    Ok(())
}

fn validate_domain(key: &str, domain: &str) -> Result<(), ProvisionError> {
    if domain.len() > 253 || !DOMAIN_RE.is_match(domain) {
        return Err(ProvisionError::Configuration(format!(
            "{} contains an invalid domain '{}'",
            key, domain
        )));
    }
    Ok(())
}

impl ConfigResolver {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Resolves the provisioning configuration.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Configuration` for missing required values or
    /// invalid values, and `ProvisionError::AmbiguousTargetUser` when no user
    /// can be identified to receive the SSH keys.
    pub fn resolve(&self) -> Result<Configuration, ProvisionError> {
        let s = self.settings.clone();

        let short_hostname = require(env::SHORT_HOSTNAME, s.short_hostname)?;
        if !HOST_LABEL_RE.is_match(&short_hostname) {
            return Err(ProvisionError::Configuration(format!(
                "{} '{}' is not a valid host name label",
                env::SHORT_HOSTNAME,
                short_hostname
            )));
        }

        let mesh_auth_key = match s.tailscale_authkey {
            Some(key) if !key.expose().trim().is_empty() => key,
            _ => {
                return Err(ProvisionError::Configuration(format!(
                    "{} is required",
                    env::TAILSCALE_AUTHKEY
                )));
            }
        };

        let primary_domain = s
            .primary_domain
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_PRIMARY_DOMAIN.to_string());
        validate_domain(env::PRIMARY_DOMAIN, &primary_domain)?;

        let extra_domains = s.extra_domains.unwrap_or_default();
        for domain in extra_domains.iter().map(|d| d.trim()).filter(|d| !d.is_empty()) {
            validate_domain(env::EXTRA_DOMAINS, domain)?;
        }

        let user_mode = if s.manage_user.unwrap_or(false) {
            UserMode::Manage
        } else {
            UserMode::TargetExisting
        };

        let new_user = s
            .new_user
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_NEW_USER.to_string());
        validate_username(env::NEW_USER, &new_user)?;

        let target_user = s.target_user.filter(|u| !u.is_empty());
        if let Some(user) = &target_user {
            validate_username(env::TARGET_USER, user)?;
        }

        let key_source = resolve_key_source(s.authorized_keys_url, s.github_keys_user)?;

        let configuration = Configuration {
            short_hostname,
            primary_domain,
            extra_domains,
            user_mode,
            new_user,
            target_user,
            ssh_port: s.ssh_port.unwrap_or(DEFAULT_SSH_PORT),
            keep_legacy_port: s.keep_port_22.unwrap_or(true),
            key_source,
            mesh_auth_key,
            invoking_user: s.sudo_user.filter(|u| !u.is_empty()),
        };

        if configuration.ssh_port == 0 {
            return Err(ProvisionError::Configuration(format!(
                "{} must be between 1 and 65535",
                env::SSH_PORT
            )));
        }

        // Fail before touching the host if nobody can receive the keys.
        crate::facts::resolve_target_user(&configuration)?;

        Ok(configuration)
    }

    /// Resolves the tunnel configuration.
    pub fn resolve_tunnel(&self) -> Result<TunnelConfig, ProvisionError> {
        let s = self.settings.clone();
        let endpoint = require(env::WG_ENDPOINT, s.wg_endpoint)?;
        let has_port = endpoint.contains(':') && endpoint.parse::<IpAddr>().is_err();
        if endpoint.contains(char::is_whitespace) || has_port {
            return Err(ProvisionError::Configuration(format!(
                "{} must be a host name or IP address without a port, got '{}'",
                env::WG_ENDPOINT,
                endpoint
            )));
        }

        let interface = s
            .wg_interface
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| DEFAULT_WG_INTERFACE.to_string());
        if !HOST_LABEL_RE.is_match(&interface) || interface.len() > 15 {
            return Err(ProvisionError::Configuration(format!(
                "{} '{}' is not a valid interface name",
                env::WG_INTERFACE,
                interface
            )));
        }

        let server_address = match s.wg_server_address {
            Some(addr) => addr,
            None => parse_ip(env::WG_SERVER_ADDRESS, DEFAULT_WG_SERVER_ADDRESS)?,
        };
        let client_address = match s.wg_client_address {
            Some(addr) => addr,
            None => parse_ip(env::WG_CLIENT_ADDRESS, DEFAULT_WG_CLIENT_ADDRESS)?,
        };
        if server_address == client_address {
            return Err(ProvisionError::Configuration(format!(
                "{} and {} must differ",
                env::WG_SERVER_ADDRESS,
                env::WG_CLIENT_ADDRESS
            )));
        }
        if server_address.is_ipv4() != client_address.is_ipv4() {
            return Err(ProvisionError::Configuration(
                "tunnel addresses must both be IPv4 or both be IPv6".to_string(),
            ));
        }

        let listen_port = s.wg_port.unwrap_or(DEFAULT_WG_PORT);
        if listen_port == 0 {
            return Err(ProvisionError::Configuration(format!(
                "{} must be between 1 and 65535",
                env::WG_PORT
            )));
        }

        Ok(TunnelConfig {
            endpoint,
            listen_port,
            interface,
            server_address,
            client_address,
            dir: s.wg_dir.unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_WG_DIR)),
        })
    }
}

/// Applies key-source precedence: URL, then GitHub user, then local discovery.
fn resolve_key_source(
    url: Option<String>,
    github_user: Option<String>,
) -> Result<KeySource, ProvisionError> {
    if let Some(raw) = url.filter(|u| !u.is_empty()) {
        let parsed = Url::parse(&raw).map_err(|e| {
            ProvisionError::Configuration(format!(
                "{} '{}' is not a valid URL: {}",
                env::AUTHORIZED_KEYS_URL,
                raw,
                e
            ))
        })?;
        if !matches!(parsed.scheme(), "https" | "http") {
            return Err(ProvisionError::Configuration(format!(
                "{} must use http or https, got '{}'",
                env::AUTHORIZED_KEYS_URL,
                parsed.scheme()
            )));
        }
        return Ok(KeySource::Url(parsed));
    }
    if let Some(user) = github_user.filter(|u| !u.is_empty()) {
        if !GITHUB_USER_RE.is_match(&user) {
            return Err(ProvisionError::Configuration(format!(
                "{} '{}' is not a valid GitHub username",
                env::GITHUB_KEYS_USER,
                user
            )));
        }
        return Ok(KeySource::GitHubUser(user));
    }
    Ok(KeySource::DiscoverLocally)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_env() -> Vec<(&'static str, &'static str)> {
        vec![
            (env::SHORT_HOSTNAME, "web1"),
            (env::TAILSCALE_AUTHKEY, "tskey-abc"),
            (env::TARGET_USER, "ubuntu"),
        ]
    }

    fn resolve(vars: Vec<(&str, &str)>) -> Result<Configuration, ProvisionError> {
        ConfigResolver::new(Settings::from_env(vars)?).resolve()
    }

    #[test]
    fn defaults_apply_when_optional_settings_absent() {
        let config = resolve(minimal_env()).unwrap();
        assert_eq!(config.short_hostname, "web1");
        assert_eq!(config.primary_domain, DEFAULT_PRIMARY_DOMAIN);
        assert!(config.extra_domains.is_empty());
        assert_eq!(config.user_mode, UserMode::TargetExisting);
        assert_eq!(config.new_user, DEFAULT_NEW_USER);
        assert_eq!(config.ssh_port, DEFAULT_SSH_PORT);
        assert!(config.keep_legacy_port);
        assert_eq!(config.key_source, KeySource::DiscoverLocally);
    }

    #[test]
    fn missing_hostname_is_configuration_error() {
        let err = resolve(vec![(env::TAILSCALE_AUTHKEY, "k"), (env::TARGET_USER, "u")]).unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration(_)));
        assert!(err.to_string().contains(env::SHORT_HOSTNAME));
    }

    #[test]
    fn whitespace_only_token_counts_as_missing() {
        let err = resolve(vec![
            (env::SHORT_HOSTNAME, "web1"),
            (env::TAILSCALE_AUTHKEY, "   "),
            (env::TARGET_USER, "u"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains(env::TAILSCALE_AUTHKEY));
    }

    #[test]
    fn invalid_boolean_is_rejected() {
        let err = Settings::from_env([(env::MANAGE_USER, "maybe")]).unwrap_err();
        assert!(err.to_string().contains("must be a boolean"));
    }

    #[test]
    fn boolean_spellings() {
        assert!(parse_bool("K", "YES").unwrap());
        assert!(parse_bool("K", "1").unwrap());
        assert!(!parse_bool("K", "False").unwrap());
        assert!(!parse_bool("K", "no").unwrap());
    }

    #[test]
    fn port_zero_and_garbage_are_rejected() {
        assert!(Settings::from_env([(env::SSH_PORT, "0")]).is_err());
        assert!(Settings::from_env([(env::SSH_PORT, "70000")]).is_err());
        assert!(Settings::from_env([(env::SSH_PORT, "ssh")]).is_err());
        let s = Settings::from_env([(env::SSH_PORT, " 2200 ")]).unwrap();
        assert_eq!(s.ssh_port, Some(2200));
    }

    #[test]
    fn url_takes_precedence_over_github_user() {
        let mut vars = minimal_env();
        vars.push((env::GITHUB_KEYS_USER, "octocat"));
        vars.push((env::AUTHORIZED_KEYS_URL, "https://keys.example.net/ops.keys"));
        let config = resolve(vars).unwrap();
        match &config.key_source {
            KeySource::Url(url) => assert_eq!(url.as_str(), "https://keys.example.net/ops.keys"),
            other => panic!("expected url source, got {:?}", other),
        }
    }

    #[test]
    fn github_user_builds_keys_url() {
        let source = resolve_key_source(None, Some("octocat".to_string())).unwrap();
        assert_eq!(source.url().unwrap().as_str(), "https://github.com/octocat.keys");
    }

    #[test]
    fn non_http_key_url_is_rejected() {
        let err = resolve_key_source(Some("file:///etc/passwd".to_string()), None).unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn invalid_hostname_label_is_rejected() {
        let err = resolve(vec![
            (env::SHORT_HOSTNAME, "web_1"),
            (env::TAILSCALE_AUTHKEY, "k"),
            (env::TARGET_USER, "u"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("host name label"));
    }

    #[test]
    fn ambiguous_target_user_fails_preflight() {
        let err = resolve(vec![(env::SHORT_HOSTNAME, "web1"), (env::TAILSCALE_AUTHKEY, "k")])
            .unwrap_err();
        assert!(matches!(err, ProvisionError::AmbiguousTargetUser(_)));
    }

    #[test]
    fn environment_overrides_file_settings() {
        let file: Settings = serde_yaml::from_str(
            "short_hostname: from-file\nssh_port: 2022\nextra_domains: [a.test, b.test]\n",
        )
        .unwrap();
        let envs = Settings::from_env([(env::SSH_PORT, "2222")]).unwrap();
        let merged = file.overlay(envs);
        assert_eq!(merged.short_hostname.as_deref(), Some("from-file"));
        assert_eq!(merged.ssh_port, Some(2222));
        assert_eq!(
            merged.extra_domains,
            Some(vec!["a.test".to_string(), "b.test".to_string()])
        );
    }

    #[test]
    fn yaml_rejects_unknown_fields() {
        let result: Result<Settings, _> = serde_yaml::from_str("hostname: x\n");
        assert!(result.is_err());
    }

    #[test]
    fn secret_debug_is_redacted() {
        let config = resolve(minimal_env()).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("tskey-abc"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn tunnel_defaults() {
        let settings = Settings::from_env([(env::WG_ENDPOINT, "vpn.example.com")]).unwrap();
        let tunnel = ConfigResolver::new(settings).resolve_tunnel().unwrap();
        assert_eq!(tunnel.endpoint, "vpn.example.com");
        assert_eq!(tunnel.listen_port, DEFAULT_WG_PORT);
        assert_eq!(tunnel.interface, DEFAULT_WG_INTERFACE);
        assert_eq!(tunnel.server_address.to_string(), DEFAULT_WG_SERVER_ADDRESS);
        assert_eq!(tunnel.client_address.to_string(), DEFAULT_WG_CLIENT_ADDRESS);
        assert_eq!(tunnel.dir, DEFAULT_WG_DIR);
    }

    #[test]
    fn tunnel_requires_endpoint() {
        let err = ConfigResolver::new(Settings::default()).resolve_tunnel().unwrap_err();
        assert!(err.to_string().contains(env::WG_ENDPOINT));
    }

    #[test]
    fn tunnel_rejects_endpoint_with_port() {
        let settings = Settings::from_env([(env::WG_ENDPOINT, "vpn.example.com:51820")]).unwrap();
        assert!(ConfigResolver::new(settings).resolve_tunnel().is_err());
    }

    #[test]
    fn tunnel_rejects_identical_addresses() {
        let settings = Settings::from_env([
            (env::WG_ENDPOINT, "203.0.113.7"),
            (env::WG_SERVER_ADDRESS, "10.0.0.1"),
            (env::WG_CLIENT_ADDRESS, "10.0.0.1"),
        ])
        .unwrap();
        assert!(ConfigResolver::new(settings).resolve_tunnel().is_err());
    }
}

//! Point-to-point WireGuard tunnel provisioning.
//!
//! Generates (or reuses) a key pair for each end of the tunnel and writes a
//! `wg-quick` configuration for the server (this host) and one for the
//! client to copy to the other host. Private keys and both configurations
//! are written with mode 0600.

use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use strum::Display;
use tracing::info;

use crate::config::{Secret, TunnelConfig};
use crate::document::WgConfig;
use crate::executor::CommandSpec;
use crate::host::Host;

pub const SECRET_MODE: u32 = 0o600;
pub const PUBLIC_MODE: u32 = 0o644;
pub const KEEPALIVE_SECONDS: u16 = 25;
const UFW_BINARY: &str = "/usr/sbin/ufw";
const DRY_RUN_KEY: &str = "<generated-at-run-time>";

/// Which end of the tunnel a key pair belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TunnelRole {
    Server,
    Client,
}

/// A WireGuard key pair.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private: Secret,
    pub public: String,
}

/// Files written by a tunnel run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelOutcome {
    pub server_config: Utf8PathBuf,
    pub client_config: Utf8PathBuf,
    pub server_public_key: String,
    pub client_public_key: String,
}

/// Host prefix length for a single tunnel address.
fn host_prefix(addr: &std::net::IpAddr) -> u8 {
    if addr.is_ipv4() { 32 } else { 128 }
}

/// Builds the server-side configuration.
pub fn server_config(config: &TunnelConfig, server: &KeyPair, client: &KeyPair) -> WgConfig {
    WgConfig::new()
        .interface(
            "Address",
            format!("{}/{}", config.server_address, host_prefix(&config.server_address)),
        )
        .interface("ListenPort", config.listen_port.to_string())
        .interface("PrivateKey", server.private.expose())
        .peer([
            ("PublicKey", client.public.clone()),
            (
                "AllowedIPs",
                format!("{}/{}", config.client_address, host_prefix(&config.client_address)),
            ),
        ])
}

/// Builds the client-side configuration. Only the server's tunnel address
/// is routed through the tunnel.
pub fn client_config(config: &TunnelConfig, server: &KeyPair, client: &KeyPair) -> WgConfig {
    let endpoint = if config.endpoint.contains(':') {
        format!("[{}]:{}", config.endpoint, config.listen_port)
    } else {
        format!("{}:{}", config.endpoint, config.listen_port)
    };
    WgConfig::new()
        .interface("PrivateKey", client.private.expose())
        .interface(
            "Address",
            format!("{}/{}", config.client_address, host_prefix(&config.client_address)),
        )
        .peer([
            ("PublicKey", server.public.clone()),
            ("Endpoint", endpoint),
            (
                "AllowedIPs",
                format!("{}/{}", config.server_address, host_prefix(&config.server_address)),
            ),
            ("PersistentKeepalive", KEEPALIVE_SECONDS.to_string()),
        ])
}

/// Provisions the tunnel on one host.
pub struct TunnelProvisioner<'a> {
    host: &'a Host,
    config: &'a TunnelConfig,
}

impl<'a> TunnelProvisioner<'a> {
    pub fn new(host: &'a Host, config: &'a TunnelConfig) -> Self {
        Self { host, config }
    }

    fn key_path(&self, role: TunnelRole, ext: &str) -> Utf8PathBuf {
        self.config
            .dir
            .join(format!("{}-{}.{}", self.config.interface, role, ext))
    }

    pub fn server_config_path(&self) -> Utf8PathBuf {
        self.config.dir.join(format!("{}.conf", self.config.interface))
    }

    pub fn client_config_path(&self) -> Utf8PathBuf {
        self.config.dir.join(format!("{}-client.conf", self.config.interface))
    }

    fn derive_public(&self, private: &Secret) -> Result<Option<String>> {
        let result = self
            .host
            .run(
                &CommandSpec::new("wg", ["pubkey"])
                    .with_stdin(format!("{}\n", private.expose()))
                    .capturing_stdout(),
            )
            .context("failed to derive public key")?;
        Ok(result.stdout.map(|s| s.trim().to_string()))
    }

    /// Loads the key pair for `role`, generating it if no private key exists.
    pub fn ensure_keypair(&self, role: TunnelRole) -> Result<KeyPair> {
        let private_path = self.key_path(role, "key");
        let public_path = self.key_path(role, "pub");

        if let Some(existing) = self.host.read_optional(&private_path)? {
            let private = Secret::new(existing.trim());
            if private.expose().is_empty() {
                bail!("{} is empty", private_path);
            }
            let public = match self.host.read_optional(&public_path)? {
                Some(public) if !public.trim().is_empty() => public.trim().to_string(),
                _ => {
                    let derived = self
                        .derive_public(&private)?
                        .unwrap_or_else(|| DRY_RUN_KEY.to_string());
                    self.host
                        .write_file(&public_path, &format!("{}\n", derived), PUBLIC_MODE)?;
                    derived
                }
            };
            info!("reusing {} key pair from {}", role, private_path);
            return Ok(KeyPair { private, public });
        }

        let generated = self
            .host
            .run(&CommandSpec::new("wg", ["genkey"]).capturing_stdout())
            .with_context(|| format!("failed to generate {} private key", role))?;
        let Some(private) = generated.stdout.map(|s| Secret::new(s.trim())) else {
            info!("would generate {} key pair in {}", role, self.config.dir);
            return Ok(KeyPair {
                private: Secret::new(DRY_RUN_KEY),
                public: DRY_RUN_KEY.to_string(),
            });
        };
        if private.expose().is_empty() {
            bail!("wg genkey returned no key");
        }
        let public = self
            .derive_public(&private)?
            .filter(|p| !p.is_empty())
            .context("wg pubkey returned no key")?;

        self.host
            .write_file(&private_path, &format!("{}\n", private.expose()), SECRET_MODE)?;
        self.host
            .write_file(&public_path, &format!("{}\n", public), PUBLIC_MODE)?;
        info!("generated {} key pair in {}", role, self.config.dir);
        Ok(KeyPair { private, public })
    }

    /// Writes `content` unless the file already holds it. Returns true if the
    /// file was (or would be) written.
    fn write_if_changed(&self, path: &Utf8PathBuf, content: &str) -> Result<bool> {
        if self.host.read_optional(path)?.as_deref() == Some(content) {
            info!("{} is already up to date", path);
            return Ok(false);
        }
        self.host.write_file(path, content, SECRET_MODE)?;
        info!("wrote {}", path);
        Ok(true)
    }

    pub fn run(&self) -> Result<TunnelOutcome> {
        let iface = &self.config.interface;
        info!("provisioning tunnel {} towards {}", iface, self.config.endpoint);

        self.host.create_dir(&self.config.dir, 0o700)?;
        let server = self.ensure_keypair(TunnelRole::Server)?;
        let client = self.ensure_keypair(TunnelRole::Client)?;

        let server_path = self.server_config_path();
        let client_path = self.client_config_path();
        let server_existed = self.host.exists(&server_path);
        let server_changed = self.write_if_changed(
            &server_path,
            &server_config(self.config, &server, &client).render(),
        )?;
        self.write_if_changed(
            &client_path,
            &client_config(self.config, &server, &client).render(),
        )?;

        if self.host.exists(UFW_BINARY) {
            let rule = format!("{}/udp", self.config.listen_port);
            self.host
                .run(&CommandSpec::new("ufw", ["allow".to_string(), rule.clone()]))
                .with_context(|| format!("failed to allow {} in the firewall", rule))?;
        } else {
            info!("ufw not installed; not opening {}/udp", self.config.listen_port);
        }

        let unit = format!("wg-quick@{}", iface);
        self.host
            .run(&CommandSpec::new("systemctl", ["enable", "--now", unit.as_str()]))
            .with_context(|| format!("failed to start {}", unit))?;
        if server_existed && server_changed {
            self.host
                .run(&CommandSpec::new("systemctl", ["restart", unit.as_str()]))
                .with_context(|| format!("failed to restart {}", unit))?;
        }

        Ok(TunnelOutcome {
            server_config: self.host.path(&server_path),
            client_config: self.host.path(&client_path),
            server_public_key: server.public,
            client_public_key: client.public,
        })
    }
}

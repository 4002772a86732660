//! WireGuard tunnel flow against a fake host root.

mod helpers;

use anyhow::Result;
use helpers::{FakeHost, apply_args, env, seed_ubuntu_root, shared};

fn tunnel_env() -> Vec<(String, String)> {
    env(&[("WG_ENDPOINT", "vpn.example.com"), ("WG_DIR", "/etc/wireguard")])
}

#[test]
fn generates_keys_and_both_configs() -> Result<()> {
    let root = seed_ubuntu_root();
    root.write("/usr/sbin/ufw", "");
    let (fake, executor) = shared(FakeHost::new(&root.root));

    let outcome = hostprep::run_tunnel(&apply_args(&root.root, false), tunnel_env(), executor)?;

    assert_eq!(outcome.server_config, root.path("/etc/wireguard/wg0.conf"));
    assert_eq!(outcome.client_config, root.path("/etc/wireguard/wg0-client.conf"));
    assert_eq!(fake.count("wg", &["genkey"]), 2);

    let server_private = root.read("/etc/wireguard/wg0-server.key");
    let client_private = root.read("/etc/wireguard/wg0-client.key");
    assert_ne!(server_private, client_private);
    assert_eq!(root.mode("/etc/wireguard/wg0-server.key"), 0o600);
    assert_eq!(root.mode("/etc/wireguard/wg0-client.key"), 0o600);
    assert_eq!(root.mode("/etc/wireguard/wg0.conf"), 0o600);
    assert_eq!(root.mode("/etc/wireguard/wg0-client.conf"), 0o600);
    assert_eq!(root.mode("/etc/wireguard"), 0o700);

    let server = root.read("/etc/wireguard/wg0.conf");
    assert!(server.starts_with("[Interface]\n"));
    assert!(server.contains("Address = 10.200.0.1/32\n"));
    assert!(server.contains("ListenPort = 51820\n"));
    assert!(server.contains(&format!("PrivateKey = {}", server_private.trim())));
    assert!(server.contains(&format!("PublicKey = {}", outcome.client_public_key)));
    assert!(server.contains("AllowedIPs = 10.200.0.2/32\n"));

    let client = root.read("/etc/wireguard/wg0-client.conf");
    assert!(client.contains(&format!("PrivateKey = {}", client_private.trim())));
    assert!(client.contains(&format!("PublicKey = {}", outcome.server_public_key)));
    assert!(client.contains("Endpoint = vpn.example.com:51820\n"));
    assert!(client.contains("AllowedIPs = 10.200.0.1/32\n"));
    assert!(client.contains("PersistentKeepalive = 25\n"));
    assert!(!client.contains(server_private.trim()));

    assert_eq!(fake.count("ufw", &["allow", "51820/udp"]), 1);
    assert_eq!(fake.count("systemctl", &["enable", "--now", "wg-quick@wg0"]), 1);
    Ok(())
}

#[test]
fn private_keys_never_appear_on_command_lines() -> Result<()> {
    let root = seed_ubuntu_root();
    let (fake, executor) = shared(FakeHost::new(&root.root));

    hostprep::run_tunnel(&apply_args(&root.root, false), tunnel_env(), executor)?;

    let private = root.read("/etc/wireguard/wg0-server.key");
    for call in fake.calls() {
        assert!(!call.args.iter().any(|a| a.contains(private.trim())), "{:?}", call);
    }
    let pubkey_calls: Vec<_> = fake
        .calls()
        .into_iter()
        .filter(|c| c.matches("wg", &["pubkey"]))
        .collect();
    assert_eq!(pubkey_calls.len(), 2);
    assert!(pubkey_calls.iter().all(|c| c.stdin.is_some()));
    Ok(())
}

#[test]
fn rerun_reuses_existing_keys() -> Result<()> {
    let root = seed_ubuntu_root();
    let (fake, executor) = shared(FakeHost::new(&root.root));
    let args = apply_args(&root.root, false);

    let first = hostprep::run_tunnel(&args, tunnel_env(), executor.clone())?;
    let server_conf = root.read("/etc/wireguard/wg0.conf");
    let second = hostprep::run_tunnel(&args, tunnel_env(), executor)?;

    assert_eq!(fake.count("wg", &["genkey"]), 2);
    assert_eq!(first, second);
    assert_eq!(root.read("/etc/wireguard/wg0.conf"), server_conf);
    assert_eq!(fake.count("systemctl", &["restart"]), 0);
    Ok(())
}

#[test]
fn changed_settings_restart_the_interface() -> Result<()> {
    let root = seed_ubuntu_root();
    let (fake, executor) = shared(FakeHost::new(&root.root));
    let args = apply_args(&root.root, false);

    hostprep::run_tunnel(&args, tunnel_env(), executor.clone())?;
    let mut vars = tunnel_env();
    vars.push(("WG_PORT".to_string(), "51900".to_string()));
    hostprep::run_tunnel(&args, vars, executor)?;

    assert!(root.read("/etc/wireguard/wg0.conf").contains("ListenPort = 51900\n"));
    assert!(root.read("/etc/wireguard/wg0-client.conf").contains("Endpoint = vpn.example.com:51900\n"));
    assert_eq!(fake.count("systemctl", &["restart", "wg-quick@wg0"]), 1);
    Ok(())
}

#[test]
fn firewall_is_left_alone_without_ufw() -> Result<()> {
    let root = seed_ubuntu_root();
    let (fake, executor) = shared(FakeHost::new(&root.root));

    hostprep::run_tunnel(&apply_args(&root.root, false), tunnel_env(), executor)?;

    assert_eq!(fake.count("ufw", &[]), 0);
    Ok(())
}

#[test]
fn missing_endpoint_is_a_configuration_error() {
    let root = seed_ubuntu_root();
    let (fake, executor) = shared(FakeHost::new(&root.root));

    let err = hostprep::run_tunnel(&apply_args(&root.root, false), env(&[]), executor).unwrap_err();

    assert!(format!("{:#}", err).contains("WG_ENDPOINT is required"));
    assert!(fake.calls().is_empty());
}

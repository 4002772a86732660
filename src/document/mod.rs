//! Structured views of the text files hostprep edits.
//!
//! Each document parses a file into an ordered representation, offers
//! upsert-style edits, and renders back to text. None of them touch the
//! filesystem, so the edit rules are testable on plain strings.
//!
//! - [`hosts`] — `/etc/hosts` with a loopback-alias upsert
//! - [`passwd`] — read-only `/etc/passwd` lookups
//! - [`sshd`] — `sshd_config` include handling and the hardening drop-in
//! - [`authorized_keys`] — public-key line recognition
//! - [`wireguard`] — `wg-quick` interface files

pub mod authorized_keys;
pub mod hosts;
pub mod passwd;
pub mod sshd;
pub mod wireguard;

pub use authorized_keys::AuthorizedKeys;
pub use hosts::HostsFile;
pub use passwd::{Passwd, PasswdEntry};
pub use sshd::{SshdConfig, SshdDropIn};
pub use wireguard::WgConfig;

/// Returns the first whitespace-separated token of a non-comment line.
pub(crate) fn first_token(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    trimmed.split_whitespace().next()
}

/// Joins lines with `\n` and terminates the result with a newline.
pub(crate) fn render_lines<S: AsRef<str>>(lines: &[S]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line.as_ref());
        out.push('\n');
    }
    out
}

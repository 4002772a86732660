//! `authorized_keys` content recognition.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ProvisionError;

/// Key types accepted in installed authorized_keys files.
pub const RECOGNIZED_KEY_TYPES: &[&str] = &[
    "ssh-rsa",
    "ssh-ed25519",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
];

static KEY_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(ssh-rsa|ssh-ed25519|ecdsa-sha2-nistp(?:256|384|521))\s+[A-Za-z0-9+/]+=*(\s.*)?$")
        .expect("key line regex is valid")
});

/// Key material destined for an authorized_keys file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKeys {
    content: String,
}

impl AuthorizedKeys {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Lines that start with a recognized key type followed by key data.
    pub fn key_lines(&self) -> impl Iterator<Item = &str> {
        self.content
            .lines()
            .map(str::trim)
            .filter(|line| KEY_LINE_RE.is_match(line))
    }

    /// Fails with `InvalidKeyData` unless at least one key line is present.
    ///
    /// Returns the number of recognized keys.
    pub fn validate(&self, source_name: &str) -> Result<usize, ProvisionError> {
        match self.key_lines().count() {
            0 => Err(ProvisionError::InvalidKeyData {
                source_name: source_name.to_string(),
            }),
            n => Ok(n),
        }
    }

    /// File content, newline-terminated.
    pub fn render(&self) -> String {
        if self.content.is_empty() || self.content.ends_with('\n') {
            self.content.clone()
        } else {
            format!("{}\n", self.content)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_content_without_key_lines() {
        let keys = AuthorizedKeys::new("# nothing here\n\nnot-a-key AAAA\n");
        let err = keys.validate("test").unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidKeyData { .. }));
    }

    #[test]
    fn rejects_html_error_pages() {
        let keys = AuthorizedKeys::new("<!DOCTYPE html><html><body>Not Found</body></html>");
        assert!(keys.validate("https://example.com/keys").is_err());
    }

    #[test]
    fn accepts_one_key_among_comments_and_blanks() {
        let keys = AuthorizedKeys::new(
            "# team keys\n\n  ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGx ops@laptop\n# end\n",
        );
        assert_eq!(keys.validate("test").unwrap(), 1);
    }

    #[test]
    fn recognizes_every_supported_type() {
        for key_type in RECOGNIZED_KEY_TYPES {
            let keys = AuthorizedKeys::new(format!("{} AAAAB3NzaC1yc2E=", key_type));
            assert_eq!(keys.validate("test").unwrap(), 1, "{} not recognized", key_type);
        }
    }

    #[test]
    fn type_without_key_data_is_not_a_key() {
        assert!(AuthorizedKeys::new("ssh-ed25519\n").validate("t").is_err());
        assert!(AuthorizedKeys::new("ssh-dss AAAAB3NzaC1kc3M=\n").validate("t").is_err());
    }

    #[test]
    fn render_appends_missing_newline() {
        assert_eq!(AuthorizedKeys::new("ssh-rsa AAAA").render(), "ssh-rsa AAAA\n");
        assert_eq!(AuthorizedKeys::new("ssh-rsa AAAA\n").render(), "ssh-rsa AAAA\n");
    }
}

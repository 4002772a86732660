//! OpenSSH daemon configuration documents.
//!
//! The main `sshd_config` is only ever touched to make sure it includes the
//! drop-in directory; everything hostprep enforces lives in its own
//! drop-in file, rendered by [`SshdDropIn`].

use super::{first_token, render_lines};

/// Glob the main config must include for drop-ins to take effect.
pub const DROP_IN_INCLUDE: &str = "/etc/ssh/sshd_config.d/*.conf";

/// Main `sshd_config` as ordered lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SshdConfig {
    lines: Vec<String>,
}

impl SshdConfig {
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    /// Returns true if an active `Include` directive names `pattern`.
    pub fn includes(&self, pattern: &str) -> bool {
        self.lines.iter().any(|line| {
            first_token(line).is_some_and(|t| t.eq_ignore_ascii_case("include"))
                && line.split_whitespace().skip(1).any(|arg| arg == pattern)
        })
    }

    /// Ensures an `Include` for `pattern` exists.
    ///
    /// sshd uses the first value it sees for most keywords, so the include is
    /// placed before any other directive. Returns true if the document changed.
    pub fn ensure_include(&mut self, pattern: &str) -> bool {
        if self.includes(pattern) {
            return false;
        }
        self.lines.insert(0, format!("Include {}", pattern));
        true
    }

    pub fn render(&self) -> String {
        render_lines(&self.lines)
    }
}

/// An ordered set of `Keyword value` directives written as a drop-in file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshdDropIn {
    header: String,
    directives: Vec<(String, String)>,
}

impl SshdDropIn {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            directives: Vec::new(),
        }
    }

    /// Sets `keyword` to `value`, replacing an earlier value for the same
    /// keyword (case-insensitive) in place.
    pub fn set(&mut self, keyword: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        match self
            .directives
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(keyword))
        {
            Some(entry) => entry.1 = value,
            None => self.directives.push((keyword.to_string(), value)),
        }
        self
    }

    /// Appends another value for a keyword sshd accepts repeatedly, such as `Port`.
    pub fn add(&mut self, keyword: &str, value: impl Into<String>) -> &mut Self {
        self.directives.push((keyword.to_string(), value.into()));
        self
    }

    pub fn get(&self, keyword: &str) -> Option<&str> {
        self.directives
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(keyword))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, keyword: &str) -> Vec<&str> {
        self.directives
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(keyword))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// The hardening policy enforced on every provisioned host.
    ///
    /// sshd listens on every port in `ports`, in order.
    pub fn hardening(ports: &[u16]) -> Self {
        let mut drop_in = Self::new("Managed by hostprep; local edits are overwritten.");
        for port in ports {
            drop_in.add("Port", port.to_string());
        }
        drop_in
            .set("PermitRootLogin", "no")
            .set("PasswordAuthentication", "no")
            .set("PermitEmptyPasswords", "no")
            .set("KbdInteractiveAuthentication", "no")
            .set("X11Forwarding", "no")
            .set("MaxAuthTries", "3");
        drop_in
    }

    /// Returns the directives not in force according to `effective`, the
    /// output of `sshd -T`.
    ///
    /// `sshd -T` prints one lowercase `keyword value` pair per line and
    /// repeats the keyword for every port, so each directive must appear as
    /// its own line.
    pub fn unmet_in(&self, effective: &str) -> Vec<String> {
        let in_force: Vec<(&str, &str)> = effective
            .lines()
            .filter_map(|line| line.trim().split_once(char::is_whitespace))
            .map(|(k, v)| (k, v.trim()))
            .collect();
        self.directives
            .iter()
            .filter(|(k, v)| {
                !in_force
                    .iter()
                    .any(|(key, value)| key.eq_ignore_ascii_case(k) && value.eq_ignore_ascii_case(v))
            })
            .map(|(k, v)| format!("{} {}", k, v))
            .collect()
    }

    pub fn render(&self) -> String {
        let mut lines = vec![format!("# {}", self.header)];
        lines.extend(self.directives.iter().map(|(k, v)| format!("{} {}", k, v)));
        render_lines(&lines)
    }
}

//! `/etc/hosts` document.

use super::{first_token, render_lines};

/// Address Debian-family systems use to map the machine's own names.
pub const LOOPBACK_ALIAS_ADDRESS: &str = "127.0.1.1";

/// Ordered lines of a hosts table.
///
/// Lines are kept verbatim; only the line owned by an address passed to
/// [`HostsFile::upsert`] is ever rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostsFile {
    lines: Vec<String>,
}

impl HostsFile {
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Returns the names mapped by the first active line for `address`.
    pub fn names_for(&self, address: &str) -> Option<Vec<&str>> {
        self.lines
            .iter()
            .find(|line| first_token(line) == Some(address))
            .map(|line| line.split_whitespace().skip(1).take_while(|t| !t.starts_with('#')).collect())
    }

    /// Maps `address` to `names`.
    ///
    /// Replaces the first active line for `address` if one exists, otherwise
    /// appends a new line. A replaced line keeps its leading address token,
    /// separator and trailing comment. Returns true if the document changed.
    pub fn upsert(&mut self, address: &str, names: &[String]) -> bool {
        match self.lines.iter().position(|line| first_token(line) == Some(address)) {
            Some(index) => {
                let line = &self.lines[index];
                let current: Vec<&str> = line
                    .split_whitespace()
                    .skip(1)
                    .take_while(|t| !t.starts_with('#'))
                    .collect();
                if current.iter().copied().eq(names.iter().map(String::as_str)) {
                    return false;
                }
                let entry = replace_names(line, address, names);
                self.lines[index] = entry;
                true
            }
            None => {
                self.lines.push(format!("{}\t{}", address, names.join(" ")));
                true
            }
        }
    }

    pub fn render(&self) -> String {
        render_lines(&self.lines)
    }
}

/// Rebuilds an active `line` for `address` with new `names`, keeping the
/// text around the names.
fn replace_names(line: &str, address: &str, names: &[String]) -> String {
    let head_end = line.len() - line.trim_start().len() + address.len();
    let (head, rest) = line.split_at(head_end);
    let separator_len = rest.len() - rest.trim_start().len();
    let separator = if separator_len == 0 { "\t" } else { &rest[..separator_len] };
    let mut entry = format!("{}{}{}", head, separator, names.join(" "));
    if let Some(comment) = rest.find('#').map(|at| rest[at..].trim_end()) {
        entry.push(' ');
        entry.push_str(comment);
    }
    entry
}

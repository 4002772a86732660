//! `wg-quick` configuration files.

use super::render_lines;

/// A `wg-quick` file: one `[Interface]` section followed by `[Peer]` sections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WgConfig {
    interface: Vec<(String, String)>,
    peers: Vec<Vec<(String, String)>>,
}

impl WgConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn interface(mut self, key: &str, value: impl Into<String>) -> Self {
        self.interface.push((key.to_string(), value.into()));
        self
    }

    /// Adds a `[Peer]` section with the given key/value pairs.
    #[must_use]
    pub fn peer<I, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, V)>,
        V: Into<String>,
    {
        self.peers.push(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.into()))
                .collect(),
        );
        self
    }

    /// Returns the first value for `key` in the `[Interface]` section.
    pub fn interface_value(&self, key: &str) -> Option<&str> {
        self.interface.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Returns the first value for `key` in the `index`th `[Peer]` section.
    pub fn peer_value(&self, index: usize, key: &str) -> Option<&str> {
        self.peers
            .get(index)?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn render(&self) -> String {
        let mut lines = vec!["[Interface]".to_string()];
        lines.extend(self.interface.iter().map(|(k, v)| format!("{} = {}", k, v)));
        for peer in &self.peers {
            lines.push(String::new());
            lines.push("[Peer]".to_string());
            lines.extend(peer.iter().map(|(k, v)| format!("{} = {}", k, v)));
        }
        render_lines(&lines)
    }
}

//! `/etc/passwd` lookups.

use camino::Utf8PathBuf;

/// One account from the passwd database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: Utf8PathBuf,
    pub shell: String,
}

/// Parsed passwd database. Lines that are not seven colon-separated fields
/// with numeric ids (NIS markers, garbage) are skipped.
#[derive(Debug, Clone, Default)]
pub struct Passwd {
    entries: Vec<PasswdEntry>,
}

impl Passwd {
    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() != 7 {
                tracing::debug!(line = number + 1, "skipping passwd line with {} fields", fields.len());
                continue;
            }
            let (Ok(uid), Ok(gid)) = (fields[2].parse::<u32>(), fields[3].parse::<u32>()) else {
                tracing::debug!(line = number + 1, "skipping passwd line with non-numeric ids");
                continue;
            };
            entries.push(PasswdEntry {
                name: fields[0].to_string(),
                uid,
                gid,
                home: Utf8PathBuf::from(fields[5]),
                shell: fields[6].to_string(),
            });
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&PasswdEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn entries(&self) -> &[PasswdEntry] {
        &self.entries
    }
}

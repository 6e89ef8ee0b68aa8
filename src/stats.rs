//! Plain-text `key=value` statistics stored in the `.stats` sibling file.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs,
    path::Path,
};

use crate::error::Result;

/// Ordered key/value statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    values: BTreeMap<String, String>,
}
impl Statistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<V: ToString>(&mut self, key: &str, value: V) {
        self.values.insert(key.to_string(), value.to_string());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copies every entry of `other` under `prefix`
    pub fn extend_prefixed(&mut self, prefix: &str, other: &Statistics) {
        for (key, value) in other.iter() {
            self.values.insert(format!("{prefix}{key}"), value.to_string());
        }
    }

    /// Parses the properties text format: `key=value` lines, `#` or `!` comments
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut stats = Self::new();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = match line.split_once(['=', ':']) {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (line, ""),
            };
            stats.put(key, value);
        }
        stats
    }

    #[must_use]
    pub fn to_text(&self, comment: &str) -> String {
        let mut text = format!("# {comment}\n");
        for (key, value) in &self.values {
            let _ = writeln!(text, "{key}={value}");
        }
        text
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P, comment: &str) -> Result<()> {
        fs::write(path, self.to_text(comment))?;
        Ok(())
    }

    /// Loads statistics; a missing file yields empty statistics
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            log::debug!("no statistics at {}", path.as_ref().display());
            return Ok(Self::new());
        }
        Ok(Self::parse(&fs::read_to_string(path)?))
    }
}

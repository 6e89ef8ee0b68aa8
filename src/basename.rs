//! Resolution of archive file names to archive basenames.

use std::path::{Path, PathBuf};

/// Extensions of the sibling files that make up an archive
pub const EXTENSIONS: [&str; 5] = [".header", ".entries", ".index", ".tmh", ".stats"];

/// Strips a known archive extension, if any
///
/// `sample.entries`, `sample.header` and `sample` all resolve to `sample`.
#[must_use]
pub fn basename<P: AsRef<Path>>(path: P) -> PathBuf {
    let raw = path.as_ref().to_string_lossy();
    for ext in EXTENSIONS {
        if let Some(stripped) = raw.strip_suffix(ext) {
            return PathBuf::from(stripped);
        }
    }
    path.as_ref().to_path_buf()
}

/// Resolves every path to its basename, dropping repeats while keeping first-seen order
#[must_use]
pub fn unique_basenames<P: AsRef<Path>>(paths: &[P]) -> Vec<PathBuf> {
    let mut seen = Vec::with_capacity(paths.len());
    for path in paths {
        let base = basename(path);
        if !seen.contains(&base) {
            seen.push(base);
        }
    }
    seen
}

/// Path of a sibling file of the archive, e.g. `sibling(base, ".index")`
#[must_use]
pub fn sibling<P: AsRef<Path>>(basename: P, extension: &str) -> PathBuf {
    let mut raw = basename.as_ref().as_os_str().to_os_string();
    raw.push(extension);
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_extensions_resolve_alike() {
        for name in [
            "run/s1",
            "run/s1.header",
            "run/s1.entries",
            "run/s1.index",
            "run/s1.tmh",
            "run/s1.stats",
        ] {
            assert_eq!(basename(name), PathBuf::from("run/s1"));
        }
    }

    #[test]
    fn test_dotted_basenames_are_kept() {
        assert_eq!(basename("a.sorted"), PathBuf::from("a.sorted"));
        assert_eq!(basename("a.sorted.entries"), PathBuf::from("a.sorted"));
    }

    #[test]
    fn test_unique_preserves_first_seen_order() {
        let names = ["b.entries", "a.header", "b.index", "a", "c.tmh"];
        assert_eq!(
            unique_basenames(&names),
            vec![PathBuf::from("b"), PathBuf::from("a"), PathBuf::from("c")]
        );
    }

    #[test]
    fn test_sibling() {
        assert_eq!(sibling("x/a.sorted", ".index"), PathBuf::from("x/a.sorted.index"));
    }
}

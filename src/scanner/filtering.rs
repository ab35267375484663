//! File filtering for scans.
//!
//! Decides which directory entries are admissible based on extension,
//! size ceiling, and glob ignore patterns.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};

/// Compiled admission rules for one scanner instance.
pub struct ScanFilter {
    extensions: HashSet<String>,
    ignore: Vec<glob::Pattern>,
    max_file_size: u64,
}

impl ScanFilter {
    pub fn new(extensions: &[String], ignore: &[String], max_file_size: u64) -> Result<Self> {
        let ignore = ignore
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| Error::Config(format!("invalid ignore pattern {p}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
            ignore,
            max_file_size,
        })
    }

    /// Whether a regular file should be scanned.
    pub fn admits(&self, path: &Path, size: u64) -> bool {
        let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
            return false;
        };
        if !self.extensions.contains(&ext.to_lowercase()) {
            return false;
        }

        if size > self.max_file_size {
            return false;
        }

        let path_str = path.to_string_lossy();
        for pattern in &self.ignore {
            if pattern.matches(&path_str) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn filter() -> ScanFilter {
        ScanFilter::new(
            &["txt".into(), "md".into()],
            &["**/node_modules/**".into()],
            1024,
        )
        .unwrap()
    }

    #[test]
    fn admits_allowed_extension() {
        assert!(filter().admits(&PathBuf::from("/tmp/a.txt"), 10));
        assert!(filter().admits(&PathBuf::from("/tmp/a.MD"), 10));
    }

    #[test]
    fn rejects_unknown_extension_and_missing_extension() {
        assert!(!filter().admits(&PathBuf::from("/tmp/a.exe"), 10));
        assert!(!filter().admits(&PathBuf::from("/tmp/Makefile"), 10));
    }

    #[test]
    fn rejects_oversized_files() {
        assert!(!filter().admits(&PathBuf::from("/tmp/a.txt"), 4096));
    }

    #[test]
    fn rejects_ignored_paths() {
        assert!(!filter().admits(&PathBuf::from("/src/node_modules/a.txt"), 10));
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let result = ScanFilter::new(&["txt".into()], &["[".into()], 1024);
        assert!(result.is_err());
    }
}

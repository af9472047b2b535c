use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One independently processed item of work: a species directory, a
/// sequencing run, or similar. Constructed once at startup and immutable
/// thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Unique name; also names the unit's output subdirectories and log.
    pub name: String,
    /// Resource group this unit shares an exclusively-built artifact with
    /// (e.g. several sequencing runs of one species share one index).
    pub group: Option<String>,
    /// Primary input artifact, when the pipeline starts from a local file.
    pub input: Option<PathBuf>,
}

impl Unit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: None,
            input: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Stem of the primary input file, used to name per-unit artifacts
    /// derived from it.
    pub fn input_stem(&self) -> Option<&str> {
        self.input.as_deref().and_then(|p| p.file_stem()?.to_str())
    }
}

/// Distinct resource groups of a unit set, in first-appearance order.
pub fn distinct_groups(units: &[Unit]) -> Vec<String> {
    let mut seen = Vec::new();
    for unit in units {
        if let Some(group) = &unit.group {
            if !seen.contains(group) {
                seen.push(group.clone());
            }
        }
    }
    seen
}

/// Locate a unit's primary input in `dir` by trying each extension
/// candidate in order and taking the lexicographically first match.
pub fn find_primary_input(dir: &Path, extensions: &[&str]) -> Option<PathBuf> {
    for ext in extensions {
        let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(*ext)
            })
            .collect();
        matches.sort();
        if let Some(first) = matches.into_iter().next() {
            return Some(first);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_groups_first_appearance_order() {
        let units = vec![
            Unit::new("s1").with_group("beta"),
            Unit::new("s2").with_group("alpha"),
            Unit::new("s3").with_group("beta"),
            Unit::new("s4"),
        ];
        assert_eq!(distinct_groups(&units), vec!["beta", "alpha"]);
    }

    #[test]
    fn test_find_primary_input_prefers_extension_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("genome.fna"), "ACGT").unwrap();
        std::fs::write(dir.path().join("assembly.fa"), "ACGT").unwrap();

        let found = find_primary_input(dir.path(), &["fasta", "fa", "fna"]).unwrap();
        assert_eq!(found.file_name().unwrap(), "assembly.fa");
    }

    #[test]
    fn test_find_primary_input_none_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_primary_input(dir.path(), &["fasta", "fa", "fna"]).is_none());
    }

    #[test]
    fn test_input_stem() {
        let unit = Unit::new("sp").with_input("/data/sp/assembly_v2.fna");
        assert_eq!(unit.input_stem(), Some("assembly_v2"));
    }
}

//! Species discovery for the annotation pipeline: one unit per
//! subdirectory of the data directory, with its assembly file located by
//! extension candidates.

use anyhow::{Context, Result};
use genopipe_orchestration::stages::annotate::ASSEMBLY_EXTENSIONS;
use genopipe_orchestration::{find_primary_input, Unit};
use std::path::Path;
use tracing::warn;

/// Enumerate species directories under `data_dir`. Hidden directories and
/// the results tree (when it lives inside the data directory) are
/// excluded. Units whose assembly cannot be found are still returned so
/// the run report accounts for them.
pub fn discover_species(data_dir: &Path, results_dir: &Path) -> Result<Vec<Unit>> {
    let results_name = results_dir
        .file_name()
        .and_then(|n| n.to_str())
        .map(String::from);

    let mut names: Vec<String> = std::fs::read_dir(data_dir)
        .with_context(|| format!("cannot read data directory {}", data_dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .filter(|name| results_name.as_deref() != Some(name.as_str()))
        .collect();
    names.sort();

    let units = names
        .into_iter()
        .map(|name| {
            let dir = data_dir.join(&name);
            let unit = Unit::new(&name);
            match find_primary_input(&dir, &ASSEMBLY_EXTENSIONS) {
                Some(input) => unit.with_input(input),
                None => {
                    warn!(species = %name, dir = %dir.display(), "no assembly file found");
                    unit
                }
            }
        })
        .collect();

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovers_species_with_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path();

        std::fs::create_dir(data.join("chlorella")).unwrap();
        std::fs::write(data.join("chlorella/assembly.fna"), ">c\nACGT\n").unwrap();
        std::fs::create_dir(data.join("spirulina")).unwrap();
        std::fs::create_dir(data.join(".snapshots")).unwrap();

        let units = discover_species(data, &data.join("results")).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].name, "chlorella");
        assert!(units[0].input.is_some());
        assert_eq!(units[1].name, "spirulina");
        assert!(units[1].input.is_none());
    }

    #[test]
    fn test_results_tree_inside_data_dir_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path();
        let results = data.join("results");

        std::fs::create_dir(data.join("chlorella")).unwrap();
        std::fs::create_dir(&results).unwrap();

        let units = discover_species(data, &results).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name, "chlorella");
    }

    #[test]
    fn test_missing_data_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("absent");
        assert!(discover_species(&absent, &dir.path().join("results")).is_err());
    }
}

//! Readers for the delimited mapping files: the sample manifest, the
//! genome map and the per-species model associations.

use anyhow::{bail, Context, Result};
use genopipe_orchestration::stages::annotate::{ModelAssignment, ModelMap};
use genopipe_orchestration::Unit;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct SampleRow {
    sra_id: String,
    species_name: String,
}

/// One unit per manifest row; the species is the unit's resource group.
pub fn read_samples(path: &Path) -> Result<Vec<Unit>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("cannot read sample manifest {}", path.display()))?;

    let mut units = Vec::new();
    for row in reader.deserialize() {
        let row: SampleRow =
            row.with_context(|| format!("malformed row in {}", path.display()))?;
        units.push(Unit::new(row.sra_id).with_group(row.species_name));
    }
    if units.is_empty() {
        bail!("no samples found in {}", path.display());
    }
    Ok(units)
}

#[derive(Debug, Deserialize)]
struct GenomeMapRow {
    species_name: String,
    assembly_accession: String,
}

pub fn read_genome_map(path: &Path) -> Result<HashMap<String, String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("cannot read genome map {}", path.display()))?;

    let mut map = HashMap::new();
    for row in reader.deserialize() {
        let row: GenomeMapRow =
            row.with_context(|| format!("malformed row in {}", path.display()))?;
        map.insert(row.species_name, row.assembly_accession);
    }
    Ok(map)
}

#[derive(Debug, Deserialize)]
struct ModelRow {
    species: String,
    #[serde(default)]
    busco_lineage: String,
    #[serde(default)]
    augustus_model: String,
}

/// Per-species model associations; an empty column means the association
/// is absent for that species (surfaced later as a missing-configuration
/// skip, never as a silent default).
pub fn read_models(path: &Path) -> Result<ModelMap> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("cannot read model map {}", path.display()))?;

    let mut map = ModelMap::new();
    for row in reader.deserialize() {
        let row: ModelRow =
            row.with_context(|| format!("malformed row in {}", path.display()))?;
        map.insert(
            row.species,
            ModelAssignment {
                busco_lineage: non_empty(row.busco_lineage),
                augustus_model: non_empty(row.augustus_model),
            },
        );
    }
    Ok(map)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

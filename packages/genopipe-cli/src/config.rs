use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Immutable run configuration, loaded once at startup and passed by
/// reference everywhere. There is no ambient mutable state.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Worker pool size: units processed concurrently per stage sweep.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    /// Total core budget divided across the pool.
    #[serde(default = "default_total_cores")]
    pub total_cores: usize,
    /// Ceiling for a single external command, in seconds.
    #[serde(default = "default_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub annotate: Option<AnnotateConfig>,
    #[serde(default)]
    pub rnaseq: Option<RnaseqConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnotateConfig {
    /// One subdirectory per species, each holding an assembly file.
    pub data_dir: PathBuf,
    pub results_dir: PathBuf,
    /// Per-species model associations (csv: species, busco_lineage,
    /// augustus_model).
    pub models_file: PathBuf,
    #[serde(default)]
    pub diamond_db: Option<PathBuf>,
    #[serde(default)]
    pub eggnog_data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RnaseqConfig {
    pub output_dir: PathBuf,
    pub ref_dir: PathBuf,
    /// Sample manifest (csv: sra_id, species_name).
    pub samples_file: PathBuf,
    /// Species-to-accession map (csv: species_name, assembly_accession).
    pub genome_map_file: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }
}

fn default_jobs() -> usize {
    4
}

fn default_total_cores() -> usize {
    num_cpus::get()
}

fn default_timeout() -> u64 {
    3600
}

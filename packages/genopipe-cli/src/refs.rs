//! The bridge between the two pipelines: link each species' assembly and
//! predicted-gene annotation from the annotation trees into the RNA-seq
//! reference directory under canonical names.

use crate::config::{AnnotateConfig, RnaseqConfig};
use crate::manifest;
use anyhow::{Context, Result};
use genopipe_orchestration::stages::annotate::ASSEMBLY_EXTENSIONS;
use genopipe_orchestration::{distinct_groups, find_primary_input};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const ANNOTATION_EXTENSIONS: [&str; 2] = ["gff", "gff3"];

/// Prepare `{species}.fa` and `{species}.gff3` links for every species
/// referenced by the sample manifest. Species without a genome-map entry
/// or without source files are skipped with a warning; the RNA-seq run
/// itself reports the consequences per unit.
pub fn prepare_references(annotate: &AnnotateConfig, rnaseq: &RnaseqConfig) -> Result<()> {
    std::fs::create_dir_all(&rnaseq.ref_dir)
        .with_context(|| format!("cannot create {}", rnaseq.ref_dir.display()))?;

    let units = manifest::read_samples(&rnaseq.samples_file)?;
    let genome_map = manifest::read_genome_map(&rnaseq.genome_map_file)?;
    let species = distinct_groups(&units);
    info!(count = species.len(), "preparing references");

    for name in species {
        let Some(accession) = genome_map.get(&name) else {
            warn!(species = %name, "no assembly accession in genome map, skipping");
            continue;
        };
        info!(species = %name, accession = %accession, "linking references");

        let fasta_dir = annotate.data_dir.join(&name);
        let gff_dir = annotate.results_dir.join("augustus").join(&name);

        link_reference(
            find_primary_input(&fasta_dir, &ASSEMBLY_EXTENSIONS),
            &rnaseq.ref_dir.join(format!("{name}.fa")),
            &fasta_dir,
        )?;
        link_reference(
            find_primary_input(&gff_dir, &ANNOTATION_EXTENSIONS),
            &rnaseq.ref_dir.join(format!("{name}.gff3")),
            &gff_dir,
        )?;
    }

    Ok(())
}

fn link_reference(source: Option<PathBuf>, dest: &Path, searched: &Path) -> Result<()> {
    let Some(source) = source else {
        warn!(dir = %searched.display(), "no reference file found");
        return Ok(());
    };

    // Refresh a stale link; never clobber a real file someone placed here.
    if dest.symlink_metadata().map(|m| m.is_symlink()).unwrap_or(false) {
        std::fs::remove_file(dest)
            .with_context(|| format!("cannot remove stale link {}", dest.display()))?;
    }

    let absolute = std::fs::canonicalize(&source)
        .with_context(|| format!("cannot resolve {}", source.display()))?;
    std::os::unix::fs::symlink(&absolute, dest)
        .with_context(|| format!("cannot link {} -> {}", dest.display(), absolute.display()))?;
    info!(link = %dest.display(), target = %absolute.display(), "linked");
    Ok(())
}

//! RNA-seq quantification pipeline: per-run acquisition, read QC and
//! trimming, then alignment and counting against a per-species reference.
//! The index build is exclusive-per-group: every sequencing run of one
//! species shares the same index, so the build must never race with
//! itself.

use crate::budget::ResourceBudget;
use crate::stage::{CommandSpec, PipelineSpec, Requirement, Stage, StageMode, StagePlan};
use crate::unit::Unit;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Output and reference trees for the RNA-seq pipeline.
#[derive(Debug, Clone)]
pub struct RnaseqLayout {
    pub output_dir: PathBuf,
    pub ref_dir: PathBuf,
}

impl RnaseqLayout {
    pub fn new(output_dir: impl Into<PathBuf>, ref_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ref_dir: ref_dir.into(),
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    pub fn sra_dir(&self) -> PathBuf {
        self.output_dir.join("sra")
    }

    pub fn sra_file(&self, unit: &Unit) -> PathBuf {
        self.sra_dir()
            .join(&unit.name)
            .join(format!("{}.sra", unit.name))
    }

    pub fn fastq_raw_dir(&self) -> PathBuf {
        self.output_dir.join("fastq_raw")
    }

    pub fn raw_fastq(&self, unit: &Unit) -> PathBuf {
        self.fastq_raw_dir().join(format!("{}.fastq", unit.name))
    }

    pub fn fastqc_dir(&self) -> PathBuf {
        self.output_dir.join("fastqc_raw")
    }

    pub fn fastqc_report(&self, unit: &Unit) -> PathBuf {
        self.fastqc_dir().join(format!("{}_fastqc.html", unit.name))
    }

    pub fn trimmed_dir(&self) -> PathBuf {
        self.output_dir.join("fastq_trimmed")
    }

    pub fn trimmed_fastq(&self, unit: &Unit) -> PathBuf {
        self.trimmed_dir()
            .join(format!("{}_trimmed.fastq", unit.name))
    }

    pub fn adapter_file(&self) -> PathBuf {
        self.ref_dir.join("TruSeq3-SE.fa")
    }

    pub fn genome_fasta(&self, group: &str) -> PathBuf {
        self.ref_dir.join(format!("{group}.fa"))
    }

    pub fn genome_gff(&self, group: &str) -> PathBuf {
        self.ref_dir.join(format!("{group}.gff3"))
    }

    pub fn star_index_dir(&self, group: &str) -> PathBuf {
        self.ref_dir.join(format!("{group}_star_index"))
    }

    /// The suffix-array file STAR writes last; its presence marks a
    /// completed index build.
    pub fn star_index_marker(&self, group: &str) -> PathBuf {
        self.star_index_dir(group).join("SA")
    }

    pub fn bam_dir(&self, group: &str) -> PathBuf {
        self.output_dir.join(group).join("bam_files")
    }

    pub fn bam_file(&self, unit: &Unit, group: &str) -> PathBuf {
        self.bam_dir(group)
            .join(format!("{}_Aligned.sortedByCoord.out.bam", unit.name))
    }

    pub fn counts_dir(&self, group: &str) -> PathBuf {
        self.output_dir.join(group).join("counts_htseq")
    }

    pub fn counts_file(&self, unit: &Unit, group: &str) -> PathBuf {
        self.counts_dir(group)
            .join(format!("{}_counts.txt", unit.name))
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

fn missing_group() -> StagePlan {
    StagePlan::MissingConfig {
        reason: "unit has no species assigned".to_string(),
        fatal: true,
    }
}

/// Download the run archive from the sequence read archive.
pub struct FetchStage {
    layout: Arc<RnaseqLayout>,
}

impl Stage for FetchStage {
    fn id(&self) -> &'static str {
        "fetch"
    }

    fn output_artifacts(&self, unit: &Unit) -> Vec<PathBuf> {
        vec![self.layout.sra_file(unit)]
    }

    fn plan(&self, unit: &Unit, _budget: &ResourceBudget) -> StagePlan {
        StagePlan::Command(
            CommandSpec::new("prefetch")
                .arg(&unit.name)
                .args(["-O", &path_arg(&self.layout.sra_dir())]),
        )
    }

    fn prepare(&self, _unit: &Unit) -> std::io::Result<()> {
        std::fs::create_dir_all(self.layout.sra_dir())
    }
}

/// Convert the archive to FASTQ.
pub struct ConvertStage {
    layout: Arc<RnaseqLayout>,
}

impl Stage for ConvertStage {
    fn id(&self) -> &'static str {
        "convert"
    }

    fn output_artifacts(&self, unit: &Unit) -> Vec<PathBuf> {
        vec![self.layout.raw_fastq(unit)]
    }

    fn requires(&self, unit: &Unit) -> Vec<Requirement> {
        vec![Requirement::essential(self.layout.sra_file(unit))]
    }

    fn plan(&self, unit: &Unit, _budget: &ResourceBudget) -> StagePlan {
        StagePlan::Command(
            CommandSpec::new("fastq-dump")
                .args(["--outdir", &path_arg(&self.layout.fastq_raw_dir())])
                .arg(path_arg(&self.layout.sra_file(unit))),
        )
    }

    fn prepare(&self, _unit: &Unit) -> std::io::Result<()> {
        std::fs::create_dir_all(self.layout.fastq_raw_dir())
    }
}

/// Raw-read quality report via FastQC.
pub struct ReadQcStage {
    layout: Arc<RnaseqLayout>,
}

impl Stage for ReadQcStage {
    fn id(&self) -> &'static str {
        "read_qc"
    }

    fn output_artifacts(&self, unit: &Unit) -> Vec<PathBuf> {
        vec![self.layout.fastqc_report(unit)]
    }

    fn requires(&self, unit: &Unit) -> Vec<Requirement> {
        vec![Requirement::essential(self.layout.raw_fastq(unit))]
    }

    fn plan(&self, unit: &Unit, _budget: &ResourceBudget) -> StagePlan {
        StagePlan::Command(
            CommandSpec::new("fastqc")
                .arg(path_arg(&self.layout.raw_fastq(unit)))
                .args(["-o", &path_arg(&self.layout.fastqc_dir())]),
        )
    }

    fn prepare(&self, _unit: &Unit) -> std::io::Result<()> {
        std::fs::create_dir_all(self.layout.fastqc_dir())
    }
}

/// Adapter and quality trimming via Trimmomatic.
pub struct TrimStage {
    layout: Arc<RnaseqLayout>,
}

impl Stage for TrimStage {
    fn id(&self) -> &'static str {
        "trim"
    }

    fn output_artifacts(&self, unit: &Unit) -> Vec<PathBuf> {
        vec![self.layout.trimmed_fastq(unit)]
    }

    fn requires(&self, unit: &Unit) -> Vec<Requirement> {
        vec![Requirement::essential(self.layout.raw_fastq(unit))]
    }

    fn plan(&self, unit: &Unit, budget: &ResourceBudget) -> StagePlan {
        StagePlan::Command(
            CommandSpec::new("trimmomatic")
                .arg("SE")
                .args(["-threads", &budget.cores_per_worker.to_string()])
                .arg(path_arg(&self.layout.raw_fastq(unit)))
                .arg(path_arg(&self.layout.trimmed_fastq(unit)))
                .arg(format!(
                    "ILLUMINACLIP:{}:2:30:10",
                    path_arg(&self.layout.adapter_file())
                ))
                .args(["LEADING:3", "TRAILING:3", "SLIDINGWINDOW:4:15", "MINLEN:36"]),
        )
    }

    fn prepare(&self, _unit: &Unit) -> std::io::Result<()> {
        std::fs::create_dir_all(self.layout.trimmed_dir())
    }
}

/// STAR index build, once per species. The reference files are prepared
/// by a separate bridge step; when they are absent the build is skipped
/// with a warning and the alignment stage halts on the missing index.
pub struct IndexStage {
    layout: Arc<RnaseqLayout>,
}

impl Stage for IndexStage {
    fn id(&self) -> &'static str {
        "index"
    }

    fn mode(&self) -> StageMode {
        StageMode::ExclusivePerGroup
    }

    fn output_artifacts(&self, unit: &Unit) -> Vec<PathBuf> {
        match &unit.group {
            Some(group) => vec![self.layout.star_index_marker(group)],
            None => Vec::new(),
        }
    }

    fn requires(&self, unit: &Unit) -> Vec<Requirement> {
        match &unit.group {
            Some(group) => vec![
                Requirement::optional(self.layout.genome_fasta(group)),
                Requirement::optional(self.layout.genome_gff(group)),
            ],
            None => Vec::new(),
        }
    }

    fn plan(&self, unit: &Unit, budget: &ResourceBudget) -> StagePlan {
        let Some(group) = &unit.group else {
            return missing_group();
        };
        // The build runs alone, outside the pool, so it gets every core.
        StagePlan::Command(
            CommandSpec::new("STAR")
                .args(["--runThreadN", &budget.total_cores.to_string()])
                .args(["--runMode", "genomeGenerate"])
                .args(["--genomeDir", &path_arg(&self.layout.star_index_dir(group))])
                .args(["--genomeFastaFiles", &path_arg(&self.layout.genome_fasta(group))])
                .args(["--sjdbGTFfile", &path_arg(&self.layout.genome_gff(group))])
                .args(["--sjdbOverhang", "99"]),
        )
    }

    fn prepare(&self, unit: &Unit) -> std::io::Result<()> {
        match &unit.group {
            Some(group) => std::fs::create_dir_all(self.layout.star_index_dir(group)),
            None => Ok(()),
        }
    }
}

/// Spliced alignment via STAR.
pub struct AlignStage {
    layout: Arc<RnaseqLayout>,
}

impl Stage for AlignStage {
    fn id(&self) -> &'static str {
        "align"
    }

    fn output_artifacts(&self, unit: &Unit) -> Vec<PathBuf> {
        match &unit.group {
            Some(group) => vec![self.layout.bam_file(unit, group)],
            None => Vec::new(),
        }
    }

    fn requires(&self, unit: &Unit) -> Vec<Requirement> {
        let Some(group) = &unit.group else {
            return Vec::new();
        };
        vec![
            Requirement::essential(self.layout.trimmed_fastq(unit)),
            Requirement::essential(self.layout.star_index_marker(group)),
        ]
    }

    fn plan(&self, unit: &Unit, budget: &ResourceBudget) -> StagePlan {
        let Some(group) = &unit.group else {
            return missing_group();
        };
        let prefix = self.layout.bam_dir(group).join(format!("{}_", unit.name));
        StagePlan::Command(
            CommandSpec::new("STAR")
                .args(["--runThreadN", &budget.cores_per_worker.to_string()])
                .args(["--genomeDir", &path_arg(&self.layout.star_index_dir(group))])
                .args(["--readFilesIn", &path_arg(&self.layout.trimmed_fastq(unit))])
                .args(["--outFileNamePrefix", &path_arg(&prefix)])
                .args(["--outSAMtype", "BAM", "SortedByCoordinate"]),
        )
    }

    fn prepare(&self, unit: &Unit) -> std::io::Result<()> {
        match &unit.group {
            Some(group) => std::fs::create_dir_all(self.layout.bam_dir(group)),
            None => Ok(()),
        }
    }
}

/// Per-gene read counting via htseq-count. The tool writes its table to
/// stdout; the runner persists it verbatim to the counts artifact while
/// progress messages on stderr go to the log.
pub struct QuantifyStage {
    layout: Arc<RnaseqLayout>,
}

impl Stage for QuantifyStage {
    fn id(&self) -> &'static str {
        "quantify"
    }

    fn output_artifacts(&self, unit: &Unit) -> Vec<PathBuf> {
        match &unit.group {
            Some(group) => vec![self.layout.counts_file(unit, group)],
            None => Vec::new(),
        }
    }

    fn requires(&self, unit: &Unit) -> Vec<Requirement> {
        let Some(group) = &unit.group else {
            return Vec::new();
        };
        vec![
            Requirement::essential(self.layout.bam_file(unit, group)),
            Requirement::essential(self.layout.genome_gff(group)),
        ]
    }

    fn plan(&self, unit: &Unit, _budget: &ResourceBudget) -> StagePlan {
        let Some(group) = &unit.group else {
            return missing_group();
        };
        StagePlan::Command(
            CommandSpec::new("htseq-count")
                .args(["-f", "bam"])
                .args(["-r", "pos"])
                .args(["-s", "no"])
                .arg("--idattr=ID")
                .arg(path_arg(&self.layout.bam_file(unit, group)))
                .arg(path_arg(&self.layout.genome_gff(group)))
                .capture_stdout(self.layout.counts_file(unit, group)),
        )
    }

    fn prepare(&self, unit: &Unit) -> std::io::Result<()> {
        match &unit.group {
            Some(group) => std::fs::create_dir_all(self.layout.counts_dir(group)),
            None => Ok(()),
        }
    }
}

/// Assemble the full RNA-seq stage sequence.
pub fn rnaseq_pipeline(layout: Arc<RnaseqLayout>) -> PipelineSpec {
    PipelineSpec {
        name: "rnaseq",
        requires_input: false,
        stages: vec![
            Arc::new(FetchStage {
                layout: Arc::clone(&layout),
            }),
            Arc::new(ConvertStage {
                layout: Arc::clone(&layout),
            }),
            Arc::new(ReadQcStage {
                layout: Arc::clone(&layout),
            }),
            Arc::new(TrimStage {
                layout: Arc::clone(&layout),
            }),
            Arc::new(IndexStage {
                layout: Arc::clone(&layout),
            }),
            Arc::new(AlignStage {
                layout: Arc::clone(&layout),
            }),
            Arc::new(QuantifyStage { layout }),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Arc<RnaseqLayout> {
        Arc::new(RnaseqLayout::new("/out", "/refs"))
    }

    fn unit() -> Unit {
        Unit::new("SRR0001").with_group("chlorella")
    }

    fn budget() -> ResourceBudget {
        ResourceBudget::compute(4, 16)
    }

    #[test]
    fn test_fetch_command_line() {
        let stage = FetchStage { layout: layout() };
        let StagePlan::Command(spec) = stage.plan(&unit(), &budget()) else {
            panic!("expected a command plan");
        };
        assert_eq!(spec.display_line(), "prefetch SRR0001 -O /out/sra");
    }

    #[test]
    fn test_index_is_exclusive_and_uses_all_cores() {
        let stage = IndexStage { layout: layout() };
        assert_eq!(stage.mode(), StageMode::ExclusivePerGroup);

        let StagePlan::Command(spec) = stage.plan(&unit(), &budget()) else {
            panic!("expected a command plan");
        };
        let line = spec.display_line();
        assert!(line.contains("--runThreadN 16"));
        assert!(line.contains("--runMode genomeGenerate"));
        assert!(line.contains("--genomeDir /refs/chlorella_star_index"));
        assert_eq!(
            stage.output_artifacts(&unit()),
            vec![PathBuf::from("/refs/chlorella_star_index/SA")]
        );
        // Missing references skip the build without halting the unit.
        assert!(stage.requires(&unit()).iter().all(|r| !r.essential));
    }

    #[test]
    fn test_align_requires_index_and_trimmed_reads() {
        let stage = AlignStage { layout: layout() };
        let requirements = stage.requires(&unit());
        assert_eq!(requirements.len(), 2);
        assert!(requirements.iter().all(|r| r.essential));

        let StagePlan::Command(spec) = stage.plan(&unit(), &budget()) else {
            panic!("expected a command plan");
        };
        let line = spec.display_line();
        assert!(line.contains("--runThreadN 4"));
        assert!(line.contains("--outFileNamePrefix /out/chlorella/bam_files/SRR0001_"));
        assert!(line.ends_with("--outSAMtype BAM SortedByCoordinate"));
    }

    #[test]
    fn test_quantify_captures_stdout() {
        let stage = QuantifyStage { layout: layout() };
        let StagePlan::Command(spec) = stage.plan(&unit(), &budget()) else {
            panic!("expected a command plan");
        };
        assert_eq!(
            spec.stdout_to,
            Some(PathBuf::from("/out/chlorella/counts_htseq/SRR0001_counts.txt"))
        );
        assert!(spec.display_line().starts_with("htseq-count -f bam -r pos -s no"));
    }

    #[test]
    fn test_groupless_unit_is_a_fatal_config_miss() {
        let stage = AlignStage { layout: layout() };
        let plan = stage.plan(&Unit::new("orphan"), &budget());
        assert!(matches!(plan, StagePlan::MissingConfig { fatal: true, .. }));
    }

    #[test]
    fn test_pipeline_stage_order() {
        let spec = rnaseq_pipeline(layout());
        assert_eq!(
            spec.stage_ids(),
            vec!["fetch", "convert", "read_qc", "trim", "index", "align", "quantify"]
        );
        assert!(!spec.requires_input);
    }
}

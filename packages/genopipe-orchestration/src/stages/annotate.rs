//! Genome annotation pipeline: per-species assembly QC, completeness
//! assessment, gene prediction, sequence extraction, homology search and
//! functional annotation. Every stage is concurrent-per-unit; units are
//! species directories carrying an assembly file.

use crate::budget::ResourceBudget;
use crate::stage::{CommandSpec, ExtractPlan, PipelineSpec, Requirement, Stage, StagePlan};
use crate::unit::Unit;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Assembly file extensions tried in order when locating a unit's input.
pub const ASSEMBLY_EXTENSIONS: [&str; 3] = ["fasta", "fa", "fna"];

/// Per-unit model associations, resolved once from the mapping file.
/// An absent association surfaces as a missing-configuration skip, never
/// as a silent lookup miss.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAssignment {
    pub busco_lineage: Option<String>,
    pub augustus_model: Option<String>,
}

pub type ModelMap = HashMap<String, ModelAssignment>;

/// Result-tree layout for the annotation pipeline: one directory per
/// stage family, one subdirectory per unit.
#[derive(Debug, Clone)]
pub struct AnnotateLayout {
    pub data_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl AnnotateLayout {
    pub fn new(data_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            results_dir: results_dir.into(),
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.results_dir.join("logs")
    }

    pub fn quast_dir(&self, unit: &Unit) -> PathBuf {
        self.results_dir.join("quast").join(&unit.name)
    }

    pub fn quast_report(&self, unit: &Unit) -> PathBuf {
        self.quast_dir(unit).join("report.txt")
    }

    pub fn busco_dir(&self) -> PathBuf {
        self.results_dir.join("busco")
    }

    pub fn busco_run_dir(&self, unit: &Unit) -> PathBuf {
        self.busco_dir().join(&unit.name)
    }

    pub fn augustus_dir(&self, unit: &Unit) -> PathBuf {
        self.results_dir.join("augustus").join(&unit.name)
    }

    /// Predicted-gene output, named after the assembly file stem.
    pub fn augustus_gff(&self, unit: &Unit) -> PathBuf {
        let stem = unit.input_stem().unwrap_or(&unit.name);
        self.augustus_dir(unit).join(format!("{stem}.gff"))
    }

    pub fn proteins_file(&self, unit: &Unit) -> PathBuf {
        self.results_dir
            .join("proteins")
            .join(format!("{}_proteins.faa", unit.name))
    }

    pub fn cds_file(&self, unit: &Unit) -> PathBuf {
        self.results_dir
            .join("cds")
            .join(format!("{}_cds.fna", unit.name))
    }

    pub fn diamond_dir(&self, unit: &Unit) -> PathBuf {
        self.results_dir.join("diamond").join(&unit.name)
    }

    pub fn diamond_tsv(&self, unit: &Unit) -> PathBuf {
        self.diamond_dir(unit)
            .join(format!("{}_diamond.tsv", unit.name))
    }

    pub fn eggnog_dir(&self, unit: &Unit) -> PathBuf {
        self.results_dir.join("eggnog").join(&unit.name)
    }

    pub fn eggnog_annotations(&self, unit: &Unit) -> PathBuf {
        self.eggnog_dir(unit)
            .join(format!("{}.emapper.annotations", unit.name))
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// Assembly QC via QUAST.
pub struct AssemblyQcStage {
    layout: Arc<AnnotateLayout>,
}

impl Stage for AssemblyQcStage {
    fn id(&self) -> &'static str {
        "assembly_qc"
    }

    fn output_artifacts(&self, unit: &Unit) -> Vec<PathBuf> {
        vec![self.layout.quast_report(unit)]
    }

    fn plan(&self, unit: &Unit, budget: &ResourceBudget) -> StagePlan {
        let Some(input) = &unit.input else {
            return missing_input();
        };
        StagePlan::Command(
            CommandSpec::new("quast.py")
                .args(["--output-dir", &path_arg(&self.layout.quast_dir(unit))])
                .args(["--threads", &budget.cores_per_worker.to_string()])
                .arg(path_arg(input)),
        )
    }

    fn prepare(&self, unit: &Unit) -> std::io::Result<()> {
        std::fs::create_dir_all(self.layout.quast_dir(unit))
    }
}

/// Completeness assessment via BUSCO.
pub struct CompletenessStage {
    layout: Arc<AnnotateLayout>,
    models: Arc<ModelMap>,
}

impl Stage for CompletenessStage {
    fn id(&self) -> &'static str {
        "completeness"
    }

    fn output_artifacts(&self, unit: &Unit) -> Vec<PathBuf> {
        vec![self.layout.busco_run_dir(unit)]
    }

    fn plan(&self, unit: &Unit, budget: &ResourceBudget) -> StagePlan {
        let Some(input) = &unit.input else {
            return missing_input();
        };
        let assignment = self.models.get(&unit.name);
        let Some(lineage) = assignment.and_then(|a| a.busco_lineage.clone()) else {
            // Completeness is informative only; later stages still run.
            return StagePlan::MissingConfig {
                reason: format!("no busco lineage assigned to '{}'", unit.name),
                fatal: false,
            };
        };
        let model = assignment
            .and_then(|a| a.augustus_model.clone())
            .unwrap_or_else(|| "generic".to_string());

        StagePlan::Command(
            CommandSpec::new("busco")
                .args(["-i", &path_arg(input)])
                .args(["-o", &unit.name])
                .args(["-l", &lineage])
                .args(["-m", "genome"])
                .args(["-c", &budget.cores_per_worker.to_string()])
                .args(["--out_path", &path_arg(&self.layout.busco_dir())])
                .args(["--augustus_species", &model])
                .arg("--force"),
        )
    }

    fn prepare(&self, _unit: &Unit) -> std::io::Result<()> {
        std::fs::create_dir_all(self.layout.busco_dir())
    }
}

/// Gene prediction via AUGUSTUS. A unit without an assigned model cannot
/// produce predictions, and everything downstream consumes them, so the
/// missing configuration is fatal to the unit.
pub struct AnnotateStage {
    layout: Arc<AnnotateLayout>,
    models: Arc<ModelMap>,
}

impl Stage for AnnotateStage {
    fn id(&self) -> &'static str {
        "annotate"
    }

    fn output_artifacts(&self, unit: &Unit) -> Vec<PathBuf> {
        vec![self.layout.augustus_gff(unit)]
    }

    fn plan(&self, unit: &Unit, _budget: &ResourceBudget) -> StagePlan {
        let Some(input) = &unit.input else {
            return missing_input();
        };
        let Some(model) = self
            .models
            .get(&unit.name)
            .and_then(|a| a.augustus_model.clone())
        else {
            return StagePlan::MissingConfig {
                reason: format!("no augustus model assigned to '{}'", unit.name),
                fatal: true,
            };
        };

        StagePlan::Command(
            CommandSpec::new("augustus")
                .arg(format!("--species={model}"))
                .arg(format!(
                    "--outfile={}",
                    path_arg(&self.layout.augustus_gff(unit))
                ))
                .args(["--gff3=on", "--UTR=off", "--uniqueGeneId=true"])
                .args(["--noInFrameStop=true", "--codingseq=on", "--protein=on"])
                .arg(path_arg(input)),
        )
    }

    fn prepare(&self, unit: &Unit) -> std::io::Result<()> {
        std::fs::create_dir_all(self.layout.augustus_dir(unit))
    }
}

/// Derive protein and coding-sequence FASTA files from the predictions.
/// Gated on both derived artifacts so the extraction still runs when the
/// prediction stage itself was skip-cached.
pub struct ExtractStage {
    layout: Arc<AnnotateLayout>,
}

impl Stage for ExtractStage {
    fn id(&self) -> &'static str {
        "extract"
    }

    fn output_artifacts(&self, unit: &Unit) -> Vec<PathBuf> {
        vec![self.layout.proteins_file(unit), self.layout.cds_file(unit)]
    }

    fn requires(&self, unit: &Unit) -> Vec<Requirement> {
        vec![Requirement::essential(self.layout.augustus_gff(unit))]
    }

    fn plan(&self, unit: &Unit, _budget: &ResourceBudget) -> StagePlan {
        StagePlan::Extract(ExtractPlan {
            input: self.layout.augustus_gff(unit),
            proteins_out: self.layout.proteins_file(unit),
            coding_out: self.layout.cds_file(unit),
        })
    }

    fn prepare(&self, _unit: &Unit) -> std::io::Result<()> {
        std::fs::create_dir_all(self.layout.results_dir.join("proteins"))?;
        std::fs::create_dir_all(self.layout.results_dir.join("cds"))?;
        Ok(())
    }
}

/// Homology search of the extracted proteins via DIAMOND.
pub struct HomologyStage {
    layout: Arc<AnnotateLayout>,
    database: Option<PathBuf>,
}

impl Stage for HomologyStage {
    fn id(&self) -> &'static str {
        "homology"
    }

    fn output_artifacts(&self, unit: &Unit) -> Vec<PathBuf> {
        vec![self.layout.diamond_tsv(unit)]
    }

    fn requires(&self, unit: &Unit) -> Vec<Requirement> {
        // Functional annotation can still be attempted without homology
        // hits, so a missing protein set does not halt the unit.
        vec![Requirement::optional(self.layout.proteins_file(unit))]
    }

    fn plan(&self, unit: &Unit, budget: &ResourceBudget) -> StagePlan {
        let Some(database) = &self.database else {
            return StagePlan::MissingConfig {
                reason: "no diamond database configured".to_string(),
                fatal: false,
            };
        };

        StagePlan::Command(
            CommandSpec::new("diamond")
                .arg("blastp")
                .args(["-d", &path_arg(database)])
                .args(["-q", &path_arg(&self.layout.proteins_file(unit))])
                .args(["-o", &path_arg(&self.layout.diamond_tsv(unit))])
                .args(["-p", &budget.cores_per_worker.to_string()])
                .args(["-k", "1"])
                .args(["-e", "1e-5"])
                .args(["--outfmt", "6"])
                .args(["qseqid", "sseqid", "pident", "length", "evalue", "bitscore", "stitle"]),
        )
    }

    fn prepare(&self, unit: &Unit) -> std::io::Result<()> {
        std::fs::create_dir_all(self.layout.diamond_dir(unit))
    }
}

/// Functional annotation via eggNOG-mapper.
pub struct FunctionStage {
    layout: Arc<AnnotateLayout>,
    data_dir: Option<PathBuf>,
}

impl Stage for FunctionStage {
    fn id(&self) -> &'static str {
        "function"
    }

    fn output_artifacts(&self, unit: &Unit) -> Vec<PathBuf> {
        vec![self.layout.eggnog_annotations(unit)]
    }

    fn requires(&self, unit: &Unit) -> Vec<Requirement> {
        vec![Requirement::optional(self.layout.proteins_file(unit))]
    }

    fn plan(&self, unit: &Unit, budget: &ResourceBudget) -> StagePlan {
        let Some(data_dir) = &self.data_dir else {
            return StagePlan::MissingConfig {
                reason: "no eggnog data directory configured".to_string(),
                fatal: false,
            };
        };

        StagePlan::Command(
            CommandSpec::new("emapper.py")
                .args(["-i", &path_arg(&self.layout.proteins_file(unit))])
                .args(["-o", &unit.name])
                .args(["--output_dir", &path_arg(&self.layout.eggnog_dir(unit))])
                .args(["--data_dir", &path_arg(data_dir)])
                .args(["--cpu", &budget.cores_per_worker.to_string()])
                .args(["-m", "diamond"])
                .arg("--force"),
        )
    }

    fn prepare(&self, unit: &Unit) -> std::io::Result<()> {
        std::fs::create_dir_all(self.layout.eggnog_dir(unit))
    }
}

fn missing_input() -> StagePlan {
    StagePlan::MissingConfig {
        reason: "unit has no input assembly".to_string(),
        fatal: true,
    }
}

/// Assemble the full annotation stage sequence.
pub fn annotate_pipeline(
    layout: Arc<AnnotateLayout>,
    models: Arc<ModelMap>,
    diamond_db: Option<PathBuf>,
    eggnog_data_dir: Option<PathBuf>,
) -> PipelineSpec {
    PipelineSpec {
        name: "annotate",
        requires_input: true,
        stages: vec![
            Arc::new(AssemblyQcStage {
                layout: Arc::clone(&layout),
            }),
            Arc::new(CompletenessStage {
                layout: Arc::clone(&layout),
                models: Arc::clone(&models),
            }),
            Arc::new(AnnotateStage {
                layout: Arc::clone(&layout),
                models,
            }),
            Arc::new(ExtractStage {
                layout: Arc::clone(&layout),
            }),
            Arc::new(HomologyStage {
                layout: Arc::clone(&layout),
                database: diamond_db,
            }),
            Arc::new(FunctionStage {
                layout,
                data_dir: eggnog_data_dir,
            }),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Arc<AnnotateLayout> {
        Arc::new(AnnotateLayout::new("/data", "/results"))
    }

    fn unit() -> Unit {
        Unit::new("chlorella").with_input("/data/chlorella/assembly.fna")
    }

    fn budget() -> ResourceBudget {
        ResourceBudget::compute(4, 16)
    }

    fn models(lineage: Option<&str>, model: Option<&str>) -> Arc<ModelMap> {
        let mut map = ModelMap::new();
        map.insert(
            "chlorella".to_string(),
            ModelAssignment {
                busco_lineage: lineage.map(String::from),
                augustus_model: model.map(String::from),
            },
        );
        Arc::new(map)
    }

    #[test]
    fn test_assembly_qc_command_line() {
        let stage = AssemblyQcStage { layout: layout() };
        let StagePlan::Command(spec) = stage.plan(&unit(), &budget()) else {
            panic!("expected a command plan");
        };
        assert_eq!(
            spec.display_line(),
            "quast.py --output-dir /results/quast/chlorella --threads 4 \
             /data/chlorella/assembly.fna"
        );
        assert_eq!(
            stage.output_artifacts(&unit()),
            vec![PathBuf::from("/results/quast/chlorella/report.txt")]
        );
    }

    #[test]
    fn test_completeness_without_lineage_is_nonfatal() {
        let stage = CompletenessStage {
            layout: layout(),
            models: models(None, Some("chlamydomonas")),
        };
        let plan = stage.plan(&unit(), &budget());
        assert!(matches!(plan, StagePlan::MissingConfig { fatal: false, .. }));
    }

    #[test]
    fn test_completeness_command_uses_generic_model_fallback() {
        let stage = CompletenessStage {
            layout: layout(),
            models: models(Some("chlorophyta_odb10"), None),
        };
        let StagePlan::Command(spec) = stage.plan(&unit(), &budget()) else {
            panic!("expected a command plan");
        };
        let line = spec.display_line();
        assert!(line.contains("-l chlorophyta_odb10"));
        assert!(line.contains("--augustus_species generic"));
        assert!(line.contains("--force"));
    }

    #[test]
    fn test_annotate_without_model_is_fatal() {
        let stage = AnnotateStage {
            layout: layout(),
            models: models(Some("chlorophyta_odb10"), None),
        };
        let plan = stage.plan(&unit(), &budget());
        assert!(matches!(plan, StagePlan::MissingConfig { fatal: true, .. }));
    }

    #[test]
    fn test_annotate_command_line() {
        let stage = AnnotateStage {
            layout: layout(),
            models: models(None, Some("chlamydomonas")),
        };
        let StagePlan::Command(spec) = stage.plan(&unit(), &budget()) else {
            panic!("expected a command plan");
        };
        let line = spec.display_line();
        assert!(line.starts_with("augustus --species=chlamydomonas"));
        assert!(line.contains("--outfile=/results/augustus/chlorella/assembly.gff"));
        assert!(line.contains("--codingseq=on"));
        assert!(line.ends_with("/data/chlorella/assembly.fna"));
    }

    #[test]
    fn test_extract_plan_paths() {
        let stage = ExtractStage { layout: layout() };
        let StagePlan::Extract(plan) = stage.plan(&unit(), &budget()) else {
            panic!("expected an extract plan");
        };
        assert_eq!(
            plan.input,
            PathBuf::from("/results/augustus/chlorella/assembly.gff")
        );
        assert_eq!(
            plan.proteins_out,
            PathBuf::from("/results/proteins/chlorella_proteins.faa")
        );
        assert_eq!(
            plan.coding_out,
            PathBuf::from("/results/cds/chlorella_cds.fna")
        );
        // The prediction output is essential: nothing downstream works
        // without it.
        assert!(stage.requires(&unit())[0].essential);
    }

    #[test]
    fn test_homology_without_database_is_nonfatal() {
        let stage = HomologyStage {
            layout: layout(),
            database: None,
        };
        let plan = stage.plan(&unit(), &budget());
        assert!(matches!(plan, StagePlan::MissingConfig { fatal: false, .. }));
        assert!(!stage.requires(&unit())[0].essential);
    }

    #[test]
    fn test_homology_command_line() {
        let stage = HomologyStage {
            layout: layout(),
            database: Some(PathBuf::from("/db/uniprot.dmnd")),
        };
        let StagePlan::Command(spec) = stage.plan(&unit(), &budget()) else {
            panic!("expected a command plan");
        };
        let line = spec.display_line();
        assert!(line.starts_with("diamond blastp -d /db/uniprot.dmnd"));
        assert!(line.contains("-k 1 -e 1e-5 --outfmt 6 qseqid"));
    }

    #[test]
    fn test_pipeline_stage_order() {
        let spec = annotate_pipeline(layout(), models(None, None), None, None);
        assert_eq!(
            spec.stage_ids(),
            vec![
                "assembly_qc",
                "completeness",
                "annotate",
                "extract",
                "homology",
                "function"
            ]
        );
        assert!(spec.requires_input);
    }
}

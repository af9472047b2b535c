use crate::stage::Stage;
use crate::unit::Unit;
use std::path::Path;

/// True when the artifact at `path` counts as produced: a non-empty file,
/// or a directory with at least one entry (tools that own a whole result
/// directory).
pub fn artifact_present(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len() > 0,
        Ok(meta) if meta.is_dir() => std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false),
        _ => false,
    }
}

/// The idempotency gate: false when every declared output artifact already
/// exists, so a rerun after a partial failure never repeats completed
/// work. Evaluated fresh on every call since artifacts may appear
/// out-of-band between runs.
pub fn should_run(stage: &dyn Stage, unit: &Unit) -> bool {
    let artifacts = stage.output_artifacts(unit);
    if artifacts.is_empty() {
        return true;
    }
    !artifacts.iter().all(|path| artifact_present(path))
}

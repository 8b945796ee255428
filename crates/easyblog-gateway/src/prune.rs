//! `easyblog prune-backups`: keep the newest database dumps, delete the rest.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::info;

#[derive(Debug, Default)]
pub struct PruneReport {
    /// Newest first.
    pub kept: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

/// Keep the `keep` most recently modified regular files in `dir` whose name
/// contains `pattern`; delete the others unless `dry_run`. Files that do not
/// match are never touched.
pub fn prune_backups(
    dir: &Path,
    pattern: &str,
    keep: usize,
    dry_run: bool,
) -> std::io::Result<PruneReport> {
    let mut backups: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if !entry.file_name().to_string_lossy().contains(pattern) {
            continue;
        }
        backups.push((entry.metadata()?.modified()?, entry.path()));
    }
    // Newest first; the name breaks ties so equal mtimes sort deterministically.
    backups.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    let mut report = PruneReport::default();
    for (i, (_, path)) in backups.into_iter().enumerate() {
        if i < keep {
            report.kept.push(path);
            continue;
        }
        if !dry_run {
            std::fs::remove_file(&path)?;
            info!(path = %path.display(), "old backup removed");
        }
        report.removed.push(path);
    }
    Ok(report)
}

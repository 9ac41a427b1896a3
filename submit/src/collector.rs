use crate::config::ConfigErrors;
use globset::GlobBuilder;
use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use std::{fs, path::PathBuf};
use tracing::{debug, warn};

const SCRIPT_GLOB: &str = "*.sh";
// marker that distinguishes batch scripts from other shell scripts
const BATCH_MARKER: &str = "SBATCH";

/// Collect shell scripts carrying `SBATCH` directives directly inside `roots` (not recursive).
pub fn find_batch_scripts(roots: &[PathBuf]) -> Result<Vec<PathBuf>, ConfigErrors> {
    let glob = GlobBuilder::new(SCRIPT_GLOB)
        .literal_separator(true)
        .build()?
        .compile_matcher();

    let Some((first, others)) = roots.split_first() else {
        return Ok(Vec::new());
    };

    let mut builder = WalkBuilder::new(first);
    // add other paths
    others.iter().for_each(|path| {
        builder.add(path);
    });
    builder.standard_filters(false).hidden(true).max_depth(Some(1));

    Ok(builder
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Failed to search for batch scripts: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().map_or(false, |kind| kind.is_file()))
        .map(DirEntry::into_path)
        .filter(|path| path.file_name().map_or(false, |name| glob.is_match(name)))
        .filter(|path| {
            debug!(path = ?path, "Checking batch script candidate");

            match fs::read_to_string(path) {
                Ok(content) => content.contains(BATCH_MARKER),
                Err(error) => {
                    debug!(path = ?path, error = ?error, "Skipping unreadable candidate");
                    false
                }
            }
        })
        .sorted()
        .dedup()
        .collect_vec())
}

/// the single batch script found in `roots`
pub fn discover_batch_script(roots: &[PathBuf]) -> Result<PathBuf, ConfigErrors> {
    let mut candidates = find_batch_scripts(roots)?;

    match candidates.len() {
        0 => Err(ConfigErrors::NoBatchScript),
        1 => Ok(candidates.remove(0)),
        _ => Err(ConfigErrors::AmbiguousBatchScript(candidates)),
    }
}

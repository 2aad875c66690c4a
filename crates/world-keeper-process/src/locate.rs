use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use world_keeper_core::{Error, Result};

/// Returns the first candidate that exists as a regular file.
pub fn locate(candidates: &[PathBuf]) -> Result<PathBuf> {
    for candidate in candidates {
        if is_regular_file(candidate) {
            debug!(executable = %candidate.display(), "located server executable");
            return Ok(candidate.clone());
        }
        debug!(candidate = %candidate.display(), "no server executable here");
    }
    Err(Error::ExecutableNotFound {
        attempted: candidates.to_vec(),
    })
}

/// Logs the contents of each attempted path's directory.
pub fn diagnose(attempted: &[PathBuf]) {
    let mut seen = BTreeSet::new();
    for path in attempted {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !seen.insert(dir.clone()) {
            continue;
        }
        match fs::read_dir(&dir) {
            Ok(entries) => {
                let mut names: Vec<String> = entries
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect();
                names.sort();
                warn!(dir = %dir.display(), entries = %names.join(", "), "candidate directory listing");
            }
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "candidate directory unreadable");
            }
        }
    }
}

fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

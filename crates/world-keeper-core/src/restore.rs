//! Replaces a live directory tree with the contents of an archive.
//!
//! The archive is extracted into a staging directory next to the target,
//! then swapped in with renames. A failed restore leaves the target as it
//! was; a successful one leaves exactly the archive's entries.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    pub files: usize,
    pub bytes: u64,
}

pub fn restore(payload: &[u8], target_dir: &Path) -> Result<RestoreReport> {
    let mut archive =
        ZipArchive::new(Cursor::new(payload)).map_err(|e| Error::read("open archive", e))?;
    let report = summarize(&mut archive)?;

    let name = target_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            Error::WriteFailed(format!("invalid restore target: {}", target_dir.display()))
        })?;
    let parent = parent_of(target_dir);
    fs::create_dir_all(&parent)
        .map_err(|e| Error::write(format_args!("create {}", parent.display()), e))?;

    let staging = sibling_tempdir(&parent, &name, "restore")?;
    let staged = staging.path().join(&name);
    fs::create_dir_all(&staged)
        .map_err(|e| Error::write(format_args!("create {}", staged.display()), e))?;
    archive.extract(&staged).map_err(extract_error)?;

    swap_into_place(&staged, target_dir, &parent, &name)?;
    info!(
        target = %target_dir.display(),
        files = report.files,
        bytes = report.bytes,
        "restored world tree"
    );
    Ok(report)
}

fn summarize(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<RestoreReport> {
    let mut report = RestoreReport { files: 0, bytes: 0 };
    for index in 0..archive.len() {
        let file = archive
            .by_index(index)
            .map_err(|e| Error::read(format_args!("archive entry {index}"), e))?;
        if file.is_dir() {
            continue;
        }
        report.files += 1;
        report.bytes += file.size();
    }
    Ok(report)
}

fn swap_into_place(staged: &Path, target: &Path, parent: &Path, name: &str) -> Result<()> {
    let retired = sibling_tempdir(parent, name, "retired")?;
    let previous = retired.path().join(name);

    let had_previous = fs::symlink_metadata(target).is_ok();
    if had_previous {
        fs::rename(target, &previous)
            .map_err(|e| Error::write(format_args!("move aside {}", target.display()), e))?;
    }

    if let Err(err) = fs::rename(staged, target) {
        if had_previous {
            if let Err(back) = fs::rename(&previous, target) {
                // Leave the old tree on disk for manual recovery.
                let kept = retired.keep().join(name);
                warn!(
                    world = %target.display(),
                    kept_at = %kept.display(),
                    error = %back,
                    "failed to put previous world tree back"
                );
            }
        }
        return Err(Error::write(
            format_args!("move restored tree into {}", target.display()),
            err,
        ));
    }

    if let Err(err) = retired.close() {
        warn!(error = %err, "failed to remove previous world tree");
    }
    Ok(())
}

fn sibling_tempdir(parent: &Path, name: &str, purpose: &str) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(&format!(".{name}.{purpose}-"))
        .tempdir_in(parent)
        .map_err(|e| Error::write(format_args!("create staging in {}", parent.display()), e))
}

fn parent_of(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn extract_error(err: ZipError) -> Error {
    match err {
        ZipError::Io(e) => Error::write("extract archive", e),
        other => Error::read("extract archive", other),
    }
}

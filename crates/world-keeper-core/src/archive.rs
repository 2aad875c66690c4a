//! Zip snapshots of a world directory.
//!
//! Entry names are relative to the source directory and always use `/`
//! separators, so an archive of `worlds/` holds `MyWorld/level.dat` and
//! extracts back into any target directory unchanged.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Cursor, Seek, Write};
use std::path::{Path, PathBuf};

use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

pub const ARCHIVE_PREFIX: &str = "world_backup_";
pub const ARCHIVE_EXT: &str = "zip";

#[derive(Debug, Clone)]
pub struct BuiltArchive {
    pub path: PathBuf,
    pub filename: String,
    pub created_at: OffsetDateTime,
    pub size_bytes: u64,
    pub files: usize,
}

impl BuiltArchive {
    pub fn read_payload(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).map_err(|e| Error::read(self.path.display(), e))
    }

    pub fn remove(&self) -> Result<()> {
        fs::remove_file(&self.path).map_err(|e| Error::write(self.path.display(), e))
    }
}

/// Archives every regular file under `source_dir` into a new file in
/// `output_dir`.
pub fn build(source_dir: &Path, output_dir: &Path) -> Result<BuiltArchive> {
    build_at(source_dir, output_dir, OffsetDateTime::now_utc())
}

pub fn build_at(
    source_dir: &Path,
    output_dir: &Path,
    created_at: OffsetDateTime,
) -> Result<BuiltArchive> {
    if !source_dir.is_dir() {
        return Err(Error::NotFound(format!(
            "source directory {}",
            source_dir.display()
        )));
    }
    fs::create_dir_all(output_dir)
        .map_err(|e| Error::write(format_args!("create {}", output_dir.display()), e))?;

    let created_at = created_at.to_offset(UtcOffset::UTC);
    let (file, filename) = create_unique(output_dir, created_at)?;
    let path = output_dir.join(&filename);

    let files = match write_tree(source_dir, BufWriter::new(file)) {
        Ok(files) => files,
        Err(err) => {
            let _ = fs::remove_file(&path);
            return Err(err);
        }
    };

    let size_bytes = fs::metadata(&path)
        .map_err(|e| Error::read(path.display(), e))?
        .len();
    info!(archive = %path.display(), files, size_bytes, "built world archive");

    Ok(BuiltArchive {
        path,
        filename,
        created_at,
        size_bytes,
        files,
    })
}

/// `YYYYMMDD_HHMMSS`, which sorts in creation order.
pub fn timestamp_label(created_at: OffsetDateTime) -> Result<String> {
    created_at
        .to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .map_err(|e| Error::write("format archive timestamp", e))
}

/// Lists `(name, uncompressed size)` for every file entry of an archive.
pub fn entries(payload: &[u8]) -> Result<Vec<(String, u64)>> {
    let mut archive =
        ZipArchive::new(Cursor::new(payload)).map_err(|e| Error::read("open archive", e))?;
    let mut out = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive
            .by_index(index)
            .map_err(|e| Error::read(format_args!("archive entry {index}"), e))?;
        if file.is_dir() {
            continue;
        }
        out.push((file.name().to_string(), file.size()));
    }
    Ok(out)
}

// Same-second builds get a zero-padded `_NNN` suffix instead of overwriting.
fn create_unique(output_dir: &Path, created_at: OffsetDateTime) -> Result<(File, String)> {
    let stamp = timestamp_label(created_at)?;
    let mut attempt = 0u32;
    loop {
        let filename = if attempt == 0 {
            format!("{ARCHIVE_PREFIX}{stamp}.{ARCHIVE_EXT}")
        } else {
            format!("{ARCHIVE_PREFIX}{stamp}_{attempt:03}.{ARCHIVE_EXT}")
        };
        let path = output_dir.join(&filename);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, filename)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(archive = %path.display(), "archive name taken");
                attempt += 1;
            }
            Err(e) => return Err(Error::write(path.display(), e)),
        }
    }
}

fn write_tree<W: Write + Seek>(source_dir: &Path, writer: W) -> Result<usize> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut files = 0;
    for entry in WalkDir::new(source_dir)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry =
            entry.map_err(|e| Error::read(format_args!("walk {}", source_dir.display()), e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry_name(source_dir, entry.path())?;
        zip.start_file(name.clone(), options)
            .map_err(|e| Error::write(format_args!("archive entry {name}"), e))?;
        let mut input =
            File::open(entry.path()).map_err(|e| Error::read(entry.path().display(), e))?;
        io::copy(&mut input, &mut zip)
            .map_err(|e| Error::write(format_args!("archive entry {name}"), e))?;
        files += 1;
    }

    let mut inner = zip.finish().map_err(|e| Error::write("finish archive", e))?;
    inner.flush().map_err(|e| Error::write("flush archive", e))?;
    Ok(files)
}

fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        Error::ReadFailed(format!(
            "{} is outside {}",
            path.display(),
            root.display()
        ))
    })?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use time::macros::datetime;

    fn world_tree(root: &Path) -> PathBuf {
        let worlds = root.join("worlds");
        fs::create_dir_all(worlds.join("MyWorld/db")).unwrap();
        fs::write(worlds.join("MyWorld/level.dat"), [7u8; 10]).unwrap();
        fs::write(worlds.join("MyWorld/db/000001.ldb"), [1u8; 100]).unwrap();
        worlds
    }

    #[test]
    fn archive_holds_world_relative_entries() {
        let tmp = tempdir().unwrap();
        let worlds = world_tree(tmp.path());
        let out = tmp.path().join("out");

        let built = build_at(&worlds, &out, datetime!(2024-05-01 12:30:45 UTC)).unwrap();
        assert_eq!(built.filename, "world_backup_20240501_123045.zip");
        assert_eq!(built.files, 2);
        assert!(built.path.exists());

        let payload = built.read_payload().unwrap();
        assert_eq!(payload.len() as u64, built.size_bytes);
        let mut listed = entries(&payload).unwrap();
        listed.sort();
        assert_eq!(
            listed,
            vec![
                ("MyWorld/db/000001.ldb".to_string(), 100),
                ("MyWorld/level.dat".to_string(), 10),
            ]
        );
    }

    #[test]
    fn same_second_builds_do_not_collide() {
        let tmp = tempdir().unwrap();
        let worlds = world_tree(tmp.path());
        let out = tmp.path().join("out");
        let at = datetime!(2024-05-01 12:30:45 UTC);

        let first = build_at(&worlds, &out, at).unwrap();
        let second = build_at(&worlds, &out, at).unwrap();
        assert_ne!(first.filename, second.filename);
        assert_eq!(second.filename, "world_backup_20240501_123045_001.zip");
        assert!(first.path.exists() && second.path.exists());
    }

    #[test]
    fn same_second_names_sort_in_build_order() {
        let tmp = tempdir().unwrap();
        let worlds = world_tree(tmp.path());
        let out = tmp.path().join("out");
        let at = datetime!(2024-05-01 12:30:45 UTC);

        let names: Vec<String> = (0..12)
            .map(|_| build_at(&worlds, &out, at).unwrap().filename)
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(names[11], "world_backup_20240501_123045_011.zip");
    }

    #[test]
    fn timestamp_is_rendered_in_utc() {
        let label = timestamp_label(datetime!(2024-01-02 01:00:00 +02:00)).unwrap();
        assert_eq!(label, "20240101_230000");
    }

    #[test]
    fn missing_source_is_not_found() {
        let tmp = tempdir().unwrap();
        let err = build(&tmp.path().join("absent"), &tmp.path().join("out")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn garbage_payload_is_a_read_failure() {
        let err = entries(b"definitely not a zip").unwrap_err();
        assert!(matches!(err, Error::ReadFailed(_)));
    }
}

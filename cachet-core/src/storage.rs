//! On-disk encoding: base64 line framing and sealed-record file I/O.
//!
//! The snapshot file is a newline-separated sequence of base64 lines, one
//! per record, in index order. A fragment file holds exactly one base64
//! line and is named after the nanosecond wall clock, so lexicographic
//! filename order equals mutation order.

use crate::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default snapshot filename
pub const SNAPSHOT_FILENAME: &str = "cachet.db";

/// Fragment file suffix
pub const FRAGMENT_EXT: &str = ".db.frag";

/// Backup tarball suffix
pub const TARBALL_EXT: &str = ".tar.gz";

/// Nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

/// Seconds since the Unix epoch.
pub fn now_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// A filename made of the current nanosecond timestamp plus a suffix.
pub fn timestamp_filename(ext: &str) -> String {
    format!("{}{}", now_nanos(), ext)
}

/// Read all lines of a sealed-record file, skipping a trailing empty line.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).map_err(|source| Error::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(contents
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Write base64 lines to `path`, one record per line, and fsync.
pub fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut buf = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        buf.push_str(line);
        buf.push('\n');
    }

    let write = || -> std::io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(buf.as_bytes())?;
        file.sync_all()
    };
    write().map_err(|source| Error::WriteFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a single sealed record as a new fragment file and fsync it.
///
/// Fragment names carry the nanosecond timestamp; if another fragment was
/// written within the same nanosecond the name is retried rather than
/// overwritten.
pub fn write_fragment(dir: &Path, box64: &str) -> Result<PathBuf> {
    loop {
        let path = dir.join(timestamp_filename(FRAGMENT_EXT));
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(Error::WriteFailed { path, source }),
        };

        let write = |file: &mut File| -> std::io::Result<()> {
            file.write_all(box64.as_bytes())?;
            file.sync_all()
        };
        write(&mut file).map_err(|source| Error::WriteFailed {
            path: path.clone(),
            source,
        })?;
        return Ok(path);
    }
}

/// All fragment files in `dir`, sorted by filename.
pub fn fragment_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    paths_by_ext(dir, FRAGMENT_EXT)
}

/// All backup tarballs in `dir`, sorted by filename.
pub fn tarball_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    paths_by_ext(dir, TARBALL_EXT)
}

fn paths_by_ext(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| Error::ReadFailed {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| Error::ReadFailed {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        let is_match = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(ext));
        if is_match {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Remove every file in `paths`.
pub fn delete_files(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        fs::remove_file(path).map_err(|source| Error::WriteFailed {
            path: path.clone(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_lines_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SNAPSHOT_FILENAME);
        let lines = vec!["YWJj".to_string(), "ZGVm".to_string()];

        write_lines(&path, &lines).unwrap();
        assert_eq!(read_lines(&path).unwrap(), lines);
    }

    #[test]
    fn test_read_lines_skips_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("one.db");
        fs::write(&path, "YWJj").unwrap();
        assert_eq!(read_lines(&path).unwrap(), vec!["YWJj".to_string()]);
    }

    #[test]
    fn test_fragment_names_sort_in_write_order() {
        let dir = TempDir::new().unwrap();
        let mut written = Vec::new();
        for i in 0..5 {
            written.push(write_fragment(dir.path(), &format!("frag{}", i)).unwrap());
        }

        let found = fragment_paths(dir.path()).unwrap();
        assert_eq!(found, written);
        assert_eq!(fs::read_to_string(&found[3]).unwrap(), "frag3");
    }

    #[test]
    fn test_paths_by_ext_filters() {
        let dir = TempDir::new().unwrap();
        write_fragment(dir.path(), "x").unwrap();
        fs::write(dir.path().join("123.tar.gz"), b"t").unwrap();
        fs::write(dir.path().join("unrelated.txt"), b"u").unwrap();

        assert_eq!(fragment_paths(dir.path()).unwrap().len(), 1);
        assert_eq!(tarball_paths(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_files() {
        let dir = TempDir::new().unwrap();
        let a = write_fragment(dir.path(), "a").unwrap();
        let b = write_fragment(dir.path(), "b").unwrap();

        delete_files(&[a, b]).unwrap();
        assert!(fragment_paths(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_now_nanos_is_monotonic_enough() {
        let a = now_nanos();
        let b = now_nanos();
        assert!(b >= a);
        assert!(a > 1_500_000_000_000_000_000); // after mid-2017
    }
}

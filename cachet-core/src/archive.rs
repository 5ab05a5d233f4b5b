//! Tarball packing for pre-rebuild backups.
//!
//! The engine archives the snapshot file and the fragments it is about to
//! consume into a gzip-compressed tar before any destructive operation.
//! Entries are stored under their basenames only.

use crate::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

/// Create a gzip-compressed tar at `output` containing the given files.
pub fn pack<P: AsRef<Path>>(output: &Path, files: &[P]) -> Result<()> {
    let file = File::create(output).map_err(|source| Error::WriteFailed {
        path: output.to_path_buf(),
        source,
    })?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for path in files {
        let path = path.as_ref();
        let name = path
            .file_name()
            .ok_or_else(|| Error::InvalidInput(format!("not a file path: {}", path.display())))?;
        let data = fs::read(path).map_err(|source| Error::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;

        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o600);
        header.set_mtime(0);
        builder.append_data(&mut header, name, data.as_slice())?;
    }

    let encoder = builder.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()?;
    Ok(())
}

/// Read back every `(name, bytes)` entry of a tarball created by [`pack`].
pub fn read(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let file = File::open(path).map_err(|source| Error::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));

    let mut entries = Vec::new();
    for entry in tar.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        entries.push((name, data));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pack_and_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.db.frag");
        fs::write(&a, b"alpha").unwrap();
        fs::write(&b, b"beta").unwrap();

        let tarball = dir.path().join("backup.tar.gz");
        pack(&tarball, &[&a, &b]).unwrap();

        let entries = read(&tarball).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ("a.txt".to_string(), b"alpha".to_vec()));
        assert_eq!(entries[1], ("b.db.frag".to_string(), b"beta".to_vec()));
    }

    #[test]
    fn test_pack_uses_basenames() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("deep").join("nested");
        fs::create_dir_all(&nested).unwrap();
        let file = nested.join("snapshot.db");
        fs::write(&file, b"data").unwrap();

        let tarball = dir.path().join("backup.tar.gz");
        pack(&tarball, &[&file]).unwrap();

        let entries = read(&tarball).unwrap();
        assert_eq!(entries[0].0, "snapshot.db");
    }

    #[test]
    fn test_pack_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let tarball = dir.path().join("backup.tar.gz");
        let missing = dir.path().join("missing.db");
        assert!(pack(&tarball, &[&missing]).is_err());
    }
}

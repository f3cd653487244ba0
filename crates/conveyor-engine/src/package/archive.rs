//! Zip container handling for function archives.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use conveyor_types::function::{FunctionManifest, MANIFEST_FILE};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use super::validate::{check_executor_path, normalize_relative};
use super::PackageError;

/// Write `entries` into a zip with stable ordering, timestamps and modes.
pub(crate) fn write_zip(entries: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, PackageError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, payload) in entries {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(payload)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Names of every file entry in an archive, in archive order.
///
/// # Errors
///
/// Returns [`PackageError::Zip`] if `bytes` is not a zip archive.
pub fn list_entries(bytes: &[u8]) -> Result<Vec<String>, PackageError> {
    let archive = ZipArchive::new(Cursor::new(bytes))?;
    Ok(archive.file_names().map(str::to_string).collect())
}

/// Read and parse `function.json` without extracting anything.
///
/// # Errors
///
/// Returns [`PackageError::MissingEntry`] if the archive has no manifest.
pub fn read_manifest(bytes: &[u8]) -> Result<FunctionManifest, PackageError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut file = match archive.by_name(MANIFEST_FILE) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(PackageError::MissingEntry(MANIFEST_FILE.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Extract an archive into `dest` and return its manifest.
///
/// Every entry name is validated with the same rules the packager
/// applies, so a tampered archive cannot write outside `dest`.
///
/// # Errors
///
/// Returns [`PackageError::DependencyPathInvalid`] for an escaping entry,
/// [`PackageError::ReservedFileName`] for an entry the executor writes
/// itself, [`PackageError::MissingEntry`] without a manifest, or an I/O
/// error.
pub fn unpack_archive(bytes: &[u8], dest: &Path) -> Result<FunctionManifest, PackageError> {
    let manifest = read_manifest(bytes)?;
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let relative = normalize_relative(file.name().trim_end_matches('/'))?;
        check_executor_path(&relative)?;
        let target = dest.join(&relative);
        if file.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        io::copy(&mut file, &mut out)?;
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn zip_output_is_deterministic() {
        let files = entries(&[("b.txt", "bee"), ("a/c.txt", "sea")]);
        let first = write_zip(&files).unwrap();
        let second = write_zip(&files).unwrap();
        assert_eq!(first, second);
        assert_eq!(list_entries(&first).unwrap(), vec!["a/c.txt", "b.txt"]);
    }

    #[test]
    fn manifest_is_required() {
        let bytes = write_zip(&entries(&[("model.py", "pass")])).unwrap();
        assert!(matches!(
            read_manifest(&bytes),
            Err(PackageError::MissingEntry(_))
        ));
    }

    #[test]
    fn unpack_rejects_escaping_entry() {
        let manifest = r#"{"name":"f","entry_point":{"file":"m.py","method":"run"},"command":["sh"]}"#;
        let bytes = write_zip(&entries(&[
            ("function.json", manifest),
            ("../evil.sh", "rm -rf /"),
        ]))
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = unpack_archive(&bytes, &dir.path().join("fn")).unwrap_err();
        assert!(matches!(err, PackageError::DependencyPathInvalid { .. }));
        assert!(!dir.path().join("evil.sh").exists());
    }

    #[test]
    fn unpack_rejects_bundled_output() {
        let manifest = r#"{"name":"f","entry_point":{"file":"m.py","method":"run"},"command":["sh"]}"#;
        let bytes = write_zip(&entries(&[
            ("function.json", manifest),
            ("output.json", r#"{"type":"float","value":42.0}"#),
        ]))
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = unpack_archive(&bytes, dir.path()).unwrap_err();
        assert!(matches!(err, PackageError::ReservedFileName { .. }), "{err}");
        assert!(!dir.path().join("output.json").exists());
    }

    #[test]
    fn not_a_zip_is_rejected() {
        assert!(matches!(list_entries(b"plain text"), Err(PackageError::Zip(_))));
    }
}

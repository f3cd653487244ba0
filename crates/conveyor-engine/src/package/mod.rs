//! Function packaging.
//!
//! [`package_function`] turns a function's source directory into an
//! immutable zip archive: the entry module at the archive root,
//! `function.json`, `requirements.txt`, `runtime_version.txt` and every
//! declared dependency under its relative path. Paths are validated
//! lexically before any file is read, and the archive is assembled in
//! memory, so a failed packaging run leaves nothing behind.

mod archive;
mod validate;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use conveyor_types::function::{
    EntryPoint, FunctionManifest, MANIFEST_FILE, REQUIREMENTS_FILE, RUNTIME_VERSION_FILE,
};
use sha2::{Digest, Sha256};

pub use archive::{list_entries, read_manifest, unpack_archive};

pub(crate) use validate::normalize_relative;

#[cfg(test)]
pub(crate) use archive::write_zip;

/// Packaging or unpacking failure.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("invalid dependency path '{path}': {reason}")]
    DependencyPathInvalid { path: String, reason: String },

    #[error("dependency '{path}' uses reserved file name '{name}'")]
    ReservedFileName { path: String, name: String },

    #[error("invalid function definition: {0}")]
    InvalidFunction(String),

    #[error("cannot read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive is missing {0}")]
    MissingEntry(String),

    #[error("archive i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("function manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Everything needed to package one function.
#[derive(Debug, Clone)]
pub struct FunctionSource {
    pub name: String,
    /// Directory the entry module and dependencies are relative to.
    pub source_dir: PathBuf,
    pub entry_point: EntryPoint,
    pub command: Vec<String>,
    pub runtime_version: String,
    /// Extra files or directories, relative to `source_dir`.
    pub file_dependencies: Vec<String>,
}

/// A built archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedFunction {
    pub bytes: Vec<u8>,
    /// Hex SHA-256 over entry names and payloads.
    pub digest: String,
    /// Archive entry names, sorted.
    pub entries: Vec<String>,
}

/// Build the archive for `source`.
///
/// # Errors
///
/// Returns [`PackageError::DependencyPathInvalid`] or
/// [`PackageError::ReservedFileName`] before touching the filesystem
/// when a declared path is unsafe, and [`PackageError::Read`] when a
/// file cannot be read.
pub fn package_function(source: &FunctionSource) -> Result<PackagedFunction, PackageError> {
    // 1. Definition sanity
    if source.name.trim().is_empty() {
        return Err(PackageError::InvalidFunction("name must not be empty".into()));
    }
    if source.command.is_empty() || source.command[0].trim().is_empty() {
        return Err(PackageError::InvalidFunction("command must not be empty".into()));
    }
    if source.entry_point.method.trim().is_empty() {
        return Err(PackageError::InvalidFunction(
            "entry point method must not be empty".into(),
        ));
    }

    // 2. Lexical path checks, all before any I/O
    let entry_path = validate::normalize_relative(&source.entry_point.file)?;
    let entry_file = validate::file_name(&entry_path).to_string();
    validate::check_executor_path(&entry_file)?;
    let dependencies = source
        .file_dependencies
        .iter()
        .map(|dep| validate::normalize_relative(dep))
        .collect::<Result<Vec<_>, _>>()?;
    for dep in &dependencies {
        validate::check_reserved(dep, &entry_file)?;
    }

    // 3. Read files, confined to the canonical source root
    let root = fs::canonicalize(&source.source_dir).map_err(|e| PackageError::Read {
        path: source.source_dir.clone(),
        source: e,
    })?;
    let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    entries.insert(entry_file.clone(), read_confined(&root, &entry_path)?);
    for dep in &dependencies {
        collect_dependency(&root, dep, &entry_file, &mut entries)?;
    }

    let requirements = match fs::read(root.join(REQUIREMENTS_FILE)) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            return Err(PackageError::Read {
                path: root.join(REQUIREMENTS_FILE),
                source: e,
            })
        }
    };
    entries.insert(REQUIREMENTS_FILE.to_string(), requirements);
    entries.insert(
        RUNTIME_VERSION_FILE.to_string(),
        format!("{}\n", source.runtime_version.trim()).into_bytes(),
    );

    let manifest = FunctionManifest {
        name: source.name.clone(),
        entry_point: EntryPoint {
            file: entry_file,
            class_name: source.entry_point.class_name.clone(),
            method: source.entry_point.method.clone(),
        },
        command: source.command.clone(),
        file_dependencies: dependencies,
    };
    entries.insert(MANIFEST_FILE.to_string(), serde_json::to_vec_pretty(&manifest)?);

    // 4. Assemble
    let digest = digest_entries(&entries);
    let bytes = archive::write_zip(&entries)?;
    let names: Vec<String> = entries.into_keys().collect();

    tracing::info!(
        function = %source.name,
        entries = names.len(),
        bytes = bytes.len(),
        digest = %digest,
        "Packaged function"
    );
    Ok(PackagedFunction {
        bytes,
        digest,
        entries: names,
    })
}

/// Read `relative` under `root`, refusing symlinks that lead outside it.
fn read_confined(root: &Path, relative: &str) -> Result<Vec<u8>, PackageError> {
    let path = resolve_confined(root, relative)?;
    fs::read(&path).map_err(|e| PackageError::Read { path, source: e })
}

fn resolve_confined(root: &Path, relative: &str) -> Result<PathBuf, PackageError> {
    let joined = root.join(relative);
    let resolved = fs::canonicalize(&joined).map_err(|e| PackageError::Read {
        path: joined.clone(),
        source: e,
    })?;
    if !resolved.starts_with(root) {
        return Err(PackageError::DependencyPathInvalid {
            path: relative.to_string(),
            reason: "path resolves outside the function source directory".into(),
        });
    }
    Ok(resolved)
}

/// Add a file, or every file under a directory, keyed by relative path.
fn collect_dependency(
    root: &Path,
    relative: &str,
    entry_file: &str,
    entries: &mut BTreeMap<String, Vec<u8>>,
) -> Result<(), PackageError> {
    let resolved = resolve_confined(root, relative)?;
    if !resolved.is_dir() {
        let bytes = fs::read(&resolved).map_err(|e| PackageError::Read {
            path: resolved.clone(),
            source: e,
        })?;
        entries.insert(relative.to_string(), bytes);
        return Ok(());
    }

    let mut children = fs::read_dir(&resolved)
        .map_err(|e| PackageError::Read {
            path: resolved.clone(),
            source: e,
        })?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<Vec<_>, _>>()?;
    children.sort();
    for child in children {
        let child_path = format!("{relative}/{child}");
        validate::check_reserved(&child_path, entry_file)?;
        collect_dependency(root, &child_path, entry_file, entries)?;
    }
    Ok(())
}

fn digest_entries(entries: &BTreeMap<String, Vec<u8>>) -> String {
    let mut hasher = Sha256::new();
    for (name, payload) in entries {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update((payload.len() as u64).to_le_bytes());
        hasher.update(payload);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    fn write(dir: &Path, relative: &str, contents: &str) {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn source(dir: &Path, deps: &[&str]) -> FunctionSource {
        FunctionSource {
            name: "churn_model".into(),
            source_dir: dir.to_path_buf(),
            entry_point: EntryPoint {
                file: "model.py".into(),
                class_name: Some("Model".into()),
                method: "predict".into(),
            },
            command: vec!["python3".into(), "-m".into(), "conveyor_runner".into()],
            runtime_version: "3.10".into(),
            file_dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "model.py", "class Model: ...\n");
        write(dir.path(), "requirements.txt", "pandas==2.0\n");
        write(dir.path(), "utils.py", "def helper(): ...\n");
        write(dir.path(), "data/lookup.csv", "a,b\n1,2\n");
        dir
    }

    fn entry_bytes(archive: &[u8], name: &str) -> Vec<u8> {
        let mut zip = zip::ZipArchive::new(io::Cursor::new(archive)).unwrap();
        let mut file = zip.by_name(name).unwrap();
        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn packages_layout() {
        let dir = fixture();
        let packaged = package_function(&source(dir.path(), &["utils.py", "data"])).unwrap();
        assert_eq!(
            packaged.entries,
            vec![
                "data/lookup.csv",
                "function.json",
                "model.py",
                "requirements.txt",
                "runtime_version.txt",
                "utils.py",
            ]
        );
        assert_eq!(entry_bytes(&packaged.bytes, "requirements.txt"), b"pandas==2.0\n");
        assert_eq!(entry_bytes(&packaged.bytes, "runtime_version.txt"), b"3.10\n");

        let manifest = read_manifest(&packaged.bytes).unwrap();
        assert_eq!(manifest.entry_point.file, "model.py");
        assert_eq!(manifest.file_dependencies, vec!["utils.py", "data"]);
    }

    #[test]
    fn packaging_is_idempotent() {
        let dir = fixture();
        let src = source(dir.path(), &["utils.py", "data/lookup.csv"]);
        let first = package_function(&src).unwrap();
        let second = package_function(&src).unwrap();
        assert_eq!(first.entries, second.entries);
        assert_eq!(first.digest, second.digest);
        for name in &first.entries {
            assert_eq!(entry_bytes(&first.bytes, name), entry_bytes(&second.bytes, name));
        }
    }

    #[test]
    fn parent_escape_is_rejected_without_output() {
        let dir = fixture();
        let before: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();

        let err = package_function(&source(dir.path(), &["../outside.py"])).unwrap_err();
        assert!(matches!(err, PackageError::DependencyPathInvalid { .. }));

        let after: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(before.len(), after.len());
    }

    #[test]
    fn entry_module_name_is_reserved() {
        let dir = fixture();
        let err = package_function(&source(dir.path(), &["model.py"])).unwrap_err();
        assert!(matches!(err, PackageError::ReservedFileName { ref name, .. } if name == "model.py"));
    }

    #[test]
    fn manifest_names_are_reserved() {
        let dir = fixture();
        for dep in ["requirements.txt", "nested/runtime_version.txt", "function.json"] {
            let err = package_function(&source(dir.path(), &[dep])).unwrap_err();
            assert!(matches!(err, PackageError::ReservedFileName { .. }), "{dep}");
        }
    }

    #[test]
    fn executor_files_are_reserved() {
        let dir = fixture();
        write(dir.path(), "output.json", r#"{"type":"float","value":42.0}"#);
        write(dir.path(), "inputs/input_0.arrow", "stale");
        for dep in ["output.json", "inputs", "invocation.json"] {
            let err = package_function(&source(dir.path(), &[dep])).unwrap_err();
            assert!(matches!(err, PackageError::ReservedFileName { .. }), "{dep}");
        }
    }

    #[test]
    fn escape_is_reported_before_missing_source_dir() {
        let mut src = source(Path::new("/nonexistent/conveyor"), &["../x.py"]);
        let err = package_function(&src).unwrap_err();
        assert!(matches!(err, PackageError::DependencyPathInvalid { .. }));

        src.file_dependencies.clear();
        assert!(matches!(package_function(&src), Err(PackageError::Read { .. })));
    }

    #[test]
    fn missing_requirements_file_is_empty() {
        let dir = fixture();
        fs::remove_file(dir.path().join("requirements.txt")).unwrap();
        let packaged = package_function(&source(dir.path(), &[])).unwrap();
        assert!(entry_bytes(&packaged.bytes, "requirements.txt").is_empty());
    }

    #[test]
    fn empty_command_is_invalid() {
        let dir = fixture();
        let mut src = source(dir.path(), &[]);
        src.command.clear();
        assert!(matches!(
            package_function(&src),
            Err(PackageError::InvalidFunction(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_tree_is_rejected() {
        let outer = tempfile::tempdir().unwrap();
        write(outer.path(), "secret.txt", "hunter2");
        let dir = fixture();
        std::os::unix::fs::symlink(outer.path().join("secret.txt"), dir.path().join("link.txt"))
            .unwrap();
        let err = package_function(&source(dir.path(), &["link.txt"])).unwrap_err();
        assert!(matches!(err, PackageError::DependencyPathInvalid { .. }));
    }
}

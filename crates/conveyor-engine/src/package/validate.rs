//! Lexical validation of archive-relative paths.

use std::path::{Component, Path};

use conveyor_types::function::{is_executor_path, reserved_names};

use super::PackageError;

/// Normalize `path` to a `/`-separated path relative to the archive root.
///
/// `.` segments are dropped and `..` segments pop a previous segment;
/// popping past the root, absolute paths and empty paths are rejected.
/// No filesystem access happens here.
pub(crate) fn normalize_relative(path: &str) -> Result<String, PackageError> {
    let invalid = |reason: &str| PackageError::DependencyPathInvalid {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.trim().is_empty() {
        return Err(invalid("path is empty"));
    }
    // Reject Windows-style separators and drive prefixes on every platform.
    if path.contains('\\') || path.contains(':') {
        return Err(invalid("path must use '/' separators and no drive prefix"));
    }

    let mut segments: Vec<String> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                if segments.pop().is_none() {
                    return Err(invalid("path escapes the function source directory"));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("path must be relative"));
            }
        }
    }
    if segments.is_empty() {
        return Err(invalid("path names the source directory itself"));
    }
    Ok(segments.join("/"))
}

/// Final segment of a normalized path.
pub(crate) fn file_name(normalized: &str) -> &str {
    normalized.rsplit('/').next().unwrap_or(normalized)
}

/// Reject a normalized path the executor owns at run time.
pub(crate) fn check_executor_path(normalized: &str) -> Result<(), PackageError> {
    if is_executor_path(normalized) {
        return Err(PackageError::ReservedFileName {
            path: normalized.to_string(),
            name: normalized.split('/').next().unwrap_or(normalized).to_string(),
        });
    }
    Ok(())
}

/// Reject a normalized dependency whose file name is reserved.
pub(crate) fn check_reserved(normalized: &str, entry_file: &str) -> Result<(), PackageError> {
    check_executor_path(normalized)?;
    let name = file_name(normalized);
    if reserved_names(entry_file).contains(&name) {
        return Err(PackageError::ReservedFileName {
            path: normalized.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_benign_paths() {
        assert_eq!(normalize_relative("utils.py").unwrap(), "utils.py");
        assert_eq!(normalize_relative("./lib/helpers.py").unwrap(), "lib/helpers.py");
        assert_eq!(normalize_relative("lib/../data.csv").unwrap(), "data.csv");
    }

    #[test]
    fn rejects_escapes() {
        for path in ["../outside.py", "lib/../../x.py", "/etc/passwd", "", ".", "C:\\x.py"] {
            assert!(
                matches!(
                    normalize_relative(path),
                    Err(PackageError::DependencyPathInvalid { .. })
                ),
                "{path:?} should be rejected"
            );
        }
    }

    #[test]
    fn reserved_names_match_on_final_segment() {
        assert!(check_reserved("lib/model.py", "model.py").is_err());
        assert!(check_reserved("requirements.txt", "model.py").is_err());
        assert!(check_reserved("function.json", "model.py").is_err());
        assert!(check_reserved("lib/model_utils.py", "model.py").is_ok());
    }

    #[test]
    fn executor_paths_are_reserved() {
        for path in ["output.json", "invocation.json", "inputs", "inputs/input_0.arrow"] {
            assert!(
                matches!(
                    check_reserved(path, "model.py"),
                    Err(PackageError::ReservedFileName { .. })
                ),
                "{path}"
            );
        }
        assert!(check_reserved("lib/output.json", "model.py").is_ok());
        assert!(check_reserved("inputs_util.py", "model.py").is_ok());
    }
}

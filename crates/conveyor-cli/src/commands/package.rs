use anyhow::{Context, Result};

use conveyor_engine::package::{package_function, FunctionSource};
use conveyor_types::function::EntryPoint;

use crate::PackageArgs;

/// Execute the `package` command: build an archive, write it, print its digest.
pub fn execute(args: PackageArgs) -> Result<()> {
    let PackageArgs {
        name,
        source_dir,
        entry,
        method,
        class_name,
        runtime_version,
        dependencies,
        output,
        command,
    } = args;

    let source = FunctionSource {
        name,
        source_dir,
        entry_point: EntryPoint {
            file: entry,
            class_name,
            method,
        },
        command,
        runtime_version,
        file_dependencies: dependencies,
    };
    let packaged = package_function(&source)
        .with_context(|| format!("Failed to package function '{}'", source.name))?;

    std::fs::write(&output, &packaged.bytes)
        .with_context(|| format!("Failed to write archive: {}", output.display()))?;

    tracing::info!(
        function = source.name,
        entries = packaged.entries.len(),
        bytes = packaged.bytes.len(),
        output = %output.display(),
        "Function packaged"
    );
    println!("{}", packaged.digest);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(dir: &std::path::Path, deps: Vec<String>) -> PackageArgs {
        PackageArgs {
            name: "score".into(),
            source_dir: dir.to_path_buf(),
            entry: "score.py".into(),
            method: "run".into(),
            class_name: None,
            runtime_version: "3.11".into(),
            dependencies: deps,
            output: dir.join("score.zip"),
            command: vec!["python3".into(), "runner.py".into()],
        }
    }

    #[test]
    fn writes_archive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("score.py"), "def run(): pass\n").unwrap();
        execute(args(dir.path(), vec![])).unwrap();

        let bytes = std::fs::read(dir.path().join("score.zip")).unwrap();
        let entries = conveyor_engine::package::list_entries(&bytes).unwrap();
        assert!(entries.iter().any(|e| e == "score.py"));
    }

    #[test]
    fn escaping_dependency_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("score.py"), "def run(): pass\n").unwrap();
        let err = execute(args(dir.path(), vec!["../outside.py".into()])).unwrap_err();
        assert!(format!("{err:#}").contains("score"));
        assert!(!dir.path().join("score.zip").exists());
    }
}

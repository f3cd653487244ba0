//! End-to-end job contract tests.
//!
//! Each test runs a real job spec through [`run_job`] against a local
//! storage directory and a `SQLite` database, then inspects what landed
//! in storage: output artifacts, the metadata record and the exit code.

use conveyor_engine::artifacts::{read_artifact, ArtifactRef};
use conveyor_engine::codec::Artifact;
use conveyor_engine::{run_job, RuntimeConfig};
use conveyor_storage::{LocalStorage, Storage};
use conveyor_types::artifact::ArtifactType;
use conveyor_types::result::OperatorResult;
use conveyor_types::spec::JobSpec;
use serde_json::json;

struct Fixture {
    _dir: tempfile::TempDir,
    storage_dir: std::path::PathBuf,
    database: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage_dir = dir.path().join("storage");
        std::fs::create_dir_all(&storage_dir).unwrap();
        let database = dir.path().join("warehouse.db");
        let conn = rusqlite::Connection::open(&database).unwrap();
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER NOT NULL, name TEXT, churn_score REAL);
             INSERT INTO customers VALUES (1, 'acme', 0.1), (2, 'globex', 0.7), (3, 'initech', NULL);",
        )
        .unwrap();
        Self {
            _dir: dir,
            storage_dir,
            database,
        }
    }

    fn storage(&self) -> LocalStorage {
        LocalStorage::new(&self.storage_dir)
    }

    fn spec(&self, mut body: serde_json::Value) -> JobSpec {
        body["storage_config"] = json!({"file_config": {"directory": self.storage_dir}});
        if body.get("connector_name").is_some() && body.get("connector_config").is_none() {
            body["connector_config"] = json!({"database": self.database});
        }
        JobSpec::from_json(&body.to_string()).unwrap()
    }

    async fn metadata(&self, path: &str) -> OperatorResult {
        let bytes = self.storage().get(path).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn extract_customers(&self) {
        let spec = self.spec(json!({
            "type": "extract",
            "name": "customers",
            "metadata_path": "extract/op_meta",
            "connector_name": "SQLite",
            "parameters": {"query": "SELECT * FROM customers ORDER BY id"},
            "output_content_path": "extract/content",
            "output_metadata_path": "extract/meta",
        }));
        let outcome = run_job(&spec, &RuntimeConfig::default()).await;
        assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.result.error);
    }
}

#[tokio::test]
async fn sqlite_extract_writes_one_table() {
    let fx = Fixture::new();
    fx.extract_customers().await;

    let artifact = read_artifact(
        &fx.storage(),
        ArtifactRef {
            content_path: "extract/content",
            metadata_path: "extract/meta",
            expected: ArtifactType::Table,
        },
    )
    .await
    .unwrap();
    let Artifact::Table(table) = artifact else {
        panic!("expected a table");
    };
    assert_eq!(table.num_rows(), 3);
    let columns: Vec<_> = table.column_schema().into_iter().map(|c| c.name).collect();
    assert_eq!(columns, vec!["id", "name", "churn_score"]);

    let meta = fx.metadata("extract/op_meta").await;
    assert!(meta.is_success());
    assert!(meta.logs["extract"].contains("3 rows"));
}

#[tokio::test]
async fn extracted_table_loads_back() {
    let fx = Fixture::new();
    fx.extract_customers().await;

    let spec = fx.spec(json!({
        "type": "load",
        "name": "copy",
        "metadata_path": "load/op_meta",
        "connector_name": "sqlite",
        "parameters": {"table": "customers_copy", "update_mode": "replace"},
        "input_content_paths": ["extract/content"],
        "input_metadata_paths": ["extract/meta"],
    }));
    let outcome = run_job(&spec, &RuntimeConfig::default()).await;
    assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.result.error);

    let conn = rusqlite::Connection::open(&fx.database).unwrap();
    let count: i64 = conn
        .query_row("SELECT count(*) FROM customers_copy", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn load_requires_exactly_one_input() {
    let fx = Fixture::new();
    fx.extract_customers().await;

    let spec = fx.spec(json!({
        "type": "load",
        "name": "copy",
        "metadata_path": "load/op_meta",
        "connector_name": "SQLite",
        "parameters": {"table": "twice"},
        "input_content_paths": ["extract/content", "extract/content"],
        "input_metadata_paths": ["extract/meta", "extract/meta"],
    }));
    let outcome = run_job(&spec, &RuntimeConfig::default()).await;
    assert_eq!(outcome.exit_code(), 1);
    let meta = fx.metadata("load/op_meta").await;
    assert_eq!(
        meta.error.as_deref(),
        Some("expected 1 input artifact(s), but got 2")
    );
}

#[tokio::test]
async fn unknown_connector_exits_one_with_metadata() {
    let fx = Fixture::new();
    let spec = fx.spec(json!({
        "type": "authenticate",
        "name": "auth",
        "metadata_path": "auth/op_meta",
        "connector_name": "MongoDB",
    }));
    let outcome = run_job(&spec, &RuntimeConfig::default()).await;
    assert_eq!(outcome.exit_code(), 1);
    assert!(outcome.metadata_written);
    let meta = fx.metadata("auth/op_meta").await;
    assert_eq!(meta.error.as_deref(), Some("unknown connector name 'MongoDB'"));
}

#[tokio::test]
async fn discover_lists_tables() {
    let fx = Fixture::new();
    let spec = fx.spec(json!({
        "type": "discover",
        "name": "tables",
        "metadata_path": "discover/op_meta",
        "connector_name": "SQLite",
        "output_content_path": "discover/content",
    }));
    let outcome = run_job(&spec, &RuntimeConfig::default()).await;
    assert_eq!(outcome.exit_code(), 0);
    let listed: Vec<String> =
        serde_json::from_slice(&fx.storage().get("discover/content").await.unwrap()).unwrap();
    assert_eq!(listed, vec!["customers"]);
}

#[tokio::test]
async fn table_is_not_a_metric() {
    let fx = Fixture::new();
    fx.extract_customers().await;
    fx.storage().put("fn/archive.zip", b"unused".to_vec()).await.unwrap();

    let spec = fx.spec(json!({
        "type": "function",
        "name": "score",
        "metadata_path": "fn/op_meta",
        "function_path": "fn/archive.zip",
        "input_content_paths": ["extract/content"],
        "input_metadata_paths": ["extract/meta"],
        "input_artifact_types": ["float"],
        "output_content_path": "fn/content",
        "output_metadata_path": "fn/meta",
        "output_artifact_type": "float",
    }));
    let outcome = run_job(&spec, &RuntimeConfig::default()).await;
    assert_eq!(outcome.exit_code(), 1);
    let meta = fx.metadata("fn/op_meta").await;
    let error = meta.error.unwrap();
    assert!(error.starts_with("result type mismatch"), "{error}");
    assert!(error.contains("expected metric, found table"), "{error}");
}

#[tokio::test]
async fn compile_airflow_writes_dag_file() {
    let fx = Fixture::new();
    let spec = fx.spec(json!({
        "type": "compile_airflow",
        "name": "compile",
        "metadata_path": "dag/op_meta",
        "output_content_path": "dag/workflow.py",
        "workflow_id": "6f1c3c9e-2d5b-4a8e-9a57-3f9d2b1c0e11",
        "workflow_name": "nightly",
        "specs": {
            "threshold": {
                "type": "param",
                "name": "threshold",
                "storage_config": {"file_config": {"directory": "/data"}},
                "metadata_path": "p/op_meta",
                "val": "0.5",
                "output_content_path": "p/content",
                "output_metadata_path": "p/meta"
            }
        },
    }));
    let config = RuntimeConfig {
        executor_command: vec!["/usr/local/bin/conveyor".into()],
        ..RuntimeConfig::default()
    };
    let outcome = run_job(&spec, &config).await;
    assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.result.error);

    let dag = String::from_utf8(fx.storage().get("dag/workflow.py").await.unwrap()).unwrap();
    assert!(dag.contains("6f1c3c9e-2d5b-4a8e-9a57-3f9d2b1c0e11-nightly"));
    assert!(dag.contains("/usr/local/bin/conveyor run --spec "));
}

#[test]
fn malformed_spec_is_rejected_before_io() {
    assert!(JobSpec::from_base64("%%% not base64 %%%").is_err());
    assert!(JobSpec::from_base64("eyJ0eXBlIjoibm9wZSJ9").is_err()); // {"type":"nope"}
}

#[cfg(unix)]
mod functions {
    use super::*;
    use std::path::Path;

    use conveyor_engine::package::{package_function, FunctionSource};
    use conveyor_types::function::EntryPoint;

    fn package(dir: &Path, script: &str) -> Vec<u8> {
        let src = dir.join("fn_src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("check.sh"), script).unwrap();
        package_function(&FunctionSource {
            name: "churn_check".into(),
            source_dir: src,
            entry_point: EntryPoint {
                file: "check.sh".into(),
                class_name: None,
                method: "check".into(),
            },
            command: vec!["sh".into(), "check.sh".into()],
            runtime_version: "posix-sh".into(),
            file_dependencies: vec![],
        })
        .unwrap()
        .bytes
    }

    async fn run_check(fx: &Fixture, script: &str, severity: &str) -> conveyor_engine::JobOutcome {
        fx.extract_customers().await;
        let archive = package(fx.storage_dir.parent().unwrap(), script);
        fx.storage().put("fn/archive.zip", archive).await.unwrap();
        let spec = fx.spec(json!({
            "type": "function",
            "name": "churn_check",
            "metadata_path": "fn/op_meta",
            "function_path": "fn/archive.zip",
            "input_content_paths": ["extract/content"],
            "input_metadata_paths": ["extract/meta"],
            "input_artifact_types": ["table"],
            "output_content_path": "fn/content",
            "output_metadata_path": "fn/meta",
            "output_artifact_type": "boolean",
            "check_severity": severity,
        }));
        run_job(&spec, &RuntimeConfig::default()).await
    }

    #[tokio::test]
    async fn passing_check_succeeds() {
        let fx = Fixture::new();
        let outcome = run_check(
            &fx,
            r#"echo '{"type":"boolean","value":true}' > output.json"#,
            "error",
        )
        .await;
        assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.result.error);
        assert_eq!(outcome.result.logs["runtime_version"], "posix-sh");
    }

    #[tokio::test]
    async fn failed_error_check_is_written_then_fails() {
        let fx = Fixture::new();
        let outcome = run_check(
            &fx,
            r#"echo '{"type":"boolean","value":false}' > output.json"#,
            "error",
        )
        .await;
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.result.error.as_deref(), Some("check 'churn_check' failed"));
        assert!(fx.storage().exists("fn/content").await.unwrap());
    }

    #[tokio::test]
    async fn failed_warning_check_succeeds() {
        let fx = Fixture::new();
        let outcome = run_check(
            &fx,
            r#"echo '{"type":"boolean","value":false}' > output.json"#,
            "warning",
        )
        .await;
        assert_eq!(outcome.exit_code(), 0);
        assert!(outcome.result.logs.contains_key("check"));
    }

    #[tokio::test]
    async fn crashing_function_records_failure() {
        let fx = Fixture::new();
        let outcome = run_check(&fx, "echo 'model exploded' >&2; exit 1", "error").await;
        assert_eq!(outcome.exit_code(), 1);
        let meta = fx.metadata("fn/op_meta").await;
        assert!(meta.error.unwrap().contains("model exploded"));
    }
}

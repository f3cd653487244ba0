//! S3 connector: tables stored as CSV, JSON or Parquet objects.

use std::io::Cursor;
use std::sync::Arc;

use arrow::csv;
use arrow::datatypes::SchemaRef;
use arrow::json;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use conveyor_storage::object::build_s3_store;
use conveyor_types::connector::FileFormat;
use conveyor_types::error::ConnectorError;
use conveyor_types::storage::S3Config;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::Deserialize;

use super::{parse_params, TabularConnector};
use crate::codec::Table;

/// Object location and encoding, used for both extract and load.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3Params {
    pub filepath: String,
    #[serde(default)]
    pub format: FileFormat,
}

pub struct S3Connector {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl S3Connector {
    /// Build a client for the bucket in `config`. No request is made.
    ///
    /// # Errors
    ///
    /// Returns a config-category error when the client cannot be built.
    pub fn from_config(config: &S3Config) -> Result<Self, ConnectorError> {
        let store = build_s3_store(config)
            .map_err(|e| ConnectorError::config("INVALID_CONFIG", e.to_string()))?;
        Ok(Self::with_store(store, config.prefix.as_deref()))
    }

    pub fn with_store(store: Arc<dyn ObjectStore>, prefix: Option<&str>) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Self { store, prefix }
    }

    fn location(&self, filepath: &str) -> Result<ObjectPath, ConnectorError> {
        let full = match &self.prefix {
            Some(prefix) => format!("{prefix}/{}", filepath.trim_start_matches('/')),
            None => filepath.trim_start_matches('/').to_string(),
        };
        let location = ObjectPath::parse(&full).map_err(|e| {
            ConnectorError::config("INVALID_PARAMETERS", format!("bad filepath '{filepath}': {e}"))
        })?;
        if location.parts().count() == 0 {
            return Err(ConnectorError::config(
                "INVALID_PARAMETERS",
                "filepath must not be empty",
            ));
        }
        Ok(location)
    }

    fn prefix_path(&self) -> Option<ObjectPath> {
        self.prefix.as_deref().map(ObjectPath::from)
    }
}

fn classify(err: object_store::Error, context: &str) -> ConnectorError {
    let message = format!("{context}: {err}");
    match err {
        object_store::Error::NotFound { .. } => ConnectorError::config("OBJECT_NOT_FOUND", message),
        object_store::Error::PermissionDenied { .. } => {
            ConnectorError::permission("PERMISSION_DENIED", message)
        }
        object_store::Error::Unauthenticated { .. } => ConnectorError::auth("AUTH_FAILED", message),
        _ => ConnectorError::transient_network("REQUEST_FAILED", message),
    }
}

fn parse_error(format: FileFormat, err: impl std::fmt::Display) -> ConnectorError {
    ConnectorError::data("PARSE_FAILED", format!("invalid {format:?} content: {err}"))
}

fn decode_csv(bytes: &Bytes) -> Result<Table, ConnectorError> {
    let format = csv::reader::Format::default().with_header(true);
    let (schema, _) = format
        .infer_schema(Cursor::new(bytes), None)
        .map_err(|e| parse_error(FileFormat::Csv, e))?;
    let reader = csv::ReaderBuilder::new(Arc::new(schema))
        .with_format(format)
        .build(Cursor::new(bytes))
        .map_err(|e| parse_error(FileFormat::Csv, e))?;
    collect_batches(reader.schema(), reader, FileFormat::Csv)
}

/// Accepts newline-delimited records or a single top-level array.
fn decode_json(bytes: &Bytes) -> Result<Table, ConnectorError> {
    let text = std::str::from_utf8(bytes).map_err(|e| parse_error(FileFormat::Json, e))?;
    let records: Vec<serde_json::Value> = if text.trim_start().starts_with('[') {
        serde_json::from_str(text).map_err(|e| parse_error(FileFormat::Json, e))?
    } else {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()
            .map_err(|e| parse_error(FileFormat::Json, e))?
    };

    let schema = json::reader::infer_json_schema_from_iterator(records.iter().map(|v| Ok(v.clone())))
        .map_err(|e| parse_error(FileFormat::Json, e))?;
    let mut ndjson = Vec::with_capacity(bytes.len());
    for record in &records {
        serde_json::to_writer(&mut ndjson, record).map_err(|e| parse_error(FileFormat::Json, e))?;
        ndjson.push(b'\n');
    }
    let schema = Arc::new(schema);
    let reader = json::ReaderBuilder::new(Arc::clone(&schema))
        .build(Cursor::new(ndjson))
        .map_err(|e| parse_error(FileFormat::Json, e))?;
    collect_batches(schema, reader, FileFormat::Json)
}

fn decode_parquet(bytes: Bytes) -> Result<Table, ConnectorError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| parse_error(FileFormat::Parquet, e))?;
    let schema = Arc::clone(builder.schema());
    let reader = builder
        .build()
        .map_err(|e| parse_error(FileFormat::Parquet, e))?;
    collect_batches(schema, reader, FileFormat::Parquet)
}

fn collect_batches(
    schema: SchemaRef,
    reader: impl Iterator<Item = Result<RecordBatch, arrow::error::ArrowError>>,
    format: FileFormat,
) -> Result<Table, ConnectorError> {
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| parse_error(format, e))?;
    Table::new(schema, batches)
        .map_err(|e| ConnectorError::internal("BATCH_BUILD_FAILED", e.to_string()))
}

fn encode_table(table: &Table, format: FileFormat) -> Result<Vec<u8>, ConnectorError> {
    let fail = |e: &dyn std::fmt::Display| {
        ConnectorError::data("ENCODE_FAILED", format!("cannot write {format:?}: {e}"))
    };
    let mut buf = Vec::new();
    match format {
        FileFormat::Csv => {
            let mut writer = csv::WriterBuilder::new().with_header(true).build(&mut buf);
            for batch in table.batches() {
                writer.write(batch).map_err(|e| fail(&e))?;
            }
        }
        FileFormat::Json => {
            let mut writer = json::LineDelimitedWriter::new(&mut buf);
            for batch in table.batches() {
                writer.write(batch).map_err(|e| fail(&e))?;
            }
            writer.finish().map_err(|e| fail(&e))?;
        }
        FileFormat::Parquet => {
            let mut writer =
                ArrowWriter::try_new(&mut buf, Arc::clone(table.schema()), None).map_err(|e| fail(&e))?;
            for batch in table.batches() {
                writer.write(batch).map_err(|e| fail(&e))?;
            }
            writer.close().map_err(|e| fail(&e))?;
        }
    }
    Ok(buf)
}

#[async_trait]
impl TabularConnector for S3Connector {
    async fn authenticate(&mut self) -> Result<(), ConnectorError> {
        self.store
            .list_with_delimiter(self.prefix_path().as_ref())
            .await
            .map_err(|e| classify(e, "bucket listing failed"))?;
        Ok(())
    }

    async fn extract(&mut self, params: &serde_json::Value) -> Result<Table, ConnectorError> {
        let params: S3Params = parse_params(params)?;
        let location = self.location(&params.filepath)?;
        let bytes = self
            .store
            .get(&location)
            .await
            .map_err(|e| classify(e, &format!("failed to get '{location}'")))?
            .bytes()
            .await
            .map_err(|e| classify(e, &format!("failed to read '{location}'")))?;

        let table = match params.format {
            FileFormat::Csv => decode_csv(&bytes)?,
            FileFormat::Json => decode_json(&bytes)?,
            FileFormat::Parquet => decode_parquet(bytes)?,
        };
        tracing::info!(object = %location, rows = table.num_rows(), "Extracted rows");
        Ok(table)
    }

    async fn load(
        &mut self,
        params: &serde_json::Value,
        table: &Table,
    ) -> Result<(), ConnectorError> {
        let params: S3Params = parse_params(params)?;
        let location = self.location(&params.filepath)?;
        let body = encode_table(table, params.format)?;
        let len = body.len();
        self.store
            .put(&location, PutPayload::from(body))
            .await
            .map_err(|e| classify(e, &format!("failed to put '{location}'")))?;
        tracing::info!(object = %location, bytes = len, rows = table.num_rows(), "Loaded rows");
        Ok(())
    }

    async fn discover(&mut self) -> Result<Vec<String>, ConnectorError> {
        let prefix = self.prefix_path();
        let objects: Vec<_> = self
            .store
            .list(prefix.as_ref())
            .try_collect()
            .await
            .map_err(|e| classify(e, "object listing failed"))?;

        let strip = self.prefix.as_ref().map(|p| format!("{p}/"));
        let mut keys: Vec<String> = objects
            .into_iter()
            .map(|meta| {
                let key = meta.location.to_string();
                match &strip {
                    Some(p) => key.strip_prefix(p.as_str()).map_or(key.clone(), str::to_string),
                    None => key,
                }
            })
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{AsArray, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Int64Type, Schema};
    use conveyor_types::error::ErrorCategory;
    use object_store::memory::InMemory;
    use serde_json::json;

    fn connector() -> S3Connector {
        S3Connector::with_store(Arc::new(InMemory::new()), Some("data/"))
    }

    fn sample() -> Table {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("a"), None])),
            ],
        )
        .unwrap();
        Table::from_batch(batch)
    }

    #[tokio::test]
    async fn every_format_reloads() {
        let mut s3 = connector();
        for (format, file) in [("csv", "t.csv"), ("json", "t.json"), ("parquet", "t.parquet")] {
            let params = json!({"filepath": file, "format": format});
            s3.load(&params, &sample()).await.unwrap();
            let table = s3.extract(&params).await.unwrap();
            assert_eq!(table.num_rows(), 2, "{format}");
            let batch = table.concat().unwrap();
            let id = batch.column_by_name("id").unwrap();
            assert_eq!(id.as_primitive::<Int64Type>().value(1), 2, "{format}");
        }
        assert_eq!(
            s3.discover().await.unwrap(),
            vec!["t.csv".to_string(), "t.json".to_string(), "t.parquet".to_string()]
        );
    }

    #[tokio::test]
    async fn json_array_is_accepted() {
        let store = Arc::new(InMemory::new());
        store
            .put(
                &ObjectPath::from("rows.json"),
                PutPayload::from_static(br#"[{"a": 1, "b": "x"}, {"a": 2}]"#),
            )
            .await
            .unwrap();
        let mut s3 = S3Connector::with_store(store, None);
        let table = s3
            .extract(&json!({"filepath": "rows.json", "format": "json"}))
            .await
            .unwrap();
        assert_eq!(table.num_rows(), 2);
        let batch = table.concat().unwrap();
        assert!(batch.column_by_name("b").unwrap().is_null(1));
        assert_eq!(batch.column_by_name("b").unwrap().as_string::<i32>().value(0), "x");
    }

    #[tokio::test]
    async fn missing_object_is_config_error() {
        let mut s3 = connector();
        let err = s3
            .extract(&json!({"filepath": "absent.csv"}))
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Config);
        assert_eq!(err.code, "OBJECT_NOT_FOUND");
    }

    #[tokio::test]
    async fn garbage_parquet_is_data_error() {
        let store = Arc::new(InMemory::new());
        store
            .put(&ObjectPath::from("bad.parquet"), PutPayload::from_static(b"nope"))
            .await
            .unwrap();
        let mut s3 = S3Connector::with_store(store, None);
        let err = s3
            .extract(&json!({"filepath": "bad.parquet", "format": "parquet"}))
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Data);
    }

    #[tokio::test]
    async fn authenticate_lists_bucket() {
        let mut s3 = connector();
        s3.authenticate().await.unwrap();
    }
}

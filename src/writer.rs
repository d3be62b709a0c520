//! Builds appends and streams rows into a columnar dataset.
//!
//! A [Writer] is obtained via a [WriterBuilder] which collects the output path, the schema of
//! the rows to come and an application tag the engine records in the metadata of the written
//! segments. The writer then forwards row after row and finally commits the append via
//! [close](Writer::close).
//!
//! # Examples
//! ```
//! use callisto::gateway::memory::MemoryGateway;
//! use callisto::row::{Row, Value};
//! use callisto::writer::WriterBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = MemoryGateway::new();
//!
//!     let mut writer = WriterBuilder::new(gateway)
//!         .output_path("datasets/codes")
//!         .with_json_schema(r#"[{"code": "string"}, {"quantity": "int"}]"#)?
//!         .written_by("example-import")
//!         .build()
//!         .await?;
//!
//!     for i in 0..10 {
//!         writer
//!             .write(Row::new(vec![Value::Str(format!("code-{}", i)), Value::Int(i)]))
//!             .await?;
//!     }
//!
//!     assert_eq!(writer.close().await?, 10);
//!     Ok(())
//! }
//! ```
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::fmt::format_duration;
use crate::gateway::{AppendSink, AppendSpec, Gateway};
use crate::row::Row;
use crate::schema::Schema;

/// Collects the settings of an append and finally opens it.
pub struct WriterBuilder {
    gateway: Arc<dyn Gateway>,
    path: Option<String>,
    schema: Option<Schema>,
    written_by: String,
    properties: HashMap<String, String>,
}

impl WriterBuilder {
    /// Creates a new builder which will open its append via the given gateway.
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        WriterBuilder {
            gateway,
            path: None,
            schema: None,
            written_by: "callisto".to_owned(),
            properties: HashMap::new(),
        }
    }

    /// Specifies the path of the dataset to write.
    pub fn output_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Specifies the schema of the rows to come.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Specifies the schema using the compact JSON notation.
    ///
    /// See [Schema::from_json](crate::schema::Schema::from_json) for the expected format.
    ///
    /// # Errors
    /// Fails if the given string is no valid schema.
    pub fn with_json_schema(self, json: &str) -> anyhow::Result<Self> {
        Ok(self.with_schema(Schema::from_json(json)?))
    }

    /// Specifies the application tag the engine records for the written segments.
    ///
    /// If not specified, "callisto" is used.
    pub fn written_by(mut self, name: impl Into<String>) -> Self {
        self.written_by = name.into();
        self
    }

    /// Adds a free-form property which is handed to the engine verbatim.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.properties.insert(key.into(), value.into());
        self
    }

    /// Opens the append and returns a writer for its rows.
    ///
    /// # Errors
    /// Fails if no output path or no schema was specified, or if the engine refuses the
    /// append (e.g. because the dataset exists with a different schema).
    pub async fn build(self) -> anyhow::Result<Writer> {
        let path = self.path.ok_or_else(|| {
            anyhow::anyhow!("No output path was specified. Use output_path(...).")
        })?;
        let schema = self.schema.ok_or_else(|| {
            anyhow::anyhow!("No schema was specified. Use with_schema(...) or with_json_schema(...).")
        })?;

        let spec = AppendSpec::new(path, schema, self.written_by, self.properties);
        let sink = self.gateway.open_append(&spec).await?;

        Ok(Writer {
            sink,
            spec,
            rows_written: 0,
            started: Instant::now(),
        })
    }
}

/// Streams the rows of one append into the engine.
pub struct Writer {
    sink: Box<dyn AppendSink>,
    spec: AppendSpec,
    rows_written: u64,
    started: Instant,
}

impl Writer {
    /// Hands a single row over to the engine.
    ///
    /// The number of cells is checked against the schema before the row is forwarded; the
    /// engine itself additionally verifies the cell types.
    pub async fn write(&mut self, row: Row) -> anyhow::Result<()> {
        if row.len() != self.spec.schema().len() {
            return Err(anyhow::anyhow!(
                "Received a row with {} cells for a schema with {} columns ({}).",
                row.len(),
                self.spec.schema().len(),
                self.spec.schema()
            ));
        }

        self.sink.append(row).await?;
        self.rows_written += 1;

        Ok(())
    }

    /// Returns the number of rows handed to the engine so far.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Commits the append and returns the number of rows written.
    ///
    /// Note that rows handed to a writer which is never closed are discarded by the engine -
    /// an append is all or nothing. A summary of the append is logged.
    pub async fn close(mut self) -> anyhow::Result<u64> {
        let committed = self.sink.close().await?;

        log::info!(
            "Completed append to {}: committed {} rows ({}).",
            self.spec.path(),
            committed,
            format_duration(self.started.elapsed())
        );

        Ok(committed)
    }
}

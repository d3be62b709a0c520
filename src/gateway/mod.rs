//! Defines the seam between the binding and the storage engine.
//!
//! Everything the engine is good at - the columnar file format, encoding and compression,
//! predicate evaluation, batch materialization - stays behind the [Gateway] trait. Callisto
//! only ever describes *what* it wants (a [ScanSpec] or an [AppendSpec]) and consumes what the
//! engine hands back (a [ScanCursor] or an [AppendSink]).
//!
//! This keeps the library independent of how the engine is actually reached. A deployment
//! might link the engine into the process, talk to it through a socket or, as the tests do,
//! use the bundled [MemoryGateway](memory::MemoryGateway) which holds datasets in plain memory.
//!
//! Specs are constructed by the fluent builders in [reader](crate::reader) and
//! [writer](crate::writer) - user code normally never touches them directly.
use std::collections::HashMap;

use async_trait::async_trait;

use crate::row::{Batch, Row, Value};
use crate::schema::Schema;

pub mod memory;

/// Identifies the dataset to scan.
///
/// The engine distinguishes between reading a single data file and reading a folder which
/// contains an arbitrary number of them. The binding simply forwards this distinction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScanTarget {
    /// Scans a single data file.
    File(String),
    /// Scans all data files within a folder.
    Folder(String),
}

impl ScanTarget {
    /// Returns the path of the file or folder being scanned.
    pub fn path(&self) -> &str {
        match self {
            ScanTarget::File(path) => path,
            ScanTarget::Folder(path) => path,
        }
    }
}

/// Represents a predicate which is pushed down to the engine.
///
/// The engine evaluates filters against its on-disk representation, so rows which do not match
/// are never materialized or transferred. The binding itself never evaluates a filter.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Matches rows whose cell in the given column equals the given value.
    Equal {
        /// The name of the column to compare.
        column: String,
        /// The value the cell has to be equal to.
        value: Value,
    },
}

impl Filter {
    /// Creates an equality filter for the given column.
    pub fn equal(column: impl Into<String>, value: Value) -> Self {
        Filter::Equal {
            column: column.into(),
            value,
        }
    }

    /// Returns the name of the column this filter applies to.
    pub fn column(&self) -> &str {
        match self {
            Filter::Equal { column, .. } => column,
        }
    }
}

/// Describes a scan to be opened via [Gateway::open_scan].
pub struct ScanSpec {
    target: ScanTarget,
    projection: Option<Vec<String>>,
    filters: Vec<Filter>,
    batch_size: usize,
    properties: HashMap<String, String>,
}

impl ScanSpec {
    pub(crate) fn new(
        target: ScanTarget,
        projection: Option<Vec<String>>,
        filters: Vec<Filter>,
        batch_size: usize,
        properties: HashMap<String, String>,
    ) -> Self {
        ScanSpec {
            target,
            projection,
            filters,
            batch_size,
            properties,
        }
    }

    /// Returns the dataset to scan.
    pub fn target(&self) -> &ScanTarget {
        &self.target
    }

    /// Returns the columns to materialize or **None** if all columns are requested.
    pub fn projection(&self) -> Option<&[String]> {
        self.projection.as_deref()
    }

    /// Returns the filters to push down to the engine.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Returns the number of rows the engine should materialize per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns the free-form properties handed to the engine verbatim.
    ///
    /// These commonly carry credentials or endpoint settings like `fs.access.key` and are
    /// entirely interpreted by the engine.
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }
}

/// Describes an append to be opened via [Gateway::open_append].
pub struct AppendSpec {
    path: String,
    schema: Schema,
    written_by: String,
    properties: HashMap<String, String>,
}

impl AppendSpec {
    pub(crate) fn new(
        path: String,
        schema: Schema,
        written_by: String,
        properties: HashMap<String, String>,
    ) -> Self {
        AppendSpec {
            path,
            schema,
            written_by,
            properties,
        }
    }

    /// Returns the path of the dataset being written.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the schema of the rows being appended.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the name of the application performing the append.
    ///
    /// The engine records this in the metadata of the segments being written, which greatly
    /// simplifies tracing data back to its origin.
    pub fn written_by(&self) -> &str {
        &self.written_by
    }

    /// Returns the free-form properties handed to the engine verbatim.
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }
}

/// Represents the entry point into the storage engine.
///
/// Implementations wrap whatever transport actually reaches the engine. All of Callisto is
/// generic over this trait, therefore implementations have to be shareable across tasks
/// (`Send + Sync`).
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Opens a scan as described by the given spec and returns a cursor over its batches.
    async fn open_scan(&self, spec: &ScanSpec) -> anyhow::Result<Box<dyn ScanCursor>>;

    /// Opens an append as described by the given spec and returns a sink for its rows.
    async fn open_append(&self, spec: &AppendSpec) -> anyhow::Result<Box<dyn AppendSink>>;
}

/// Iterates over the batches materialized by the engine for one scan.
#[async_trait]
pub trait ScanCursor: Send {
    /// Fetches the next batch or **None** once the scan is exhausted.
    async fn next_batch(&mut self) -> anyhow::Result<Option<Batch>>;

    /// Closes the scan and releases all engine-side resources.
    ///
    /// Closing is idempotent, but fetching from a closed cursor is an error.
    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Accepts the rows of one append.
#[async_trait]
pub trait AppendSink: Send {
    /// Hands a single row over to the engine.
    async fn append(&mut self, row: Row) -> anyhow::Result<()>;

    /// Commits the append and returns the number of rows written.
    ///
    /// Rows handed to a sink which is never closed are discarded by the engine.
    async fn close(&mut self) -> anyhow::Result<u64>;
}

//! Provides an in-process storage engine for development and tests.
//!
//! The [MemoryGateway] keeps all datasets in plain memory. It is obviously not the engine the
//! binding exists for - there is no file format, no compression and nothing is ever persisted.
//! It does however honor the observable contract of the [Gateway](crate::gateway::Gateway)
//! trait (projections, equality filters, batch sizing, schema checks), which makes it the
//! ideal counterpart for examples, unit tests and for prototyping a data pipeline on a laptop
//! without any infrastructure.
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fnv::FnvHashMap;
use itertools::Itertools;

use crate::gateway::{AppendSink, AppendSpec, Filter, Gateway, ScanCursor, ScanSpec};
use crate::row::{Batch, Row, Value};
use crate::schema::{DataType, Schema};

/// An engine stand-in which stores datasets fully in memory.
///
/// Datasets come into existence by appending to them (see
/// [WriterBuilder](crate::writer::WriterBuilder)) and live as long as the gateway itself.
/// Scanning a path which was never written to is an error, exactly as it would be with a real
/// engine.
///
/// # Examples
/// ```
/// use callisto::gateway::memory::MemoryGateway;
/// use callisto::reader::ReaderBuilder;
/// use callisto::row::{Row, Value};
/// use callisto::writer::WriterBuilder;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let gateway = MemoryGateway::new();
///
///     let mut writer = WriterBuilder::new(gateway.clone())
///         .output_path("test")
///         .with_json_schema(r#"[{"code": "string"}]"#)?
///         .build()
///         .await?;
///     writer.write(Row::new(vec![Value::Str("A".to_owned())])).await?;
///     let _ = writer.close().await?;
///
///     let mut reader = ReaderBuilder::new(gateway).with_file("test").build().await?;
///     assert_eq!(reader.next_batch().await?.unwrap().len(), 1);
///     reader.close().await
/// }
/// ```
pub struct MemoryGateway {
    datasets: Arc<Mutex<FnvHashMap<String, Dataset>>>,
}

struct Dataset {
    schema: Schema,
    rows: Vec<Row>,
}

impl MemoryGateway {
    /// Creates a new gateway without any datasets.
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryGateway {
            datasets: Arc::new(Mutex::new(FnvHashMap::default())),
        })
    }
}

/// Determines if the given cell matches the expected filter value.
///
/// A null cell matches nothing, not even another null - mirroring the comparison semantics of
/// the engine.
fn matches(cell: &Value, expected: &Value) -> bool {
    !cell.is_null() && cell == expected
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn open_scan(&self, spec: &ScanSpec) -> anyhow::Result<Box<dyn ScanCursor>> {
        if spec.batch_size() == 0 {
            return Err(anyhow::anyhow!("The batch size of a scan has to be > 0."));
        }

        let datasets = self.datasets.lock().unwrap();
        let dataset = datasets.get(spec.target().path()).ok_or_else(|| {
            anyhow::anyhow!("Unknown dataset: {}", spec.target().path())
        })?;

        // Resolve all referenced columns up front so that a typo is reported as such and not
        // as an empty result...
        let mut filters = Vec::with_capacity(spec.filters().len());
        for filter in spec.filters() {
            let Filter::Equal { column, value } = filter;
            let index = dataset.schema.field_index(column).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown filter column '{}'. The dataset provides: {}",
                    column,
                    dataset.schema
                )
            })?;
            filters.push((index, value));
        }

        let projection = match spec.projection() {
            Some(columns) => {
                let mut indices = Vec::with_capacity(columns.len());
                for column in columns {
                    indices.push(dataset.schema.field_index(column).ok_or_else(|| {
                        anyhow::anyhow!(
                            "Unknown projected column '{}'. The dataset provides: {}",
                            column,
                            dataset.schema
                        )
                    })?);
                }
                Some(indices)
            }
            None => None,
        };

        let rows = dataset
            .rows
            .iter()
            .filter(|row| {
                filters
                    .iter()
                    .all(|&(index, expected)| matches(&row.values()[index], expected))
            })
            .map(|row| match &projection {
                Some(indices) => Row::new(
                    indices
                        .iter()
                        .map(|index| row.values()[*index].clone())
                        .collect(),
                ),
                None => row.clone(),
            })
            .collect_vec();

        let batches = rows
            .chunks(spec.batch_size())
            .enumerate()
            .map(|(ordinal, chunk)| Batch::new(ordinal, chunk.to_vec()))
            .collect_vec();

        log::debug!(
            "Opened scan of {} ({} batches of up to {} rows)...",
            spec.target().path(),
            batches.len(),
            spec.batch_size()
        );

        Ok(Box::new(MemoryCursor {
            batches: batches.into_iter(),
            closed: false,
        }))
    }

    async fn open_append(&self, spec: &AppendSpec) -> anyhow::Result<Box<dyn AppendSink>> {
        let mut datasets = self.datasets.lock().unwrap();
        match datasets.get(spec.path()) {
            Some(dataset) if dataset.schema != *spec.schema() => {
                return Err(anyhow::anyhow!(
                    "The dataset {} already exists with schema '{}' which differs from '{}'.",
                    spec.path(),
                    dataset.schema,
                    spec.schema()
                ));
            }
            Some(_) => {}
            None => {
                log::debug!(
                    "Creating dataset {} ({}) as requested by {}...",
                    spec.path(),
                    spec.schema(),
                    spec.written_by()
                );
                let _ = datasets.insert(
                    spec.path().to_owned(),
                    Dataset {
                        schema: spec.schema().clone(),
                        rows: Vec::new(),
                    },
                );
            }
        }

        Ok(Box::new(MemorySink {
            datasets: self.datasets.clone(),
            path: spec.path().to_owned(),
            schema: spec.schema().clone(),
            buffer: Vec::new(),
            closed: false,
        }))
    }
}

/// Iterates over the batches which were materialized when the scan was opened.
///
/// The cursor therefore provides a stable snapshot: appends performed while a scan is running
/// do not show up in it.
struct MemoryCursor {
    batches: std::vec::IntoIter<Batch>,
    closed: bool,
}

#[async_trait]
impl ScanCursor for MemoryCursor {
    async fn next_batch(&mut self) -> anyhow::Result<Option<Batch>> {
        if self.closed {
            return Err(anyhow::anyhow!(
                "Cannot fetch a batch as the cursor has already been closed."
            ));
        }

        Ok(self.batches.next())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.closed = true;
        Ok(())
    }
}

struct MemorySink {
    datasets: Arc<Mutex<FnvHashMap<String, Dataset>>>,
    path: String,
    schema: Schema,
    buffer: Vec<Row>,
    closed: bool,
}

#[async_trait]
impl AppendSink for MemorySink {
    async fn append(&mut self, row: Row) -> anyhow::Result<()> {
        if self.closed {
            return Err(anyhow::anyhow!(
                "Cannot append a row as the sink has already been closed."
            ));
        }

        if row.len() != self.schema.len() {
            return Err(anyhow::anyhow!(
                "Received a row with {} cells for a schema with {} columns ({}).",
                row.len(),
                self.schema.len(),
                self.schema
            ));
        }

        for (field, value) in self.schema.fields().iter().zip(row.values()) {
            let compatible = match (field.data_type(), value) {
                (_, Value::Null) => true,
                (DataType::Boolean, Value::Boolean(_)) => true,
                (DataType::Int, Value::Int(_)) => true,
                (DataType::Long, Value::Int(_)) => true,
                (DataType::Double, Value::Double(_)) => true,
                (DataType::String, Value::Str(_)) => true,
                (DataType::Binary, Value::Binary(_)) => true,
                _ => false,
            };
            if !compatible {
                return Err(anyhow::anyhow!(
                    "The cell for column '{}' is incompatible with its type {}.",
                    field.name(),
                    field.data_type()
                ));
            }
        }

        self.buffer.push(row);
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<u64> {
        if self.closed {
            return Err(anyhow::anyhow!(
                "The sink for {} has already been closed.",
                self.path
            ));
        }
        self.closed = true;

        let mut datasets = self.datasets.lock().unwrap();
        let dataset = datasets.get_mut(&self.path).ok_or_else(|| {
            anyhow::anyhow!("The dataset {} vanished while appending to it.", self.path)
        })?;

        let committed = self.buffer.len() as u64;
        dataset.rows.append(&mut self.buffer);

        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::gateway::memory::MemoryGateway;
    use crate::gateway::{AppendSpec, Filter, Gateway, ScanSpec, ScanTarget};
    use crate::row::{Row, Value};
    use crate::schema::{DataType, Field, Schema};

    fn test_schema() -> Schema {
        Schema::new(vec![
            Field::new("code", DataType::String),
            Field::new("quantity", DataType::Int),
        ])
        .unwrap()
    }

    async fn fill_test_dataset(gateway: &MemoryGateway) {
        let spec = AppendSpec::new(
            "test".to_owned(),
            test_schema(),
            "callisto-tests".to_owned(),
            HashMap::new(),
        );
        let mut sink = gateway.open_append(&spec).await.unwrap();
        for i in 0..5 {
            sink.append(Row::new(vec![
                Value::Str((if i % 2 == 0 { "even" } else { "odd" }).to_owned()),
                Value::Int(i),
            ]))
            .await
            .unwrap();
        }
        assert_eq!(sink.close().await.unwrap(), 5);
    }

    #[test]
    fn scans_honor_filters_projections_and_batch_sizes() {
        crate::testing::test_async(async {
            let gateway = MemoryGateway::new();
            fill_test_dataset(&gateway).await;

            // Scan for all "even" rows, only materializing the quantity column, two rows
            // per batch...
            let spec = ScanSpec::new(
                ScanTarget::Folder("test".to_owned()),
                Some(vec!["quantity".to_owned()]),
                vec![Filter::equal("code", Value::Str("even".to_owned()))],
                2,
                HashMap::new(),
            );
            let mut cursor = gateway.open_scan(&spec).await.unwrap();

            // Three matching rows (0, 2, 4) yield a full and a partial batch...
            let batch = cursor.next_batch().await.unwrap().unwrap();
            assert_eq!(batch.ordinal(), 0);
            assert_eq!(batch.len(), 2);
            assert_eq!(batch.rows()[0], Row::new(vec![Value::Int(0)]));
            assert_eq!(batch.rows()[1], Row::new(vec![Value::Int(2)]));

            let batch = cursor.next_batch().await.unwrap().unwrap();
            assert_eq!(batch.ordinal(), 1);
            assert_eq!(batch.rows()[0], Row::new(vec![Value::Int(4)]));

            // ...after which the scan is exhausted (and stays exhausted).
            assert_eq!(cursor.next_batch().await.unwrap().is_none(), true);
            assert_eq!(cursor.next_batch().await.unwrap().is_none(), true);

            // Once closed, fetching is an error...
            cursor.close().await.unwrap();
            assert_eq!(cursor.next_batch().await.is_err(), true);
        });
    }

    #[test]
    fn unknown_datasets_and_columns_are_reported() {
        crate::testing::test_async(async {
            let gateway = MemoryGateway::new();
            fill_test_dataset(&gateway).await;

            let spec = ScanSpec::new(
                ScanTarget::File("unknown".to_owned()),
                None,
                Vec::new(),
                100,
                HashMap::new(),
            );
            assert_eq!(gateway.open_scan(&spec).await.is_err(), true);

            let spec = ScanSpec::new(
                ScanTarget::File("test".to_owned()),
                Some(vec!["colour".to_owned()]),
                Vec::new(),
                100,
                HashMap::new(),
            );
            assert_eq!(gateway.open_scan(&spec).await.is_err(), true);

            let spec = ScanSpec::new(
                ScanTarget::File("test".to_owned()),
                None,
                vec![Filter::equal("colour", Value::Str("red".to_owned()))],
                100,
                HashMap::new(),
            );
            assert_eq!(gateway.open_scan(&spec).await.is_err(), true);
        });
    }

    #[test]
    fn appends_are_validated() {
        crate::testing::test_async(async {
            let gateway = MemoryGateway::new();
            fill_test_dataset(&gateway).await;

            let spec = AppendSpec::new(
                "test".to_owned(),
                test_schema(),
                "callisto-tests".to_owned(),
                HashMap::new(),
            );
            let mut sink = gateway.open_append(&spec).await.unwrap();

            // A row with the wrong number of cells is rejected...
            assert_eq!(
                sink.append(Row::new(vec![Value::Str("x".to_owned())]))
                    .await
                    .is_err(),
                true
            );

            // ...as is a row with an incompatible cell type.
            assert_eq!(
                sink.append(Row::new(vec![Value::Int(1), Value::Int(1)]))
                    .await
                    .is_err(),
                true
            );

            // Null cells are always accepted...
            sink.append(Row::new(vec![Value::Null, Value::Null]))
                .await
                .unwrap();
            assert_eq!(sink.close().await.unwrap(), 1);

            // Appending with a different schema to an existing dataset is rejected...
            let spec = AppendSpec::new(
                "test".to_owned(),
                Schema::new(vec![Field::new("other", DataType::Long)]).unwrap(),
                "callisto-tests".to_owned(),
                HashMap::new(),
            );
            assert_eq!(gateway.open_append(&spec).await.is_err(), true);
        });
    }

    #[test]
    fn null_cells_never_match_a_filter() {
        crate::testing::test_async(async {
            let gateway = MemoryGateway::new();

            let spec = AppendSpec::new(
                "nulls".to_owned(),
                test_schema(),
                "callisto-tests".to_owned(),
                HashMap::new(),
            );
            let mut sink = gateway.open_append(&spec).await.unwrap();
            sink.append(Row::new(vec![Value::Null, Value::Int(1)]))
                .await
                .unwrap();
            sink.append(Row::new(vec![Value::Str("set".to_owned()), Value::Int(2)]))
                .await
                .unwrap();
            let _ = sink.close().await.unwrap();

            // Even filtering for null itself yields nothing...
            let spec = ScanSpec::new(
                ScanTarget::File("nulls".to_owned()),
                None,
                vec![Filter::equal("code", Value::Null)],
                100,
                HashMap::new(),
            );
            let mut cursor = gateway.open_scan(&spec).await.unwrap();
            assert_eq!(cursor.next_batch().await.unwrap().is_none(), true);
        });
    }
}

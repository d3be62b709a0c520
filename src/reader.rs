//! Builds and drives scans over a columnar dataset.
//!
//! A [Reader] is obtained via a [ReaderBuilder] which collects everything the engine needs to
//! know about the scan: the dataset (a single file or a whole folder), an optional projection,
//! equality filters to push down, the batch size and free-form engine properties. The reader
//! then simply pulls batch after batch until the scan is exhausted.
//!
//! # Caching
//!
//! Workloads which iterate the same dataset multiple times (one pass per training epoch is
//! the classic case) can attach a [FillCache](crate::cache::FillCache) via
//! [ReaderBuilder::with_cache]. The first pass fills the cache batch by batch; after a
//! [rewind](Reader::rewind), all further passes replay from memory without touching the
//! engine. The cached value for each batch ordinal is an `Option<Batch>` - the end-of-scan
//! marker is itself cached, so even "where does the dataset end" is answered without the
//! engine once it has been observed.
//!
//! # Examples
//!
//! Iterating a dataset twice, with the second pass served from the cache:
//! ```
//! # use callisto::gateway::memory::MemoryGateway;
//! # use callisto::reader::ReaderBuilder;
//! # use callisto::row::{Row, Value};
//! # use callisto::writer::WriterBuilder;
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! # let gateway = MemoryGateway::new();
//! # let mut writer = WriterBuilder::new(gateway.clone())
//! #     .output_path("datasets/flowers")
//! #     .with_json_schema(r#"[{"label": "string"}]"#)?
//! #     .build()
//! #     .await?;
//! # writer.write(Row::new(vec![Value::Str("rose".to_owned())])).await?;
//! # let _ = writer.close().await?;
//! let mut reader = ReaderBuilder::new(gateway)
//!     .with_folder("datasets/flowers")
//!     .with_cache(64 * 1024 * 1024, true)
//!     .build()
//!     .await?;
//!
//! for _epoch in 0..2 {
//!     while let Some(batch) = reader.next_batch().await? {
//!         // feed the rows into the surrounding pipeline...
//!         assert_eq!(batch.is_empty(), false);
//!     }
//!     reader.rewind().await?;
//! }
//!
//! reader.close().await
//! # }
//! ```
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use yaml_rust::Yaml;

use crate::cache::FillCache;
use crate::config::Handle;
use crate::fmt::{format_duration, parse_size};
use crate::gateway::{Filter, Gateway, ScanCursor, ScanSpec, ScanTarget};
use crate::row::{Batch, Value};

/// Contains the batch size being used if neither the builder nor the config specifies one.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Collects the settings of a scan and finally opens it.
///
/// # Examples
/// ```no_run
/// # use callisto::gateway::memory::MemoryGateway;
/// # use callisto::reader::ReaderBuilder;
/// # use callisto::row::Value;
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// # let gateway = MemoryGateway::new();
/// let mut reader = ReaderBuilder::new(gateway)
///     .with_folder("datasets/flowers")
///     .with_projection(["label", "image"])
///     .filter_equal("label", Value::Str("rose".to_owned()))
///     .with_batch_size(500)
///     .with_property("fs.endpoint", "storage.example.com")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ReaderBuilder {
    gateway: Arc<dyn Gateway>,
    target: Option<ScanTarget>,
    projection: Option<Vec<String>>,
    filters: Vec<Filter>,
    batch_size: Option<usize>,
    properties: HashMap<String, String>,
    cache: Option<(usize, bool)>,
}

impl ReaderBuilder {
    /// Creates a new builder which will open its scan via the given gateway.
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        ReaderBuilder {
            gateway,
            target: None,
            projection: None,
            filters: Vec::new(),
            batch_size: None,
            properties: HashMap::new(),
            cache: None,
        }
    }

    /// Scans a single data file.
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.target = Some(ScanTarget::File(path.into()));
        self
    }

    /// Scans all data files within the given folder.
    pub fn with_folder(mut self, path: impl Into<String>) -> Self {
        self.target = Some(ScanTarget::Folder(path.into()));
        self
    }

    /// Restricts the scan to the given columns (in the given order).
    ///
    /// Without a projection, all columns of the dataset are materialized.
    pub fn with_projection<I>(mut self, columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Adds an equality filter which is pushed down to the engine.
    ///
    /// Only rows whose cell in the given column equals the given value are materialized.
    /// Multiple filters are combined with AND semantics.
    pub fn filter_equal(mut self, column: impl Into<String>, value: Value) -> Self {
        self.filters.push(Filter::equal(column, value));
        self
    }

    /// Specifies the number of rows the engine materializes per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Adds a free-form property which is handed to the engine verbatim.
    ///
    /// These commonly carry credentials or endpoint settings like `fs.access.key`.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.properties.insert(key.into(), value.into());
        self
    }

    /// Attaches a batch cache with the given advisory byte budget.
    ///
    /// With a cache attached, every batch (and the end-of-scan marker) is stored when it is
    /// first pulled, and iteration passes after a [rewind](Reader::rewind) replay from memory
    /// instead of re-reading through the engine. If **cleanup** is set, closing the reader
    /// clears the cache; otherwise the entries stay alive as long as the reader does.
    ///
    /// Note that the budget is advisory: a dataset larger than **max_memory** will be cached
    /// in its entirety regardless (a warning is logged). Pick the budget so that this does
    /// not happen, or don't attach a cache.
    pub fn with_cache(mut self, max_memory: usize, cleanup: bool) -> Self {
        self.cache = Some((max_memory, cleanup));
        self
    }

    /// Fills all knobs which were not set explicitly from the given config handle.
    ///
    /// This reads `reader.batch_size`, `reader.cache.max_memory` (a size string like `64m`),
    /// `reader.cache.cleanup` and the `gateway.properties` hash. Settings made via the builder
    /// always win over the config. Invalid config values are logged and skipped, so a broken
    /// config never prevents a scan from being opened.
    pub fn apply_config(mut self, config: &Handle) -> Self {
        if self.batch_size.is_none() {
            if let Some(batch_size) = config.query("reader.batch_size").as_i64() {
                if batch_size > 0 {
                    self.batch_size = Some(batch_size as usize);
                } else {
                    log::error!(
                        "Ignoring reader.batch_size {} as it has to be > 0.",
                        batch_size
                    );
                }
            }
        }

        if self.cache.is_none() {
            if let Some(max_memory) = config.query("reader.cache.max_memory").as_str() {
                match parse_size(max_memory) {
                    Ok(max_memory) => {
                        let cleanup = config
                            .query("reader.cache.cleanup")
                            .as_bool()
                            .unwrap_or(false);
                        self.cache = Some((max_memory, cleanup));
                    }
                    Err(error) => {
                        log::error!("Ignoring reader.cache.max_memory: {}", error);
                    }
                }
            }
        }

        if let Some(properties) = config.query("gateway.properties").as_hash() {
            for (key, value) in properties {
                let key = match key.as_str() {
                    Some(key) => key,
                    None => continue,
                };
                if self.properties.contains_key(key) {
                    continue;
                }
                let value = match value {
                    Yaml::String(value) => value.clone(),
                    Yaml::Integer(value) => value.to_string(),
                    Yaml::Real(value) => value.clone(),
                    Yaml::Boolean(value) => value.to_string(),
                    _ => {
                        log::error!(
                            "Ignoring gateway property '{}' as its value has an unsupported type.",
                            key
                        );
                        continue;
                    }
                };
                let _ = self.properties.insert(key.to_owned(), value);
            }
        }

        self
    }

    /// Opens the scan and returns a reader over its batches.
    ///
    /// # Errors
    /// Fails if no dataset was selected, if the batch size is 0 or if the engine refuses to
    /// open the scan (e.g. for an unknown dataset or an unknown column).
    pub async fn build(self) -> anyhow::Result<Reader> {
        let target = self.target.ok_or_else(|| {
            anyhow::anyhow!("No dataset was selected. Use with_file(...) or with_folder(...).")
        })?;

        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(anyhow::anyhow!("The batch size of a scan has to be > 0."));
        }

        let spec = ScanSpec::new(
            target,
            self.projection,
            self.filters,
            batch_size,
            self.properties,
        );
        let cursor = self.gateway.open_scan(&spec).await?;

        Ok(Reader {
            gateway: self.gateway,
            spec,
            cursor,
            cache: self
                .cache
                .map(|(max_memory, cleanup)| FillCache::new(max_memory, cleanup)),
            position: 0,
            rows_read: 0,
            batches_read: 0,
            started: Instant::now(),
        })
    }
}

/// Iterates over the batches of one scan.
///
/// See the [module docs](crate::reader) for an overview and examples.
pub struct Reader {
    gateway: Arc<dyn Gateway>,
    spec: ScanSpec,
    cursor: Box<dyn ScanCursor>,
    cache: Option<FillCache<usize, Option<Batch>>>,
    position: usize,
    rows_read: u64,
    batches_read: u64,
    started: Instant,
}

impl Reader {
    /// Fetches the next batch or **None** once the scan is exhausted.
    ///
    /// With a cache attached, each batch ordinal is produced at most once per reader: the
    /// first pass pulls from the engine and stores the result, all passes after a
    /// [rewind](Reader::rewind) replay the stored batches.
    pub async fn next_batch(&mut self) -> anyhow::Result<Option<Batch>> {
        let ordinal = self.position;

        let result = match &mut self.cache {
            Some(cache) => {
                let cursor = &mut self.cursor;
                cache
                    .try_get_or_compute_async(ordinal, || async move { cursor.next_batch().await })
                    .await?
                    .clone()
            }
            None => self.cursor.next_batch().await?,
        };

        if let Some(batch) = &result {
            self.position += 1;
            self.rows_read += batch.len() as u64;
            self.batches_read += 1;
        }

        Ok(result)
    }

    /// Restarts the iteration at the first batch.
    ///
    /// With a cache attached, batches which were already pulled replay from memory and the
    /// engine-side cursor stays where it is. Without a cache, the current cursor is closed
    /// and the scan is re-opened through the gateway.
    pub async fn rewind(&mut self) -> anyhow::Result<()> {
        if self.cache.is_none() {
            self.cursor.close().await?;
            self.cursor = self.gateway.open_scan(&self.spec).await?;
        }

        self.position = 0;
        Ok(())
    }

    /// Returns the total number of rows delivered to the caller (across all passes).
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Returns the total number of batches delivered to the caller (across all passes).
    pub fn batches_read(&self) -> u64 {
        self.batches_read
    }

    /// Closes the scan and releases all engine-side resources.
    ///
    /// If a cache with cleanup enabled is attached, its entries are cleared as well (see
    /// [FillCache::teardown](crate::cache::FillCache::teardown)). A summary of the scan is
    /// logged.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.cursor.close().await?;

        if let Some(cache) = &mut self.cache {
            cache.teardown();
        }

        log::info!(
            "Completed scan of {}: delivered {} rows in {} batches ({}).",
            self.spec.target().path(),
            self.rows_read,
            self.batches_read,
            format_duration(self.started.elapsed())
        );

        Ok(())
    }

    /// Turns this reader into a stream of batches which are prefetched by a background task.
    ///
    /// The task pulls batches via [next_batch](Reader::next_batch) and buffers up to **depth**
    /// of them, so the engine works ahead while the consumer processes the current batch. The
    /// reader is closed automatically once the scan is exhausted, an error occurs or the
    /// stream is dropped.
    ///
    /// # Examples
    /// ```
    /// # use callisto::gateway::memory::MemoryGateway;
    /// # use callisto::reader::ReaderBuilder;
    /// # use callisto::row::{Row, Value};
    /// # use callisto::writer::WriterBuilder;
    /// use tokio_stream::StreamExt;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> anyhow::Result<()> {
    /// # let gateway = MemoryGateway::new();
    /// # let mut writer = WriterBuilder::new(gateway.clone())
    /// #     .output_path("datasets/test")
    /// #     .with_json_schema(r#"[{"code": "string"}]"#)?
    /// #     .build()
    /// #     .await?;
    /// # writer.write(Row::new(vec![Value::Str("A".to_owned())])).await?;
    /// # let _ = writer.close().await?;
    /// let reader = ReaderBuilder::new(gateway)
    ///     .with_file("datasets/test")
    ///     .build()
    ///     .await?;
    ///
    /// let mut stream = reader.into_stream(4);
    /// while let Some(batch) = stream.next().await {
    ///     assert_eq!(batch?.len(), 1);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn into_stream(
        self,
        depth: usize,
    ) -> impl tokio_stream::Stream<Item = anyhow::Result<Batch>> {
        let (tx, rx) = tokio::sync::mpsc::channel(depth.max(1));

        crate::spawn!(async move {
            let mut reader = self;
            loop {
                match reader.next_batch().await {
                    Ok(Some(batch)) => {
                        // The consumer dropping the stream simply ends the prefetching...
                        if tx.send(Ok(batch)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        let _ = tx.send(Err(error)).await;
                        break;
                    }
                }
            }

            if let Err(error) = reader.close().await {
                log::error!("Failed to close the reader behind a batch stream: {}", error);
            }
        });

        tokio_stream::wrappers::ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio_stream::StreamExt;

    use crate::config::Config;
    use crate::gateway::memory::MemoryGateway;
    use crate::gateway::{AppendSink, AppendSpec, Gateway, ScanCursor, ScanSpec};
    use crate::reader::ReaderBuilder;
    use crate::row::{Batch, Row, Value};
    use crate::writer::WriterBuilder;

    /// Delegates to a MemoryGateway while counting scans and batch fetches.
    ///
    /// This makes cache effects observable: a replayed pass performs neither opens nor
    /// fetches.
    struct CountingGateway {
        inner: Arc<MemoryGateway>,
        opens: AtomicUsize,
        fetches: Arc<AtomicUsize>,
    }

    impl CountingGateway {
        fn new(inner: Arc<MemoryGateway>) -> Arc<Self> {
            Arc::new(CountingGateway {
                inner,
                opens: AtomicUsize::new(0),
                fetches: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    #[async_trait]
    impl Gateway for CountingGateway {
        async fn open_scan(&self, spec: &ScanSpec) -> anyhow::Result<Box<dyn ScanCursor>> {
            let _ = self.opens.fetch_add(1, Ordering::SeqCst);
            let inner = self.inner.open_scan(spec).await?;
            Ok(Box::new(CountingCursor {
                inner,
                fetches: self.fetches.clone(),
            }))
        }

        async fn open_append(&self, spec: &AppendSpec) -> anyhow::Result<Box<dyn AppendSink>> {
            self.inner.open_append(spec).await
        }
    }

    struct CountingCursor {
        inner: Box<dyn ScanCursor>,
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ScanCursor for CountingCursor {
        async fn next_batch(&mut self) -> anyhow::Result<Option<Batch>> {
            let _ = self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.next_batch().await
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            self.inner.close().await
        }
    }

    async fn fill_test_dataset(gateway: Arc<MemoryGateway>, rows: i64) {
        let mut writer = WriterBuilder::new(gateway)
            .output_path("test")
            .with_json_schema(r#"[{"code": "string"}, {"quantity": "int"}]"#)
            .unwrap()
            .build()
            .await
            .unwrap();

        for i in 0..rows {
            writer
                .write(Row::new(vec![
                    Value::Str(format!("code-{}", i)),
                    Value::Int(i),
                ]))
                .await
                .unwrap();
        }
        assert_eq!(writer.close().await.unwrap(), rows as u64);
    }

    #[test]
    fn batches_can_be_iterated() {
        crate::testing::test_async(async {
            let gateway = MemoryGateway::new();
            fill_test_dataset(gateway.clone(), 5).await;

            let mut reader = ReaderBuilder::new(gateway)
                .with_folder("test")
                .with_batch_size(2)
                .build()
                .await
                .unwrap();

            // 5 rows with a batch size of 2 yield batches of 2, 2 and 1 rows...
            let mut sizes = Vec::new();
            while let Some(batch) = reader.next_batch().await.unwrap() {
                sizes.push(batch.len());
            }
            assert_eq!(sizes, vec![2, 2, 1]);
            assert_eq!(reader.rows_read(), 5);
            assert_eq!(reader.batches_read(), 3);

            reader.close().await.unwrap();
        });
    }

    #[test]
    fn a_cached_reader_replays_batches() {
        crate::testing::test_async(async {
            let memory = MemoryGateway::new();
            fill_test_dataset(memory.clone(), 5).await;
            let gateway = CountingGateway::new(memory);

            let mut reader = ReaderBuilder::new(gateway.clone())
                .with_folder("test")
                .with_batch_size(2)
                .with_cache(1024 * 1024, false)
                .build()
                .await
                .unwrap();

            // The first pass pulls everything (3 batches plus the end marker) from the
            // engine...
            let mut rows = 0;
            while let Some(batch) = reader.next_batch().await.unwrap() {
                rows += batch.len();
            }
            assert_eq!(rows, 5);
            assert_eq!(gateway.fetches.load(Ordering::SeqCst), 4);

            // ...the second pass replays from the cache: no new scan, not a single fetch.
            reader.rewind().await.unwrap();
            let mut rows = 0;
            while let Some(batch) = reader.next_batch().await.unwrap() {
                rows += batch.len();
            }
            assert_eq!(rows, 5);
            assert_eq!(gateway.opens.load(Ordering::SeqCst), 1);
            assert_eq!(gateway.fetches.load(Ordering::SeqCst), 4);

            assert_eq!(reader.rows_read(), 10);
            reader.close().await.unwrap();
        });
    }

    #[test]
    fn rewinding_without_a_cache_reopens_the_scan() {
        crate::testing::test_async(async {
            let memory = MemoryGateway::new();
            fill_test_dataset(memory.clone(), 3).await;
            let gateway = CountingGateway::new(memory);

            let mut reader = ReaderBuilder::new(gateway.clone())
                .with_folder("test")
                .build()
                .await
                .unwrap();

            while reader.next_batch().await.unwrap().is_some() {}

            reader.rewind().await.unwrap();
            assert_eq!(reader.next_batch().await.unwrap().unwrap().len(), 3);

            // Each pass required its own engine-side scan...
            assert_eq!(gateway.opens.load(Ordering::SeqCst), 2);
            reader.close().await.unwrap();
        });
    }

    #[test]
    fn builders_reject_incomplete_scans() {
        crate::testing::test_async(async {
            let gateway = MemoryGateway::new();

            // Without a dataset, there is nothing to scan...
            assert_eq!(
                ReaderBuilder::new(gateway.clone()).build().await.is_err(),
                true
            );

            // ...and a batch size of 0 is refused as well.
            assert_eq!(
                ReaderBuilder::new(gateway)
                    .with_file("test")
                    .with_batch_size(0)
                    .build()
                    .await
                    .is_err(),
                true
            );
        });
    }

    #[test]
    fn the_config_fills_unset_knobs() {
        crate::testing::test_async(async {
            let gateway = MemoryGateway::new();
            fill_test_dataset(gateway.clone(), 4).await;

            let config = Config::new("callisto_test_config.yml");
            config
                .load_from_string(
                    "reader:
                        batch_size: 2
                     ",
                    None,
                )
                .unwrap();

            // The config provides the batch size...
            let mut reader = ReaderBuilder::new(gateway.clone())
                .with_folder("test")
                .apply_config(&config.current())
                .build()
                .await
                .unwrap();
            assert_eq!(reader.next_batch().await.unwrap().unwrap().len(), 2);
            reader.close().await.unwrap();

            // ...unless the builder already specified one.
            let mut reader = ReaderBuilder::new(gateway)
                .with_folder("test")
                .with_batch_size(3)
                .apply_config(&config.current())
                .build()
                .await
                .unwrap();
            assert_eq!(reader.next_batch().await.unwrap().unwrap().len(), 3);
            reader.close().await.unwrap();
        });
    }

    #[test]
    fn streams_prefetch_batches() {
        crate::testing::test_async(async {
            let gateway = MemoryGateway::new();
            fill_test_dataset(gateway.clone(), 5).await;

            let reader = ReaderBuilder::new(gateway)
                .with_folder("test")
                .with_batch_size(2)
                .build()
                .await
                .unwrap();

            let mut stream = reader.into_stream(2);
            let mut rows = 0;
            while let Some(batch) = stream.next().await {
                rows += batch.unwrap().len();
            }
            assert_eq!(rows, 5);
        });
    }
}

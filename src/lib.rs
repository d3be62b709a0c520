//! Callisto is a client library for reading and writing columnar datasets managed by an
//! external storage engine.
//!
//! # Introduction
//! **Callisto** is the binding layer between a numeric-computing host process (think of a
//! machine-learning training job which has to chew through millions of records per epoch) and a
//! columnar storage engine which lives outside of this process. The engine owns all the hard
//! parts: the file format, encoding and compression, predicate evaluation and the materialization
//! of record batches. Callisto owns the convenient parts: fluent builders which describe a scan
//! or an append, iteration over the batches the engine hands back, and a small fill-on-miss cache
//! which prevents the same batch from being fetched twice when a dataset is iterated repeatedly.
//!
//! As the engine is an external collaborator, Callisto talks to it exclusively through the
//! [Gateway](gateway::Gateway) trait. This keeps the library independent of any concrete
//! transport - a process-embedded engine, a socket based protocol or a test double all plug into
//! the same seam. An in-process implementation ([MemoryGateway](gateway::memory::MemoryGateway))
//! is provided so that examples and tests can run without any infrastructure.
//!
//! # Features
//! * **Fluent scan builders** - select a dataset file or folder, restrict the columns via a
//!   projection, push equality filters down to the engine and control the batch size. See
//!   [ReaderBuilder](reader::ReaderBuilder).
//! * **Fluent append builders** - pick an output path, describe the schema (either
//!   programmatically or via the compact JSON notation) and stream rows into the engine. See
//!   [WriterBuilder](writer::WriterBuilder).
//! * **Fill-on-miss caching** - the [FillCache](cache::FillCache) produces each value at most
//!   once per key and replays it on every subsequent access. Attached to a reader, it replays
//!   whole batches across iteration passes without bothering the engine again.
//! * **100% Async/Await** - all engine interactions build upon [tokio](https://tokio.rs/) and
//!   async/await primitives as provided by Rust. A reader can be turned into a prefetching
//!   stream of batches which is fed by a background task.
//! * **Reload-aware config facility** which permits to update the configuration during
//!   operation. Long-running jobs therefore never need a restart just to pick up a changed
//!   default batch size or cache budget.
//! * **Simple and well documented code base**. Callisto isn't a large framework at all. This
//!   permits every user to browse and understand its source code and what to expect from the
//!   system.
//!
//! # Modules
//! * **Cache**: A size-tracked fill-on-miss memoization store. Values are produced lazily via a
//!   caller supplied closure, stored and then replayed. More infos: [crate::cache]
//! * **Gateway**: The seam towards the storage engine along with the request types which describe
//!   scans and appends. More infos: [crate::gateway]
//! * **Reader**: Builds and drives scans, optionally backed by a batch cache and a prefetching
//!   stream adapter. More infos: [crate::reader]
//! * **Writer**: Builds appends and streams rows into the engine. More infos: [crate::writer]
//!
//! # Examples
//! A round trip through the in-process gateway:
//! ```
//! use callisto::gateway::memory::MemoryGateway;
//! use callisto::reader::ReaderBuilder;
//! use callisto::row::{Row, Value};
//! use callisto::writer::WriterBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = MemoryGateway::new();
//!
//!     let mut writer = WriterBuilder::new(gateway.clone())
//!         .output_path("datasets/test")
//!         .with_json_schema(r#"[{"code": "string"}, {"quantity": "int"}]"#)?
//!         .build()
//!         .await?;
//!     writer.write(Row::new(vec![Value::Str("A".to_owned()), Value::Int(42)])).await?;
//!     let _ = writer.close().await?;
//!
//!     let mut reader = ReaderBuilder::new(gateway)
//!         .with_folder("datasets/test")
//!         .build()
//!         .await?;
//!     while let Some(batch) = reader.next_batch().await? {
//!         assert_eq!(batch.rows()[0].values()[0], Value::Str("A".to_owned()));
//!     }
//!     reader.close().await
//! }
//! ```
#![deny(
    warnings,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod cache;
pub mod config;
pub mod fmt;
pub mod gateway;
pub mod reader;
pub mod row;
pub mod schema;
pub mod writer;

/// Contains the version of the Callisto library.
pub const CALLISTO_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the Callisto build being used.
pub const CALLISTO_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// This sets up **simplelog** to log to stdout. As Callisto is commonly embedded in batch jobs
/// running in docker containers, this is all that is needed for proper logging. The date format
/// being used is digestible by established tools like **greylog**.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // We need to do this as otherwise the integration tests might crash as the logging system
    // is initialized several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned closure to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate callisto;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

#[cfg(test)]
mod testing {
    /// Executes async code within a single threaded tokio runtime.
    pub fn test_async<F: std::future::Future>(future: F) {
        use tokio::runtime;

        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let _ = rt.block_on(future);
    }
}

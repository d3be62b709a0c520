//! Contains the system configuration.
//!
//! Provides access to the system configuration which is commonly loaded from a
//! **config/settings.yml** file. The file can be observed for changes via [Config::watch] so
//! that a long-running job picks up updated settings without a restart. Each user of the config
//! can attach itself to the [Config::notifier](Config::notifier) and re-process the config once
//! a change message is received.
//!
//! Note that the **Config** struct is kind of constant and can be created once and then kept
//! around (most probably inside an `Arc`). However, when using **Config::current()** to obtain
//! the current config handle, this handle should not be stored, as it will not be updated once
//! a new config has been loaded.
//!
//! The settings known to Callisto itself are all optional:
//!
//! ```yaml
//! reader:
//!     # The number of rows per batch requested from the storage engine.
//!     batch_size: 1000
//!     cache:
//!         # The advisory byte budget of the batch cache. Supports common
//!         # suffixes like: k, m, g, t
//!         max_memory: 64m
//!         # Whether closing a reader clears its cache.
//!         cleanup: true
//! gateway:
//!     # Free-form properties handed to the storage engine verbatim
//!     # (credentials, endpoints and the like).
//!     properties:
//!         endpoint: "storage.example.com"
//! ```
//!
//! # Examples
//!
//! Reading a value:
//! ```
//! # use callisto::config::Config;
//! let config = Config::new("config/settings.yml");
//! config.load_from_string("
//! reader:
//!     batch_size: 500
//! ", None).unwrap();
//!
//! assert_eq!(config.current().query("reader.batch_size").as_i64().unwrap(), 500);
//! ```
//!
//! Attaching a change listener:
//! ```no_run
//! # use std::sync::Arc;
//! # use callisto::config::Config;
//! # #[tokio::main]
//! # async fn main() {
//! let config = Arc::new(Config::new("config/settings.yml"));
//! config.watch();
//!
//! let mut change_notifier = config.notifier();
//! tokio::spawn(async move {
//!     loop {
//!         // Wait for a config change. This will most probably be combined with other
//!         // event sources using tokio::select!...
//!         match change_notifier.recv().await {
//!             Ok(_) => log::info!("Config update received..."),
//!             _ => return,
//!         }
//!     }
//! });
//! # }
//! ```
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

/// Provides access to the system configuration.
///
/// The config is backed by a YAML file which is parsed as a whole and swapped in atomically.
/// Therefore a malformed update never shreds the previously loaded settings.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// Internally this is simply the receiver of a broadcast. The actual message being broadcast
/// can and should be ignored. All that matters is, once a message has been received, the config
/// was changed and needs to be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
///
/// Note that this handle should not be stored or kept around for long, as it will not be updated
/// if the underlying config changed.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates a new config reading the given file.
    ///
    /// Note that this will neither load the file nor install a change listener. Use
    /// [load](Config::load) and [watch](Config::watch) for that.
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::Null, None))),
            tx,
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    ///
    /// Note that this is a fairly efficient operation but still provides some overhead. Therefore
    /// this shouldn't be placed in an inner loop.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file on disk.
    ///
    /// As within docker, the file is presented as volume, we check that it is a file, as an
    /// unmounted docker volume is always presented as directory.
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Forces the config to read the underlying file.
    ///
    /// Note that this is normally invoked once at startup. Afterwards [watch](Config::watch)
    /// takes over and re-loads the file once it changes on disk.
    pub async fn load(&self) -> anyhow::Result<()> {
        log::info!("Loading config file {}...", &self.filename);

        if let Ok(metadata) = tokio::fs::metadata(&self.filename).await {
            if !metadata.is_file() {
                log::info!("Config file doesn't exist or is an unmounted docker volume - skipping config load.");
                return Ok(());
            }
        }

        let config_data = match tokio::fs::read_to_string(&self.filename).await {
            Ok(data) => data,
            Err(error) => {
                return Err(anyhow::anyhow!(
                    "Cannot load config file {}: {}",
                    &self.filename,
                    error
                ));
            }
        };

        let last_modified = tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok());

        self.load_from_string(config_data.as_str(), last_modified)
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// This is intended to be used in test environments where we cannot / do not want to load
    /// a config file from disk.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::config::Config;
    /// let config = Config::new("somefile.yml");
    /// config.load_from_string("
    /// reader:
    ///     batch_size: 1000
    /// ", None).unwrap();
    ///
    /// assert_eq!(config.current().query("reader.batch_size").as_i64().unwrap(), 1000);
    /// ```
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let docs = match YamlLoader::load_from_str(data) {
            Ok(docs) => docs,
            Err(error) => {
                return Err(anyhow::anyhow!(
                    "Cannot parse config file {}: {}",
                    &self.filename,
                    error
                ));
            }
        };

        let doc = docs.into_iter().next().unwrap_or(Yaml::Null);

        // Store the updated config...
        self.config.store(Arc::new((doc, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.clone().send(());

        Ok(())
    }

    /// Installs a change listener which re-loads the config file once it changes on disk.
    ///
    /// Note that this listener will only watch the "last modified" date of the file and will
    /// not perform a structural comparison. Therefore it is the duty of each config user to
    /// gracefully handle partial config changes. The listener stops on its own once the last
    /// reference to the config is dropped.
    pub fn watch(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);

        crate::spawn!(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;

                let config = match weak.upgrade() {
                    Some(config) => config,
                    None => return,
                };

                // This will contain the last modified date of the file on disk or be None if the
                // file is absent...
                let last_modified = config.last_modified().await;

                // Contains the timestamp when the file was loaded the last time or be None if no
                // data has been loaded yet...
                let last_loaded = config.config.load().1;

                // If a file is present and newer than the one previously loaded (or if none has
                // been loaded so far) -> perform a reload and broadcast an update if the file has
                // been successfully loaded...
                if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded)
                {
                    match config.load().await {
                        Ok(_) => {
                            log::info!("System configuration was re-loaded.");
                        }
                        Err(error) => log::error!("Failed to re-load system config: {}", error),
                    }
                }
            }
        });
    }
}

impl Handle {
    /// Provides access to the root node of the currently loaded configuration.
    pub fn config(&self) -> &Yaml {
        &self.config.0
    }

    /// Fetches the config node for the given dot-separated path.
    ///
    /// If the path (or any intermediate node) is not present, the YAML "bad value" is returned,
    /// on which all accessors like `as_i64` or `as_str` simply yield **None**. Therefore a
    /// missing setting and a setting with an unexpected type are handled uniformly.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::config::Config;
    /// let config = Config::new("somefile.yml");
    /// config.load_from_string("
    /// reader:
    ///     cache:
    ///         cleanup: true
    /// ", None).unwrap();
    ///
    /// let handle = config.current();
    /// assert_eq!(handle.query("reader.cache.cleanup").as_bool().unwrap(), true);
    /// assert_eq!(handle.query("reader.unknown.setting").as_i64().is_none(), true);
    /// ```
    pub fn query(&self, path: impl AsRef<str>) -> &Yaml {
        let mut node = &self.config.0;
        for part in path.as_ref().split('.') {
            node = &node[part];
        }

        node
    }
}

pub mod cluster;
pub mod config;
pub mod extractor;
pub mod observer;
pub mod sink;
pub mod storage;
pub mod testing;
pub mod torrent;

pub use cluster::{ClusterConfig, Coordinator, MasterControl};
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use observer::Observer;
pub use sink::{Announcer, Sink, SinkConfig, SinkError};
pub use storage::{build_storage, Driver, Storage, StorageError, INVALID_ID};
pub use torrent::{DecodeError, TorrentDescriptor};

pub mod loader;
pub mod schema;

pub use loader::{default_config_path, load_config, load_config_from_str, resolve_config_path};
pub use schema::{
    BooruConfig, CollectorConfig, CollectorKind, Config, DatabaseConfig, DirectoryConfig,
    IndexConfig, TransportConfig, WorkerConfig,
};

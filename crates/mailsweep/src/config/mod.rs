pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, validate_config};
pub use schema::{
    default_max_connections, default_sqlite_path, Config, MailboxConfig, QuotaConfig, StoreConfig, DEFAULT_API_BASE,
    DEFAULT_TOKEN_ENV_VAR,
};

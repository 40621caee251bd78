//! Typed configuration and its loader.

pub mod loader;
pub mod schema;

pub use loader::{default_config_path, load_config};
pub use schema::{
    AgentConfig, BusConfig, ChannelsConfig, Config, CronConfig, ProviderConfig, SessionsConfig,
    ToolsConfig,
};

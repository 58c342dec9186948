pub mod display;
pub mod parser;
pub mod tls;
pub mod types;
pub mod validate;

pub use display::display_config;
pub use parser::{ConfigError, ConfigParser, FromYaml, ParseResult};
pub use tls::TlsConfig;
pub use types::{Config, RouteConfig, ServerConfig, ServerFlags};
pub use validate::validate_configs;

/// Alias kept for the entry point's call shape (`AppConfig::from_str`).
pub type AppConfig = Config;

impl Config {
    pub fn display_config(&self) {
        display_config(&self.servers);
    }
}

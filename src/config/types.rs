use derive_yaml::FromYaml;
use std::collections::HashMap;
use crate::config::parser::FromYaml; // Import trait
use crate::config::tls::TlsConfig;

// --- Constants ---
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SERVER_NAME: &str = "_";
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576; // 1MB
pub const DEFAULT_ROUTE_PATH: &str = "/";
pub const DEFAULT_ROOT: &str = "./www";
pub const DEFAULT_FILE: &str = "index.html";
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_MAX_THREADS: usize = 4;

#[derive(Debug,Clone , FromYaml)]
pub struct RouteConfig {
    pub path: String,
    pub methods: Vec<String>,
    pub redirection: Option<String>,
    pub root: String,
    pub default_file: String,
    pub cgi_ext: Option<String>,
    pub autoindex: bool,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_ROUTE_PATH.to_string(),
            methods: vec!["GET".to_string(), "HEAD".to_string()],
            redirection: None,
            root: DEFAULT_ROOT.to_string(),
            default_file: DEFAULT_FILE.to_string(),
            cgi_ext: None,
            autoindex: false,
        }
    }
}

/// Bitset-equivalent of the original library's `O_ONE`/`O_ONE_LOOP`/
/// `O_THREADED`/`O_DETACH_LISTEN`/`O_POLL`/`O_POOL`/`O_SYSTEMD`/
/// `O_NO_SIGPIPE`/`O_NO_SIGTERM` flags, modeled as named booleans instead
/// of an integer mask since a YAML-facing config reads clearer spelled
/// out than packed into one number.
#[derive(Debug, Clone, FromYaml)]
pub struct ServerFlags {
    pub one: bool,
    pub one_loop: bool,
    pub threaded: bool,
    pub detach_listen: bool,
    pub poll: bool,
    pub pool: bool,
    pub systemd: bool,
    pub no_sigpipe: bool,
    pub no_sigterm: bool,
}

impl Default for ServerFlags {
    fn default() -> Self {
        Self {
            one: false,
            one_loop: false,
            threaded: true,
            detach_listen: false,
            poll: true,
            pool: true,
            systemd: false,
            no_sigpipe: false,
            no_sigterm: false,
        }
    }
}

#[derive(Debug, Clone, FromYaml)]
pub struct Config {
    pub servers: Vec<ServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, FromYaml)]
pub struct ServerConfig {
    pub host: String,
    pub ports: Vec<u16>,
    pub server_name: String,
    pub default_server: bool,
    pub error_pages: HashMap<u16, String>,
    pub client_max_body_size: usize,
    pub routes: Vec<RouteConfig>,
    pub timeout_ms: u64,
    pub max_post_size: usize,
    pub max_file_size: usize,
    pub max_threads: usize,
    pub flags: ServerFlags,
    pub username: Option<String>,
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            ports: vec![DEFAULT_PORT],
            server_name: DEFAULT_SERVER_NAME.to_string(),
            default_server: false,
            error_pages: HashMap::new(),
            client_max_body_size: DEFAULT_MAX_BODY_SIZE,
            routes: Vec::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_post_size: DEFAULT_MAX_BODY_SIZE,
            max_file_size: 10 * DEFAULT_MAX_BODY_SIZE,
            max_threads: DEFAULT_MAX_THREADS,
            flags: ServerFlags::default(),
            username: None,
            tls: None,
        }
    }
}

impl ServerConfig {
    pub fn is_https(&self) -> bool {
        self.tls.is_some()
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

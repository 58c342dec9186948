//! TLS material for an HTTPS listen point. Kept as plain config data; the
//! actual `rustls::ServerConfig` construction lives in `listen_point.rs`
//! so that loading a cert/key pair stays a pure I/O concern separate from
//! parsing the YAML that names them.

use derive_yaml::FromYaml;

#[derive(Debug, Clone, FromYaml)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
    pub der: bool,
    pub pkcs12: Option<String>,
    pub pkcs12_password: Option<String>,
    pub crl: Option<String>,
    pub trust: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert: String::new(),
            key: String::new(),
            der: false,
            pkcs12: None,
            pkcs12_password: None,
            crl: None,
            trust: None,
        }
    }
}

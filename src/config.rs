//! Configuration loading and constants.
//!
//! Settings come from three layers, highest priority first: command-line
//! flags, an optional TOML file, and the built-in defaults below.
//! `ServerConfig` is the resolved, immutable result shared by every component.

use serde::Deserialize;
use std::path::{Path, PathBuf};

// =============================================================================
// Network Defaults
// =============================================================================

/// HTTPS port when none is configured
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Plain HTTP port used by the redirector
pub const DEFAULT_REDIRECT_PORT: u16 = 80;

/// Root directory served when no positional argument is given
pub const DEFAULT_ROOT: &str = "./";

// =============================================================================
// Certificate Storage
// =============================================================================

/// Application directory name under the per-user data directory
pub const APP_DIR_NAME: &str = "sserve";

/// Hostname the leaf certificate is issued for
pub const CERT_HOSTNAME: &str = "localhost";

/// Leaf certificate file name inside the storage directory
pub const CERT_FILE_NAME: &str = "localhost.crt";

/// Leaf private key file name inside the storage directory
pub const KEY_FILE_NAME: &str = "localhost.key";

/// CA certificate written by the native issuer
pub const CA_CERT_FILE_NAME: &str = "rootCA.pem";

/// CA private key written by the native issuer
pub const CA_KEY_FILE_NAME: &str = "rootCA-key.pem";

/// mkcert release fetched on cold start
pub const MKCERT_VERSION: &str = "v1.4.4";

/// Base URL of mkcert release artifacts
pub const MKCERT_RELEASE_URL: &str = "https://github.com/FiloSottile/mkcert/releases/download";

// =============================================================================
// Templates
// =============================================================================

/// Template used for directory listings
pub const LISTING_TEMPLATE_NAME: &str = "listing.html";

// =============================================================================
// Content Transforms
// =============================================================================

/// Maximum number of idle gzip encoders kept for reuse
pub const ENCODER_POOL_MAX_IDLE: usize = 64;

/// Largest response body the minify stage buffers; larger bodies pass through
pub const MINIFY_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

// =============================================================================
// Logging
// =============================================================================

/// Default log filter when neither `--log-level` nor RUST_LOG is set
pub const DEFAULT_LOG_FILTER: &str = "sserve=info,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

/// How the leaf certificate is provisioned when none exists yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IssuerKind {
    /// Download mkcert, install its CA into the trust store, issue a leaf
    #[default]
    Mkcert,
    /// Generate a development CA and leaf in-process
    Native,
}

/// Optional TOML configuration file.
///
/// Every field is optional; missing values fall through to the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerSection,
    #[serde(default)]
    pub tls: FileTlsSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileServerSection {
    pub root: Option<PathBuf>,
    pub port: Option<u16>,
    pub redirect: Option<bool>,
    pub redirect_port: Option<u16>,
    pub minify: Option<bool>,
    pub compression: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileTlsSection {
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub cert_dir: Option<PathBuf>,
    pub issuer: Option<IssuerKind>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl FileConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

/// Values given explicitly on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub root: Option<PathBuf>,
    pub port: Option<u16>,
    pub redirect: Option<bool>,
    pub redirect_port: Option<u16>,
    pub minify: Option<bool>,
    pub compression: Option<bool>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub cert_dir: Option<PathBuf>,
    pub issuer: Option<IssuerKind>,
}

/// TLS material source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsSource {
    /// Use an existing certificate/key pair as-is
    Manual { cert_path: PathBuf, key_path: PathBuf },
    /// Find or provision `localhost.crt`/`localhost.key` in a storage directory
    Provisioned {
        /// Overrides the per-user data directory when set
        cert_dir: Option<PathBuf>,
        issuer: IssuerKind,
    },
}

/// Resolved server configuration. Immutable after startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub root: PathBuf,
    pub port: u16,
    pub redirect: bool,
    pub redirect_port: u16,
    pub minify: bool,
    pub compression: bool,
    pub tls: TlsSource,
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Merge command-line overrides over the file configuration and defaults.
    pub fn resolve(file: FileConfig, cli: Overrides) -> Result<Self, ConfigError> {
        let server = file.server;
        let tls = file.tls;

        let root = cli
            .root
            .or(server.root)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));
        if !root.is_dir() {
            return Err(ConfigError::Validation(format!(
                "root '{}' is not a directory",
                root.display()
            )));
        }

        let cert_path = cli.cert_path.or(tls.cert_path);
        let key_path = cli.key_path.or(tls.key_path);
        let tls = match (cert_path, key_path) {
            (Some(cert_path), Some(key_path)) => TlsSource::Manual {
                cert_path,
                key_path,
            },
            (None, None) => TlsSource::Provisioned {
                cert_dir: cli.cert_dir.or(tls.cert_dir),
                issuer: cli.issuer.or(tls.issuer).unwrap_or_default(),
            },
            _ => {
                return Err(ConfigError::Validation(
                    "cert and key must be given together".to_string(),
                ))
            }
        };

        Ok(Self {
            root,
            port: cli.port.or(server.port).unwrap_or(DEFAULT_HTTPS_PORT),
            redirect: cli.redirect.or(server.redirect).unwrap_or(true),
            redirect_port: cli
                .redirect_port
                .or(server.redirect_port)
                .unwrap_or(DEFAULT_REDIRECT_PORT),
            minify: cli.minify.or(server.minify).unwrap_or(true),
            compression: cli.compression.or(server.compression).unwrap_or(true),
            tls,
            logging: file.logging,
        })
    }

    /// URL printed at startup. The port is omitted when it is the HTTPS default.
    pub fn public_url(&self) -> String {
        if self.port == DEFAULT_HTTPS_PORT {
            format!("https://{}", CERT_HOSTNAME)
        } else {
            format!("https://{}:{}", CERT_HOSTNAME, self.port)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_root(dir: &Path) -> Overrides {
        Overrides {
            root: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::resolve(FileConfig::default(), with_root(dir.path())).unwrap();

        assert_eq!(config.port, 443);
        assert_eq!(config.redirect_port, 80);
        assert!(config.redirect);
        assert!(config.minify);
        assert!(config.compression);
        assert_eq!(
            config.tls,
            TlsSource::Provisioned {
                cert_dir: None,
                issuer: IssuerKind::Mkcert
            }
        );
        assert!(!config.logging.is_json());
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let file: FileConfig = toml::from_str(
            r#"
            [server]
            port = 8443
            minify = false
            compression = false

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        let cli = Overrides {
            port: Some(9443),
            compression: Some(true),
            ..with_root(dir.path())
        };

        let config = ServerConfig::resolve(file, cli).unwrap();
        assert_eq!(config.port, 9443);
        assert!(!config.minify);
        assert!(config.compression);
        assert!(config.logging.is_json());
    }

    #[test]
    fn test_manual_tls_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Overrides {
            cert_path: Some(PathBuf::from("cert.pem")),
            ..with_root(dir.path())
        };
        assert!(matches!(
            ServerConfig::resolve(FileConfig::default(), cli),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_manual_tls_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file: FileConfig = toml::from_str(
            r#"
            [tls]
            cert_path = "site.crt"
            key_path = "site.key"
            "#,
        )
        .unwrap();
        let config = ServerConfig::resolve(file, with_root(dir.path())).unwrap();
        assert_eq!(
            config.tls,
            TlsSource::Manual {
                cert_path: PathBuf::from("site.crt"),
                key_path: PathBuf::from("site.key"),
            }
        );
    }

    #[test]
    fn test_issuer_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file: FileConfig = toml::from_str("[tls]\nissuer = \"native\"\n").unwrap();
        let config = ServerConfig::resolve(file, with_root(dir.path())).unwrap();
        assert!(matches!(
            config.tls,
            TlsSource::Provisioned {
                issuer: IssuerKind::Native,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_root_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(ServerConfig::resolve(FileConfig::default(), with_root(&missing)).is_err());
    }

    #[test]
    fn test_unknown_file_keys_rejected() {
        assert!(toml::from_str::<FileConfig>("[server]\nhost = \"x\"\n").is_err());
    }

    #[test]
    fn test_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut config =
            ServerConfig::resolve(FileConfig::default(), with_root(dir.path())).unwrap();
        assert_eq!(config.public_url(), "https://localhost");
        config.port = 8443;
        assert_eq!(config.public_url(), "https://localhost:8443");
    }
}

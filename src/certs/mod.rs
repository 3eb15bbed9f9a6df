//! Local certificate discovery and provisioning.
//!
//! The provider looks for `localhost.crt`/`localhost.key` in a per-user
//! storage directory. When the pair is missing it hands off to a
//! [`CertificateIssuer`]: either mkcert (installs a trusted local CA) or the
//! native in-process generator.

mod mkcert;
mod native;

pub use mkcert::{mkcert_artifact_name, MkcertIssuer};
pub use native::NativeIssuer;

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::{
    IssuerKind, TlsSource, APP_DIR_NAME, CERT_FILE_NAME, CERT_HOSTNAME, KEY_FILE_NAME,
};

/// Paths to a PEM certificate and its private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl CertificateMaterial {
    /// The leaf pair's conventional location inside a storage directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            cert_path: dir.join(CERT_FILE_NAME),
            key_path: dir.join(KEY_FILE_NAME),
        }
    }

    /// True when both files are present.
    pub fn exists(&self) -> Result<bool, CertError> {
        Ok(file_exists(&self.cert_path)? && file_exists(&self.key_path)?)
    }
}

/// Certificate provisioning errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("No per-user data directory could be determined (is HOME set?)")]
    NoDataDir,

    #[error("Certificate generation is not supported on {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("Failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Certificate issuer failed: {0}")]
    IssuerFailed(String),

    #[error("Certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("Certificate file {} is missing", .0.display())]
    Missing(PathBuf),

    #[error("Certificate I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CertError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CertError::Io {
            path: path.into(),
            source,
        }
    }
}

fn file_exists(path: &Path) -> Result<bool, CertError> {
    match std::fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CertError::io(path, e)),
    }
}

/// Something that can mint a leaf certificate for a hostname into a directory.
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Issue a certificate for `hostname`, writing it and its key into `dir`.
    async fn issue_local_certificate(
        &self,
        hostname: &str,
        dir: &Path,
    ) -> Result<CertificateMaterial, CertError>;
}

/// Finds an existing leaf pair or asks an issuer to create one.
pub struct CertificateProvider {
    storage: PathBuf,
    issuer: Box<dyn CertificateIssuer>,
}

impl CertificateProvider {
    pub fn new(storage: impl Into<PathBuf>, issuer: Box<dyn CertificateIssuer>) -> Self {
        Self {
            storage: storage.into(),
            issuer,
        }
    }

    pub fn storage(&self) -> &Path {
        &self.storage
    }

    /// Return the stored pair, provisioning it first if either file is missing.
    pub async fn obtain(&self) -> Result<CertificateMaterial, CertError> {
        tokio::fs::create_dir_all(&self.storage)
            .await
            .map_err(|e| CertError::io(&self.storage, e))?;

        let material = CertificateMaterial::in_dir(&self.storage);
        if material.exists()? {
            tracing::info!(dir = %self.storage.display(), "Using existing certificates");
            return Ok(material);
        }

        tracing::info!(
            dir = %self.storage.display(),
            hostname = CERT_HOSTNAME,
            "No certificates found, provisioning"
        );
        let issued = self
            .issuer
            .issue_local_certificate(CERT_HOSTNAME, &self.storage)
            .await?;

        for path in [&issued.cert_path, &issued.key_path] {
            if !file_exists(path)? {
                return Err(CertError::Missing(path.clone()));
            }
        }

        tracing::info!(
            cert = %issued.cert_path.display(),
            key = %issued.key_path.display(),
            "Generated certificates"
        );
        Ok(issued)
    }
}

/// Resolve the certificate pair for the configured TLS source.
pub async fn obtain_certificate(source: &TlsSource) -> Result<CertificateMaterial, CertError> {
    match source {
        TlsSource::Manual {
            cert_path,
            key_path,
        } => {
            let material = CertificateMaterial {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            };
            for path in [cert_path, key_path] {
                if !file_exists(path)? {
                    return Err(CertError::Missing(path.clone()));
                }
            }
            tracing::info!(cert = %cert_path.display(), key = %key_path.display(), "Using provided certificates");
            Ok(material)
        }
        TlsSource::Provisioned { cert_dir, issuer } => {
            let storage = match cert_dir {
                Some(dir) => dir.clone(),
                None => default_storage_dir().ok_or(CertError::NoDataDir)?,
            };
            let issuer: Box<dyn CertificateIssuer> = match issuer {
                IssuerKind::Mkcert => Box::new(MkcertIssuer::for_host()?),
                IssuerKind::Native => Box::new(NativeIssuer),
            };
            CertificateProvider::new(storage, issuer).obtain().await
        }
    }
}

/// Per-user storage directory for this host, from the process environment.
pub fn default_storage_dir() -> Option<PathBuf> {
    storage_dir_for(std::env::consts::OS, |name| {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    })
}

/// Storage directory for `os`, reading variables through `env`.
///
/// Windows uses `LocalAppData`; elsewhere `XDG_DATA_HOME` wins, then the
/// platform convention under `HOME`.
pub fn storage_dir_for(os: &str, env: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    let base = if os == "windows" {
        PathBuf::from(env("LocalAppData")?)
    } else if let Some(xdg) = env("XDG_DATA_HOME") {
        PathBuf::from(xdg)
    } else if os == "macos" {
        PathBuf::from(env("HOME")?)
            .join("Library")
            .join("Application Support")
    } else {
        PathBuf::from(env("HOME")?).join(".local").join("share")
    };
    Some(base.join(APP_DIR_NAME))
}

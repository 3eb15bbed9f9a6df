//! mkcert-backed issuer.
//!
//! Fetches the mkcert release binary for this host into the storage directory
//! (once), then runs it to install the local CA and issue the leaf.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::{CertError, CertificateIssuer, CertificateMaterial};
use crate::config::{MKCERT_RELEASE_URL, MKCERT_VERSION};

/// Release artifact name for an OS/arch pair as reported by `std::env::consts`.
///
/// Returns `None` for combinations mkcert does not publish.
pub fn mkcert_artifact_name(os: &str, arch: &str) -> Option<String> {
    let (os, ext) = match os {
        "macos" => ("darwin", ""),
        "linux" => ("linux", ""),
        "windows" => ("windows", ".exe"),
        _ => return None,
    };
    let arch = match (os, arch) {
        (_, "x86_64") => "amd64",
        (_, "aarch64") => "arm64",
        ("linux", "arm") => "arm",
        _ => return None,
    };
    Some(format!("mkcert-{}-{}-{}{}", MKCERT_VERSION, os, arch, ext))
}

/// Issues certificates by shelling out to mkcert.
#[derive(Debug, Clone)]
pub struct MkcertIssuer {
    artifact: String,
    release_url: String,
}

impl MkcertIssuer {
    /// Issuer for the platform this process runs on.
    pub fn for_host() -> Result<Self, CertError> {
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let artifact =
            mkcert_artifact_name(os, arch).ok_or_else(|| CertError::UnsupportedPlatform {
                os: os.to_string(),
                arch: arch.to_string(),
            })?;
        Ok(Self {
            artifact,
            release_url: format!("{}/{}", MKCERT_RELEASE_URL, MKCERT_VERSION),
        })
    }

    /// Download the binary into `dir` unless it is already there.
    async fn ensure_binary(&self, dir: &Path) -> Result<PathBuf, CertError> {
        let binary = dir.join(&self.artifact);
        if tokio::fs::try_exists(&binary)
            .await
            .map_err(|e| CertError::io(&binary, e))?
        {
            tracing::debug!(path = %binary.display(), "mkcert already present");
            return Ok(binary);
        }

        let url = format!("{}/{}", self.release_url, self.artifact);
        tracing::info!(%url, "Downloading mkcert");

        let download = |source: reqwest::Error| CertError::Download {
            url: url.clone(),
            source,
        };
        let bytes = reqwest::get(&url)
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(download)?
            .bytes()
            .await
            .map_err(download)?;

        // Only a complete download ever carries the final name.
        let partial = dir.join(format!("{}.download", self.artifact));
        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| CertError::io(&partial, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| CertError::io(&partial, e))?;
        }

        tokio::fs::rename(&partial, &binary)
            .await
            .map_err(|e| CertError::io(&binary, e))?;

        tracing::info!(path = %binary.display(), size = bytes.len(), "Downloaded mkcert");
        Ok(binary)
    }
}

#[async_trait]
impl CertificateIssuer for MkcertIssuer {
    async fn issue_local_certificate(
        &self,
        hostname: &str,
        dir: &Path,
    ) -> Result<CertificateMaterial, CertError> {
        let binary = self.ensure_binary(dir).await?;
        let material = CertificateMaterial::in_dir(dir);

        let output = Command::new(&binary)
            .arg("-install")
            .arg("-cert-file")
            .arg(&material.cert_path)
            .arg("-key-file")
            .arg(&material.key_path)
            .arg(hostname)
            .output()
            .await
            .map_err(|e| CertError::io(&binary, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CertError::IssuerFailed(format!(
                "{} exited with {}: {}",
                self.artifact,
                output.status,
                stderr.trim()
            )));
        }

        Ok(material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_names() {
        assert_eq!(
            mkcert_artifact_name("linux", "x86_64").as_deref(),
            Some("mkcert-v1.4.4-linux-amd64")
        );
        assert_eq!(
            mkcert_artifact_name("macos", "aarch64").as_deref(),
            Some("mkcert-v1.4.4-darwin-arm64")
        );
        assert_eq!(
            mkcert_artifact_name("windows", "x86_64").as_deref(),
            Some("mkcert-v1.4.4-windows-amd64.exe")
        );
        assert_eq!(
            mkcert_artifact_name("linux", "arm").as_deref(),
            Some("mkcert-v1.4.4-linux-arm")
        );
    }

    #[test]
    fn test_unsupported_platforms() {
        assert_eq!(mkcert_artifact_name("freebsd", "x86_64"), None);
        assert_eq!(mkcert_artifact_name("linux", "riscv64"), None);
        assert_eq!(mkcert_artifact_name("windows", "arm"), None);
    }

    #[tokio::test]
    async fn test_existing_binary_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let issuer = MkcertIssuer {
            artifact: "mkcert-test".to_string(),
            // Unroutable: any download attempt would fail the test.
            release_url: "http://127.0.0.1:9/none".to_string(),
        };
        std::fs::write(dir.path().join("mkcert-test"), "binary").unwrap();

        let binary = issuer.ensure_binary(dir.path()).await.unwrap();
        assert_eq!(binary, dir.path().join("mkcert-test"));
    }

    #[tokio::test]
    async fn test_failed_download_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let issuer = MkcertIssuer {
            artifact: "mkcert-test".to_string(),
            release_url: "http://127.0.0.1:9/none".to_string(),
        };

        let err = issuer.ensure_binary(dir.path()).await.unwrap_err();
        assert!(matches!(err, CertError::Download { .. }));
        assert!(!dir.path().join("mkcert-test").exists());
    }
}

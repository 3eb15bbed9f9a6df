//! In-process issuer built on rcgen.
//!
//! Generates a development CA and a leaf signed by it. Nothing is installed
//! into the host trust store; import `rootCA.pem` manually to trust it.

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose,
};
use time::{Duration, OffsetDateTime};

use super::{CertError, CertificateIssuer, CertificateMaterial};
use crate::config::{CA_CERT_FILE_NAME, CA_KEY_FILE_NAME};

/// CA lifetime in days
const CA_VALIDITY_DAYS: i64 = 3650;

/// Leaf lifetime in days (the ceiling browsers accept for leaf certificates)
const LEAF_VALIDITY_DAYS: i64 = 825;

/// Generates certificates with rcgen.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeIssuer;

struct Issued {
    ca_cert_pem: String,
    ca_key_pem: String,
    cert_pem: String,
    key_pem: String,
}

impl NativeIssuer {
    fn generate(hostname: &str) -> Result<Issued, CertError> {
        let now = OffsetDateTime::now_utc();

        let mut ca_params = CertificateParams::default();
        ca_params.distinguished_name = DistinguishedName::new();
        ca_params
            .distinguished_name
            .push(DnType::OrganizationName, "sserve development CA");
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "sserve local root");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        ca_params.not_before = now - Duration::days(1);
        ca_params.not_after = now + Duration::days(CA_VALIDITY_DAYS);

        let ca_key = KeyPair::generate()?;
        let ca_cert = ca_params.self_signed(&ca_key)?;

        // IP literals become IP SANs
        let mut leaf_params = CertificateParams::new(vec![
            hostname.to_string(),
            "127.0.0.1".to_string(),
            "::1".to_string(),
        ])?;
        leaf_params.distinguished_name = DistinguishedName::new();
        leaf_params
            .distinguished_name
            .push(DnType::OrganizationName, "sserve development certificate");
        leaf_params.distinguished_name.push(DnType::CommonName, hostname);
        leaf_params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        leaf_params.not_before = now - Duration::days(1);
        leaf_params.not_after = now + Duration::days(LEAF_VALIDITY_DAYS);

        let leaf_key = KeyPair::generate()?;
        let leaf_cert = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key)?;

        Ok(Issued {
            ca_cert_pem: ca_cert.pem(),
            ca_key_pem: ca_key.serialize_pem(),
            cert_pem: leaf_cert.pem(),
            key_pem: leaf_key.serialize_pem(),
        })
    }
}

#[async_trait]
impl CertificateIssuer for NativeIssuer {
    async fn issue_local_certificate(
        &self,
        hostname: &str,
        dir: &Path,
    ) -> Result<CertificateMaterial, CertError> {
        let issued = Self::generate(hostname)?;
        let material = CertificateMaterial::in_dir(dir);

        write_pem(&dir.join(CA_CERT_FILE_NAME), &issued.ca_cert_pem, false)?;
        write_pem(&dir.join(CA_KEY_FILE_NAME), &issued.ca_key_pem, true)?;
        write_pem(&material.cert_path, &issued.cert_pem, false)?;
        write_pem(&material.key_path, &issued.key_pem, true)?;

        tracing::info!(
            ca = %dir.join(CA_CERT_FILE_NAME).display(),
            "Generated development CA; import it into your trust store to avoid browser warnings"
        );
        Ok(material)
    }
}

/// Write a PEM file; secrets are created owner-readable only on Unix.
fn write_pem(path: &Path, contents: &str, secret: bool) -> Result<(), CertError> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if secret {
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = secret;

    let mut file = options.open(path).map_err(|e| CertError::io(path, e))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| CertError::io(path, e))
}

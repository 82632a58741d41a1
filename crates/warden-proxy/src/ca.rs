//! Root CA for TLS interception.
//!
//! Intercepted connections are re-encrypted with leaf certificates signed by
//! a local root. The root is generated once and kept as two PEM files.

use std::fs;
use std::path::{Path, PathBuf};

use hudsucker::certificate_authority::RcgenAuthority;
use hudsucker::rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use hudsucker::rustls::crypto::aws_lc_rs::default_provider;
use tracing::info;

pub use crate::error::CaManagerError;

const CA_CERT_FILENAME: &str = "warden-ca.crt";
const CA_KEY_FILENAME: &str = "warden-ca.key";
const CA_COMMON_NAME: &str = "Warden Root CA";

/// Leaf certificates kept by the authority.
const LEAF_CACHE_SIZE: u64 = 1000;

/// Manages the root CA files.
#[derive(Debug, Clone)]
pub struct CaManager {
    ca_dir: PathBuf,
}

impl CaManager {
    /// Creates a CA manager over `ca_dir`.
    pub fn new(ca_dir: impl AsRef<Path>) -> Self {
        Self {
            ca_dir: ca_dir.as_ref().to_path_buf(),
        }
    }

    /// Creates a CA manager in the platform data directory.
    pub fn with_default_dir() -> Result<Self, CaManagerError> {
        let project_dirs = directories::ProjectDirs::from("com", "warden", "warden")
            .ok_or_else(|| CaManagerError::Generation("Failed to get project dirs".into()))?;

        Ok(Self::new(project_dirs.data_dir().join("ca")))
    }

    /// Path of the CA certificate (PEM).
    pub fn cert_path(&self) -> PathBuf {
        self.ca_dir.join(CA_CERT_FILENAME)
    }

    /// Path of the CA private key (PEM).
    pub fn key_path(&self) -> PathBuf {
        self.ca_dir.join(CA_KEY_FILENAME)
    }

    /// Whether both CA files are present.
    pub fn ca_exists(&self) -> bool {
        self.cert_path().exists() && self.key_path().exists()
    }

    /// Loads the CA, generating it first if missing.
    pub fn ensure_ca(&self) -> Result<RcgenAuthority, CaManagerError> {
        if !self.ca_exists() {
            self.generate_ca()?;
        }
        self.load_authority()
    }

    /// Generates a new root certificate and key, replacing any existing pair.
    pub fn generate_ca(&self) -> Result<(), CaManagerError> {
        fs::create_dir_all(&self.ca_dir)?;

        let key_pair =
            KeyPair::generate().map_err(|e| CaManagerError::Generation(e.to_string()))?;
        let cert = ca_params()?
            .self_signed(&key_pair)
            .map_err(|e| CaManagerError::Generation(e.to_string()))?;

        fs::write(self.cert_path(), cert.pem()).map_err(|e| CaManagerError::Write(e.to_string()))?;
        fs::write(self.key_path(), key_pair.serialize_pem())
            .map_err(|e| CaManagerError::Write(e.to_string()))?;

        info!(path = ?self.cert_path(), "Generated new CA certificate");
        Ok(())
    }

    /// Loads the CA files into a hudsucker authority.
    pub fn load_authority(&self) -> Result<RcgenAuthority, CaManagerError> {
        let cert_pem = fs::read_to_string(self.cert_path())?;
        let key_pem = fs::read_to_string(self.key_path())?;

        let key_pair =
            KeyPair::from_pem(&key_pem).map_err(|e| CaManagerError::Parse(e.to_string()))?;
        let issuer = Issuer::from_ca_cert_pem(&cert_pem, key_pair)
            .map_err(|e| CaManagerError::Parse(e.to_string()))?;

        Ok(RcgenAuthority::new(issuer, LEAF_CACHE_SIZE, default_provider()))
    }

    /// Reads the CA certificate as DER, for installing into trust stores.
    pub fn read_cert_der(&self) -> Result<Vec<u8>, CaManagerError> {
        let cert_pem = fs::read_to_string(self.cert_path())?;
        let parsed = pem::parse(cert_pem).map_err(|e| CaManagerError::Parse(e.to_string()))?;
        if parsed.tag() != "CERTIFICATE" {
            return Err(CaManagerError::Parse(format!(
                "expected CERTIFICATE, found {}",
                parsed.tag()
            )));
        }
        Ok(parsed.contents().to_vec())
    }
}

fn ca_params() -> Result<CertificateParams, CaManagerError> {
    let mut params = CertificateParams::new(Vec::<String>::new())
        .map_err(|e| CaManagerError::Generation(e.to_string()))?;

    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, CA_COMMON_NAME);
    name.push(DnType::OrganizationName, "Warden");
    params.distinguished_name = name;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn paths_use_warden_names() {
        let manager = CaManager::new("/tmp/warden-ca");
        assert_eq!(manager.cert_path(), PathBuf::from("/tmp/warden-ca/warden-ca.crt"));
        assert_eq!(manager.key_path(), PathBuf::from("/tmp/warden-ca/warden-ca.key"));
    }

    #[test]
    fn missing_until_generated() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CaManager::new(temp_dir.path().join("ca"));
        assert!(!manager.ca_exists());

        manager.generate_ca().unwrap();
        assert!(manager.ca_exists());
        assert!(manager.load_authority().is_ok());
    }

    #[test]
    fn ensure_ca_generates_once() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CaManager::new(temp_dir.path().join("ca"));

        manager.ensure_ca().unwrap();
        let first = fs::read_to_string(manager.cert_path()).unwrap();

        manager.ensure_ca().unwrap();
        let second = fs::read_to_string(manager.cert_path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn der_matches_pem_contents() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CaManager::new(temp_dir.path().join("ca"));
        manager.generate_ca().unwrap();

        let der = manager.read_cert_der().unwrap();
        // DER certificates start with a SEQUENCE tag.
        assert_eq!(der[0], 0x30);
    }

    #[test]
    fn corrupt_key_is_a_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CaManager::new(temp_dir.path().join("ca"));
        manager.generate_ca().unwrap();
        fs::write(manager.key_path(), "not a key").unwrap();

        assert!(matches!(manager.load_authority(), Err(CaManagerError::Parse(_))));
    }
}

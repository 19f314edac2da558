//! TLS configuration and certificate loading.

use std::io;
use std::path::{Path, PathBuf};

use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;

use crate::config::SslConfig;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("ssl.{0} is required for https")]
    Missing(&'static str),

    #[error("failed to read {what} `{path}`: {source}")]
    Read {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid PEM in `{path}`: {source}")]
    Pem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in `{0}`")]
    NoCertificates(PathBuf),

    #[error("no private key found in `{0}`")]
    NoPrivateKey(PathBuf),

    #[error("TLS configuration rejected: {0}")]
    Config(#[source] io::Error),
}

async fn read(what: &'static str, path: &Path) -> Result<Vec<u8>, TlsError> {
    tokio::fs::read(path).await.map_err(|source| TlsError::Read {
        what,
        path: path.to_path_buf(),
        source,
    })
}

fn check_certs(path: &Path, pem: &[u8]) -> Result<(), TlsError> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Pem {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(())
}

fn check_key(path: &Path, pem: &[u8]) -> Result<(), TlsError> {
    match rustls_pemfile::private_key(&mut &pem[..]) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(TlsError::NoPrivateKey(path.to_path_buf())),
        Err(source) => Err(TlsError::Pem {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Load and validate TLS material, appending the CA bundle to the served chain.
pub async fn load_tls_config(ssl: &SslConfig) -> Result<RustlsConfig, TlsError> {
    let cert_path = Path::new(ssl.cert.as_deref().ok_or(TlsError::Missing("cert"))?);
    let key_path = Path::new(ssl.key.as_deref().ok_or(TlsError::Missing("key"))?);

    let mut chain = read("certificate", cert_path).await?;
    check_certs(cert_path, &chain)?;

    let key = read("private key", key_path).await?;
    check_key(key_path, &key)?;

    if let Some(ca) = ssl.ca.as_deref() {
        let ca_path = Path::new(ca);
        let bundle = read("CA bundle", ca_path).await?;
        check_certs(ca_path, &bundle)?;
        if !chain.ends_with(b"\n") {
            chain.push(b'\n');
        }
        chain.extend_from_slice(&bundle);
    }

    RustlsConfig::from_pem(chain, key)
        .await
        .map_err(TlsError::Config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    fn ssl(cert: &Path, key: &Path) -> SslConfig {
        SslConfig {
            cert: Some(cert.display().to_string()),
            key: Some(key.display().to_string()),
            ca: None,
        }
    }

    #[tokio::test]
    async fn missing_files_are_reported() {
        let config = ssl(Path::new("/nonexistent/cert.pem"), Path::new("/nonexistent/key.pem"));
        let err = load_tls_config(&config).await.unwrap_err();
        assert!(matches!(err, TlsError::Read { what: "certificate", .. }));
    }

    #[tokio::test]
    async fn garbage_is_not_a_certificate() {
        let cert = write_temp(b"not a pem file");
        let key = write_temp(b"still not a pem file");
        let err = load_tls_config(&ssl(cert.path(), key.path())).await.unwrap_err();
        assert!(matches!(err, TlsError::NoCertificates(_)));
    }

    #[tokio::test]
    async fn self_signed_material_loads() {
        let rcgen::CertifiedKey { cert, signing_key } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_file = write_temp(cert.pem().as_bytes());
        let key_file = write_temp(signing_key.serialize_pem().as_bytes());

        let mut config = ssl(cert_file.path(), key_file.path());
        config.ca = Some(cert_file.path().display().to_string());
        assert!(load_tls_config(&config).await.is_ok());
    }

    #[tokio::test]
    async fn absent_paths_are_missing() {
        let err = load_tls_config(&SslConfig::default()).await.unwrap_err();
        assert!(matches!(err, TlsError::Missing("cert")));
    }
}

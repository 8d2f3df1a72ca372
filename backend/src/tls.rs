//! Optional TLS support for the Sluice server.
//!
//! Uses `axum-server` with `RustlsConfig` for TLS termination.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

use crate::config::TlsConfig;

/// Load TLS certificate and key from PEM files.
pub async fn load_rustls_config(tls: &TlsConfig) -> anyhow::Result<RustlsConfig> {
    // Select the ring crypto provider explicitly. Ok(()) on first call, Err on
    // subsequent calls (ignored).
    let _ = rustls::crypto::ring::default_provider().install_default();

    check_readable(&tls.cert_path, "certificate")?;
    check_readable(&tls.key_path, "private key")?;

    info!("Loading TLS certificate from {}", tls.cert_path.display());
    info!("Loading TLS private key from {}", tls.key_path.display());

    let config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load TLS config: {}", e))?;

    info!("TLS configuration loaded successfully");
    Ok(config)
}

fn check_readable(path: &Path, what: &str) -> anyhow::Result<()> {
    if !path.is_file() {
        anyhow::bail!("TLS {} not found: {}", what, path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_files_are_reported() {
        let dir = TempDir::new().unwrap();
        let tls = TlsConfig {
            cert_path: dir.path().join("cert.pem"),
            key_path: dir.path().join("key.pem"),
        };
        let err = load_rustls_config(&tls).await.unwrap_err();
        assert!(err.to_string().contains("certificate"));
    }

    #[tokio::test]
    async fn test_garbage_pem_is_rejected() {
        let dir = TempDir::new().unwrap();
        let tls = TlsConfig {
            cert_path: dir.path().join("cert.pem"),
            key_path: dir.path().join("key.pem"),
        };
        std::fs::write(&tls.cert_path, "not a certificate").unwrap();
        std::fs::write(&tls.key_path, "not a key").unwrap();
        assert!(load_rustls_config(&tls).await.is_err());
    }
}

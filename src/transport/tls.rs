//! TLS helpers for wss:// relays and clients
//!
//! The relay only consumes a ready-made credential; generating one is left to
//! the deployment.

use crate::config::TlsConfig;
use crate::signaling::SignalingError;
use log::info;
use tokio_native_tls::TlsAcceptor;

/// Build a server-side acceptor from a PEM certificate chain and PKCS#8 key
pub fn load_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, SignalingError> {
    let cert = std::fs::read(&config.cert_path).map_err(|e| {
        SignalingError::Tls(format!("reading {}: {}", config.cert_path.display(), e))
    })?;
    let key = std::fs::read(&config.key_path).map_err(|e| {
        SignalingError::Tls(format!("reading {}: {}", config.key_path.display(), e))
    })?;

    let identity = native_tls::Identity::from_pkcs8(&cert, &key)?;
    let acceptor = native_tls::TlsAcceptor::new(identity)?;
    info!("Loaded TLS credential from {:?}", config.cert_path);
    Ok(TlsAcceptor::from(acceptor))
}

/// Build a client-side connector
pub fn client_connector(accept_invalid_certs: bool) -> Result<native_tls::TlsConnector, SignalingError> {
    let mut builder = native_tls::TlsConnector::builder();
    if accept_invalid_certs {
        // Relays hosted on a device present their own self-signed certificate
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }
    Ok(builder.build()?)
}

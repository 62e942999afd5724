use std::sync::Arc;

#[cfg(not(target_os = "windows"))]
use rustls::crypto::aws_lc_rs as provider;
#[cfg(target_os = "windows")]
use rustls::crypto::ring as provider;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::{NetError, Result};

/// Client config trusting the bundled web PKI roots
pub(crate) fn default_client_config() -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder_with_provider(Arc::new(provider::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| NetError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

pub(crate) async fn connect(config: Arc<ClientConfig>, tcp: TcpStream, host: &str) -> Result<TlsStream<TcpStream>> {
    let name = ServerName::try_from(host.to_owned()).map_err(|e| NetError::Tls(e.to_string()))?;
    let tls = TlsConnector::from(config).connect(name, tcp).await.map_err(|e| NetError::Tls(e.to_string()))?;
    Ok(tls)
}

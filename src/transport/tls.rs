use std::{fs::File, io, io::BufRead, path::Path, sync::Arc};

use rustls::{
    pki_types::{CertificateDer, InvalidDnsNameError, PrivateKeyDer, ServerName},
    ClientConfig, RootCertStore,
};
use thiserror::Error;
use tokio_rustls::TlsConnector;

/// Errors raised while assembling a [`TlsContext`].
#[derive(Debug, Error)]
pub enum TlsError {
    /// A PEM file could not be read.
    #[error("cannot read PEM file: {0}")]
    Io(#[from] io::Error),
    /// A PEM file contained no usable private key.
    #[error("no private key found in PEM file")]
    NoPrivateKey,
    /// A client certificate chain was given without a key, or vice versa.
    #[error("client certificate and private key must be provided together")]
    IncompleteClientAuth,
    /// The server name is neither a DNS name nor an IP literal.
    #[error("invalid server name: {0}")]
    InvalidServerName(#[from] InvalidDnsNameError),
    /// The TLS configuration was rejected.
    #[error("TLS configuration error: {0}")]
    Config(#[from] rustls::Error),
}

/// Client-side TLS state shared with a sender at construction time.
///
/// There is no process-global context: each sender takes its own
/// [`TlsContext`] by value, which removes any ordering constraint between
/// TLS initialisation and sender start-up.
#[derive(Clone)]
pub struct TlsContext {
    pub(crate) connector: TlsConnector,
    pub(crate) server_name: ServerName<'static>,
}

impl TlsContext {
    /// Wraps an existing rustls configuration.
    ///
    /// `server_name` is the name presented for certificate verification; it
    /// accepts a DNS name or an IP literal.
    pub fn new(config: Arc<ClientConfig>, server_name: &str) -> Result<Self, TlsError> {
        let server_name = ServerName::try_from(server_name.to_owned())?;
        Ok(Self {
            connector: TlsConnector::from(config),
            server_name,
        })
    }

    /// Starts building a context from PEM files.
    pub fn builder() -> TlsContextBuilder {
        TlsContextBuilder {
            roots: RootCertStore::empty(),
            cert_chain: Vec::new(),
            key: None,
        }
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Builder assembling a [`TlsContext`] from PEM files: trusted roots plus an
/// optional client certificate and private key.
pub struct TlsContextBuilder {
    roots: RootCertStore,
    cert_chain: Vec<CertificateDer<'static>>,
    key: Option<PrivateKeyDer<'static>>,
}

impl TlsContextBuilder {
    /// Adds every certificate in a PEM file to the set of trusted roots.
    pub fn root_ca_file(mut self, path: impl AsRef<Path>) -> Result<Self, TlsError> {
        for cert in read_certs(path.as_ref())? {
            self.roots.add(cert)?;
        }
        Ok(self)
    }

    /// Loads the client certificate chain from a PEM file.
    pub fn certificate_file(mut self, path: impl AsRef<Path>) -> Result<Self, TlsError> {
        self.cert_chain = read_certs(path.as_ref())?;
        Ok(self)
    }

    /// Loads the client private key from a PEM file.
    pub fn private_key_file(mut self, path: impl AsRef<Path>) -> Result<Self, TlsError> {
        let mut reader = open(path.as_ref())?;
        self.key = Some(rustls_pemfile::private_key(&mut reader)?.ok_or(TlsError::NoPrivateKey)?);
        Ok(self)
    }

    /// Finishes the configuration for the given server name.
    pub fn build(self, server_name: &str) -> Result<TlsContext, TlsError> {
        let builder = ClientConfig::builder().with_root_certificates(self.roots);
        let config = match (self.cert_chain.is_empty(), self.key) {
            (true, None) => builder.with_no_client_auth(),
            (false, Some(key)) => builder.with_client_auth_cert(self.cert_chain, key)?,
            _ => return Err(TlsError::IncompleteClientAuth),
        };
        TlsContext::new(Arc::new(config), server_name)
    }
}

fn open(path: &Path) -> Result<impl BufRead, TlsError> {
    Ok(io::BufReader::new(File::open(path)?))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_config() -> Arc<ClientConfig> {
        Arc::new(
            ClientConfig::builder()
                .with_root_certificates(RootCertStore::empty())
                .with_no_client_auth(),
        )
    }

    #[test]
    fn test_server_name_accepts_dns_and_ip() {
        let ctx = TlsContext::new(empty_config(), "collector.example.org").unwrap();
        assert!(matches!(ctx.server_name, ServerName::DnsName(_)));

        let ctx = TlsContext::new(empty_config(), "192.0.2.1").unwrap();
        assert!(matches!(ctx.server_name, ServerName::IpAddress(_)));
    }

    #[test]
    fn test_server_name_rejects_garbage() {
        assert!(matches!(
            TlsContext::new(empty_config(), "not a hostname"),
            Err(TlsError::InvalidServerName(_))
        ));
    }

    #[test]
    fn test_builder_rejects_missing_pem_file() {
        let res = TlsContext::builder().root_ca_file("/nonexistent/ca.pem");
        assert!(matches!(res, Err(TlsError::Io(_))));
    }

    #[test]
    fn test_builder_rejects_key_without_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("key.pem");
        // A syntactically valid but empty PEM file: no key inside.
        std::fs::write(&key_path, "").unwrap();

        let res = TlsContext::builder().private_key_file(&key_path);
        assert!(matches!(res, Err(TlsError::NoPrivateKey)));
    }

    #[test]
    fn test_builder_rejects_certificate_without_key() {
        let res = {
            let mut builder = TlsContext::builder();
            builder.cert_chain = vec![CertificateDer::from(vec![0u8; 4])];
            builder.build("peer.example.org")
        };
        assert!(matches!(res, Err(TlsError::IncompleteClientAuth)));
    }

    #[test]
    fn test_builder_with_no_client_auth_builds() {
        let ctx = TlsContext::builder().build("peer.example.org").unwrap();
        assert!(matches!(ctx.server_name, ServerName::DnsName(_)));
    }
}

//! Opens the transport a test connection runs over: plain TCP, or TLS with
//! a mandatory `h2` ALPN negotiation.

use std::sync::Arc;

use eyre::WrapErr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::Config;

/// Anything a [crate::Conn] can drive. The driver splits it into an
/// exclusive read half (owned by the background reader) and a shared write
/// half.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

pub type BoxedTransport = Box<dyn Transport>;

/// Connects to the configured target, within the per-operation timeout.
/// With TLS enabled, the handshake MUST negotiate `h2` over ALPN or the
/// whole connection counts as failed.
pub async fn connect(config: &Config) -> eyre::Result<BoxedTransport> {
    let addr = format!("{}:{}", config.host, config.port);
    let stream = tokio::time::timeout(config.timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| eyre::eyre!("connection to {addr} timed out"))?
        .wrap_err_with(|| format!("could not connect to {addr}"))?;
    stream.set_nodelay(true)?;

    if !config.tls {
        return Ok(Box::new(stream));
    }

    let connector = TlsConnector::from(Arc::new(client_tls_config(config.insecure)));
    let server_name = ServerName::try_from(config.host.clone())
        .wrap_err_with(|| format!("invalid TLS server name: {}", config.host))?;
    let stream = connector
        .connect(server_name, stream)
        .await
        .wrap_err("TLS handshake failed")?;

    let (_, session) = stream.get_ref();
    match session.alpn_protocol() {
        Some(b"h2") => debug!("negotiated h2 over ALPN"),
        other => eyre::bail!(
            "ALPN negotiation failed: wanted h2, got {:?}",
            other.map(String::from_utf8_lossy)
        ),
    }

    Ok(Box::new(stream))
}

fn client_tls_config(insecure: bool) -> rustls::ClientConfig {
    let mut tls_config = if insecure {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification::new()))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };
    tls_config.alpn_protocols = vec![b"h2".to_vec()];
    tls_config
}

mod danger {
    use tokio_rustls::rustls::{
        self,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider},
        pki_types::{CertificateDer, ServerName, UnixTime},
        DigitallySignedStruct, SignatureScheme,
    };

    /// Accepts whatever certificate the server presents. Signatures are
    /// still checked, so this tests a real TLS stack, just without a trust
    /// anchor.
    #[derive(Debug)]
    pub(super) struct NoCertificateVerification(CryptoProvider);

    impl NoCertificateVerification {
        pub(super) fn new() -> Self {
            Self(rustls::crypto::ring::default_provider())
        }
    }

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}

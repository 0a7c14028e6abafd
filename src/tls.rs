//! TLS trust configuration.
//!
//! Two modes, selected per request: the default defers to the webpki root
//! store and full certificate/hostname validation; the naive mode accepts
//! any presented chain and any hostname. The naive mode exists for testing
//! against self-signed or internal endpoints and must be opted into on each
//! request; it is never a process-wide default.

use std::sync::{Arc, OnceLock};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;

/// Select the ring provider once per process.
///
/// rustls refuses to infer a default when more than one crypto provider is
/// linked in, so the first TLS config build would panic without an explicit
/// installation.
pub fn install_rustls_crypto_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Certificate verifier that approves every chain and hostname.
///
/// Installing a custom verifier disables rustls' hostname check as well,
/// which is exactly the contract of the naive mode.
#[derive(Debug)]
struct NaiveCertVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NaiveCertVerifier {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build a client config for the requested trust mode.
pub fn client_config(validate_certificates: bool) -> Arc<ClientConfig> {
    install_rustls_crypto_provider();

    if validate_certificates {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    } else {
        let provider = rustls::crypto::CryptoProvider::get_default()
            .expect("crypto provider installed above")
            .clone();
        Arc::new(
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NaiveCertVerifier { provider }))
                .with_no_client_auth(),
        )
    }
}

/// Connector for the requested trust mode.
pub fn connector(validate_certificates: bool) -> TlsConnector {
    TlsConnector::from(client_config(validate_certificates))
}

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::net::Socket;
use crate::Error;

/// Mirrors `libpq`'s `sslmode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    /// Whether a TLS handshake should even be attempted.
    pub fn requires_attempt(self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    /// Whether the caller must fail the connection if TLS negotiation is
    /// rejected by the server (as opposed to silently falling back to plain
    /// text, which is what `allow`/`prefer` permit).
    pub fn requires_tls(self) -> bool {
        matches!(
            self,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull
        )
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(Error::InvalidConnectString(format!(
                "unknown sslmode: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub mode: Option<SslMode>,
    pub server_hostname: Option<String>,
    pub root_cert_path: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
}

/// Accepts any certificate chain without validating the hostname. Used for
/// `sslmode=verify-ca`, which trusts the root store but not SNI matching.
#[derive(Debug)]
struct AcceptAnyName(Arc<rustls::crypto::CryptoProvider>);

impl ServerCertVerifier for AcceptAnyName {
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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn root_store(config: &TlsConfig) -> crate::Result<RootCertStore> {
    let mut store = RootCertStore::empty();

    if let Some(path) = &config.root_cert_path {
        let data = std::fs::read(path)?;
        let certs: Vec<_> = rustls_pemfile::certs(&mut &data[..])
            .collect::<Result<_, _>>()
            .map_err(Error::from)?;
        for cert in certs {
            store.add(cert).map_err(Error::tls)?;
        }
    } else {
        let native = rustls_native_certs::load_native_certs().certs;
        if native.is_empty() {
            store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        } else {
            for cert in native {
                let _ = store.add(cert);
            }
        }
    }

    Ok(store)
}

/// Perform the TLS client handshake over an already-connected plain stream.
///
/// This assumes protocol-level negotiation (the PostgreSQL `SSLRequest`
/// exchange) has already happened one layer up and the server agreed to
/// switch to TLS on this stream.
pub async fn upgrade<S>(
    stream: S,
    config: &TlsConfig,
) -> crate::Result<Box<dyn Socket>>
where
    S: Socket,
{
    let mode = config.mode.unwrap_or(SslMode::Prefer);
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(Error::tls)?;

    let tls_config = if matches!(mode, SslMode::VerifyCa) {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyName(provider)))
            .with_no_client_auth()
    } else {
        let roots = root_store(config)?;
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    let connector = TlsConnector::from(Arc::new(tls_config));

    let hostname = config
        .server_hostname
        .clone()
        .unwrap_or_else(|| "localhost".to_string());
    let name = rustls::pki_types::ServerName::try_from(hostname)
        .map_err(|e| Error::InvalidConnectString(e.to_string()))?
        .to_owned();

    let tls_stream = connector.connect(name, stream).await?;

    Ok(Box::new(tls_stream))
}

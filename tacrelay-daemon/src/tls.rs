//! TLS acceptor construction from operator-supplied PEM material

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_rustls::rustls::{
    self,
    crypto::CryptoProvider,
    pki_types::{CertificateDer, PrivateKeyDer},
    server::danger::{ClientCertVerified, ClientCertVerifier},
    server::WebPkiClientVerifier,
    version, DistinguishedName, RootCertStore, SupportedProtocolVersion,
};
use tokio_rustls::TlsAcceptor;

use crate::config::{TlsSettings, TlsVersion};

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid PEM in {path}: {source}")]
    Pem {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("no TLS protocol version satisfies min {min:?} / max {max:?}")]
    EmptyVersionRange { min: TlsVersion, max: TlsVersion },

    #[error("client CA rejected: {0}")]
    ClientVerifier(#[from] rustls::server::VerifierBuilderError),

    #[error("rustls rejected the configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Build the acceptor the Connection Acceptor wraps every socket with.
pub fn build_acceptor(settings: &TlsSettings) -> Result<TlsAcceptor, TlsError> {
    let cert_chain = load_certs(&settings.cert_file)?;
    let key = load_private_key(&settings.key_file)?;
    let versions = resolve_protocol_versions(settings.min_version, settings.max_version)?;

    let builder = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&versions)?;

    let config = if settings.allow_unverified_clients {
        // Compatibility mode: request a certificate, verify nothing about it
        builder
            .with_client_cert_verifier(Arc::new(AcceptAnyClientCert::new()))
            .with_single_cert(cert_chain, key)?
    } else if let Some(ca_path) = &settings.client_ca_file {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(ca_path)? {
            roots.add(cert)?;
        }
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).build()?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(cert_chain, key)?
    } else {
        builder
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)?
    };

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Map the configured version range onto what rustls actually implements.
/// Legacy 1.0/1.1 requests clamp up to 1.2 with a warning.
pub fn resolve_protocol_versions(
    min: TlsVersion,
    max: TlsVersion,
) -> Result<Vec<&'static SupportedProtocolVersion>, TlsError> {
    if min < TlsVersion::V1_2 {
        tracing::warn!(
            requested = ?min,
            "TLS 1.0/1.1 requested for legacy peers but unavailable on this stack, clamping to 1.2"
        );
    }
    let min = min.max(TlsVersion::V1_2);
    if max < min {
        return Err(TlsError::EmptyVersionRange { min, max });
    }

    let mut versions = Vec::new();
    if min <= TlsVersion::V1_2 && max >= TlsVersion::V1_2 {
        versions.push(&version::TLS12);
    }
    if max >= TlsVersion::V1_3 {
        versions.push(&version::TLS13);
    }
    if versions.is_empty() {
        return Err(TlsError::EmptyVersionRange { min, max });
    }
    Ok(versions)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|source| TlsError::Pem {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Pem {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Client certificate verifier that accepts anything presented, including
/// self-signed certificates. Signatures on the handshake itself are still
/// checked; only the certificate chain goes unverified.
#[derive(Debug)]
struct AcceptAnyClientCert {
    provider: Arc<CryptoProvider>,
}

impl AcceptAnyClientCert {
    fn new() -> Self {
        Self {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }
}

impl ClientCertVerifier for AcceptAnyClientCert {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

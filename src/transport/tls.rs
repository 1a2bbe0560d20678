//! rustls client configuration for the pooled transport.
//!
//! Certificate validation policy, CA bundles, and client certificates are
//! all resolved from the immutable [`TransportConfig`]. File reads happen
//! here, at client build time, not during configuration resolution.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::config::TransportConfig;
use crate::error::{Error, Result};

/// Certificate validation mode derived from the resolved configuration.
///
/// Exists so the effective policy can be compared against a reference
/// configuration without poking at the built TLS stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Full chain validation against the configured roots.
    WebPki,
    /// Validation disabled. Changes only certificate checks, never pooling.
    Disabled,
}

/// Effective validation mode for a configuration.
pub fn verify_mode(config: &TransportConfig) -> VerifyMode {
    if config.ssl_verify {
        VerifyMode::WebPki
    } else {
        VerifyMode::Disabled
    }
}

/// Build the rustls client config for the pooled transport.
pub fn client_config(config: &TransportConfig) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::tls(format!("protocol selection: {}", e)))?;

    // SSL_SECURITY_LEVEL has no rustls equivalent; the floor only affects
    // the standard strategy's minimum-version mapping.

    let mut built = match verify_mode(config) {
        VerifyMode::Disabled => {
            let verifier = NoVerification { provider };
            let builder = builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(verifier));
            match load_client_identity(config)? {
                Some((certs, key)) => builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| Error::tls(format!("client certificate rejected: {}", e)))?,
                None => builder.with_no_client_auth(),
            }
        }
        VerifyMode::WebPki => {
            let roots = load_root_store(config)?;
            let builder = builder.with_root_certificates(roots);
            match load_client_identity(config)? {
                Some((certs, key)) => builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| Error::tls(format!("client certificate rejected: {}", e)))?,
                None => builder.with_no_client_auth(),
            }
        }
    };

    built.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(built)
}

fn load_root_store(config: &TransportConfig) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();

    if let Some(path) = &config.ca_bundle_path {
        for cert in read_pem_certs(path)? {
            roots
                .add(cert)
                .map_err(|e| Error::tls(format!("CA bundle {}: {}", path.display(), e)))?;
        }
        if roots.is_empty() {
            return Err(Error::tls(format!(
                "CA bundle {} contains no certificates",
                path.display()
            )));
        }
        return Ok(roots);
    }

    // Individual load failures are common with mixed CA stores and are only
    // actionable when nothing loads at all.
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        tracing::debug!(error = %err, "skipping unloadable native certificate");
    }
    for cert in native.certs {
        if let Err(e) = roots.add(cert) {
            tracing::debug!(error = %e, "skipping rejected native certificate");
        }
    }
    if roots.is_empty() {
        return Err(Error::tls("no usable root certificates found"));
    }
    Ok(roots)
}

type Identity = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

fn load_client_identity(config: &TransportConfig) -> Result<Option<Identity>> {
    let Some(path) = &config.client_cert_path else {
        return Ok(None);
    };
    let certs = read_pem_certs(path)?;
    if certs.is_empty() {
        return Err(Error::tls(format!(
            "client certificate {} contains no certificates",
            path.display()
        )));
    }
    let mut reader = open_pem(path)?;
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::tls(format!("client key {}: {}", path.display(), e)))?
        .ok_or_else(|| {
            Error::tls(format!(
                "client certificate {} contains no private key",
                path.display()
            ))
        })?;
    Ok(Some((certs, key)))
}

fn open_pem(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path)
        .map_err(|e| Error::tls(format!("cannot open {}: {}", path.display(), e)))?;
    Ok(BufReader::new(file))
}

fn read_pem_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open_pem(path)?;
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::tls(format!("PEM parse {}: {}", path.display(), e)))
}

/// Verifier that accepts any server certificate. Installed only when the
/// resolved configuration explicitly disables verification.
#[derive(Debug)]
struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

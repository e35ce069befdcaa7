use tracing::{debug, warn};

use crate::config::UnitConfig;
use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsBackend {
    Rustls,
    NativeTls,
}

impl TlsBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rustls => "rustls",
            Self::NativeTls => "native-tls",
        }
    }

    pub const fn is_available(self) -> bool {
        match self {
            Self::Rustls => cfg!(feature = "tls-rustls"),
            Self::NativeTls => cfg!(feature = "tls-native"),
        }
    }
}

impl Default for TlsBackend {
    fn default() -> Self {
        default_tls_backend()
    }
}

pub(crate) const fn default_tls_backend() -> TlsBackend {
    if cfg!(feature = "tls-rustls") {
        TlsBackend::Rustls
    } else {
        TlsBackend::NativeTls
    }
}

/// How the server certificate is checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Backend default trust store.
    Default,
    /// Platform store extended with a configured certificate bundle.
    DefaultWithBundle,
    /// Any certificate is accepted. Only for self-signed test endpoints.
    TrustAll,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsPolicy {
    verify: bool,
    trust_material: Option<String>,
}

impl TlsPolicy {
    pub fn new(verify: bool, trust_material: Option<String>) -> Self {
        Self {
            verify,
            trust_material: trust_material.filter(|pem| !pem.trim().is_empty()),
        }
    }

    pub fn from_config(config: &UnitConfig) -> Self {
        Self::new(config.verify_certificate, config.trust_certificate.clone())
    }

    pub fn verify(&self) -> bool {
        self.verify
    }

    pub fn trust_material(&self) -> Option<&str> {
        self.trust_material.as_deref()
    }

    pub fn trust_policy(&self) -> TrustPolicy {
        match (self.verify, &self.trust_material) {
            (false, _) => TrustPolicy::TrustAll,
            (true, Some(_)) => TrustPolicy::DefaultWithBundle,
            (true, None) => TrustPolicy::Default,
        }
    }
}

pub(crate) fn tls_config_error(backend: TlsBackend, message: impl Into<String>) -> Error {
    Error::TlsConfig {
        backend: backend.as_str(),
        message: message.into(),
    }
}

fn parse_pem_certificates(
    backend: TlsBackend,
    pem_bundle: &[u8],
) -> crate::Result<Vec<ureq::tls::Certificate<'static>>> {
    let mut certificates = Vec::new();
    for item in ureq::tls::parse_pem(pem_bundle) {
        let item = item.map_err(|source| {
            tls_config_error(backend, format!("failed to parse trust certificate PEM: {source}"))
        })?;
        if let ureq::tls::PemItem::Certificate(certificate) = item {
            certificates.push(certificate);
        }
    }
    if certificates.is_empty() {
        return Err(tls_config_error(
            backend,
            "no certificate blocks found in trust certificate PEM",
        ));
    }
    Ok(certificates)
}

fn platform_root_certificates() -> Vec<ureq::tls::Certificate<'static>> {
    let result = rustls_native_certs::load_native_certs();
    for error in &result.errors {
        warn!(error = %error, "error loading native root certificate");
    }
    if result.certs.is_empty() {
        warn!("no native root CA certificates found");
    } else {
        debug!(count = result.certs.len(), "loaded native root certificates");
    }
    result
        .certs
        .iter()
        .map(|der| ureq::tls::Certificate::from_der(der.as_ref()).to_owned())
        .collect()
}

pub(crate) fn build_tls_config(
    backend: TlsBackend,
    policy: &TlsPolicy,
) -> crate::Result<ureq::tls::TlsConfig> {
    if !backend.is_available() {
        return Err(Error::TlsBackendUnavailable {
            backend: backend.as_str(),
        });
    }

    let provider = match backend {
        TlsBackend::Rustls => ureq::tls::TlsProvider::Rustls,
        TlsBackend::NativeTls => ureq::tls::TlsProvider::NativeTls,
    };
    let mut builder = ureq::tls::TlsConfig::builder().provider(provider);

    match policy.trust_policy() {
        TrustPolicy::TrustAll => {
            if policy.trust_material().is_some() {
                debug!("certificate verification disabled, ignoring trust certificate");
            }
            warn!(backend = backend.as_str(), "trusting all server certificates");
            builder = builder.disable_verification(true);
        }
        TrustPolicy::DefaultWithBundle => {
            let pem = policy.trust_material().unwrap_or_default();
            let mut roots = parse_pem_certificates(backend, pem.as_bytes())?;
            let custom = roots.len();
            roots.extend(platform_root_certificates());
            debug!(
                backend = backend.as_str(),
                custom_roots = custom,
                total_roots = roots.len(),
                "using platform trust store with custom certificates"
            );
            builder = builder.root_certs(ureq::tls::RootCerts::new_with_certs(&roots));
        }
        TrustPolicy::Default => {
            debug!(backend = backend.as_str(), "using default trust store");
        }
    }

    Ok(builder.build())
}

#[cfg(feature = "tls-rustls")]
fn rustls_root_store(
    backend: TlsBackend,
    policy: &TlsPolicy,
) -> crate::Result<rustls::RootCertStore> {
    if policy.trust_policy() == TrustPolicy::Default {
        return Ok(rustls::RootCertStore::from_iter(
            webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
        ));
    }

    let to_der = |certificate: &ureq::tls::Certificate<'static>| {
        rustls::pki_types::CertificateDer::from(certificate.der().to_vec())
    };
    let pem = policy.trust_material().unwrap_or_default();
    let custom = parse_pem_certificates(backend, pem.as_bytes())?;
    let mut root_store = rustls::RootCertStore::empty();
    let (added, _ignored) = root_store.add_parsable_certificates(custom.iter().map(to_der));
    if added == 0 {
        return Err(tls_config_error(backend, "failed to parse trust certificate PEM"));
    }
    let (platform, _ignored) =
        root_store.add_parsable_certificates(platform_root_certificates().iter().map(to_der));
    debug!(
        backend = backend.as_str(),
        custom_roots = added,
        platform_roots = platform,
        "built rustls root store"
    );
    Ok(root_store)
}

/// rustls client configuration for the hyper transport. ALPN is left empty;
/// the connector fills it in from the protocols it enables.
#[cfg(feature = "tls-rustls")]
pub(crate) fn build_rustls_client_config(
    policy: &TlsPolicy,
) -> crate::Result<rustls::ClientConfig> {
    let backend = TlsBackend::Rustls;
    let provider = std::sync::Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(std::sync::Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|source| tls_config_error(backend, source.to_string()))?;

    if policy.trust_policy() == TrustPolicy::TrustAll {
        warn!(backend = backend.as_str(), "trusting all server certificates");
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(std::sync::Arc::new(AcceptAnyServerCertificate {
                provider,
            }))
            .with_no_client_auth());
    }

    let root_store = rustls_root_store(backend, policy)?;
    Ok(builder
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

/// Skips chain and name checks. Handshake signatures are still verified.
#[cfg(feature = "tls-rustls")]
#[derive(Debug)]
struct AcceptAnyServerCertificate {
    provider: std::sync::Arc<rustls::crypto::CryptoProvider>,
}

#[cfg(feature = "tls-rustls")]
impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        certificate: &rustls::pki_types::CertificateDer<'_>,
        signature: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            certificate,
            signature,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        certificate: &rustls::pki_types::CertificateDer<'_>,
        signature: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            certificate,
            signature,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

use std::fmt;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use thiserror::Error;

use crate::certificate::CertificateData;
use crate::registry::CertificateRegistry;

/// TLS sunumu hataları.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Sertifika verisi özel anahtar içermiyor.
    #[error("sertifika verisi özel anahtar içermiyor")]
    MissingKey,
    /// Sertifika verisi zincir içermiyor.
    #[error("sertifika zinciri boş")]
    EmptyChain,
    /// Anahtar rustls imza anahtarına dönüştürülemedi.
    #[error("TLS imza anahtarı kurulamadı: {0}")]
    Signing(#[from] rustls::Error),
}

/// Kayıtlı sertifika verisinden rustls `CertifiedKey` kurar.
///
/// # Errors
///
/// Veri anahtar veya zincir içermiyorsa ya da anahtar türü rustls
/// tarafından desteklenmiyorsa `TlsError` döner.
pub fn certified_key(data: &CertificateData) -> Result<CertifiedKey, TlsError> {
    let key = data.private_key.as_ref().ok_or(TlsError::MissingKey)?;
    if data.chain.is_empty() {
        return Err(TlsError::EmptyChain);
    }

    let certs: Vec<CertificateDer<'static>> = data
        .chain
        .iter()
        .map(|der| CertificateDer::from(der.clone()))
        .collect();

    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.pkcs8_der().to_vec()));
    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key_der)?;

    Ok(CertifiedKey::new(certs, signing_key))
}

/// Tek bir yönetilen sertifika adını çözen rustls sertifika sağlayıcısı.
///
/// `ServerConfig::cert_resolver` alanına takılır; sertifika henüz
/// yayınlanmadıysa el sıkışma sertifikasız kalır (`None`).
pub struct ManagedCertResolver {
    registry: Arc<CertificateRegistry>,
    name: String,
}

impl ManagedCertResolver {
    #[must_use]
    pub fn new(registry: Arc<CertificateRegistry>, name: impl Into<String>) -> Self {
        Self {
            registry,
            name: name.into(),
        }
    }

    fn resolve_current(&self) -> Option<Arc<CertifiedKey>> {
        let data = self.registry.get(&self.name)?;
        certified_key(&data).ok().map(Arc::new)
    }
}

impl fmt::Debug for ManagedCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedCertResolver")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ResolvesServerCert for ManagedCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.resolve_current()
    }
}

#[cfg(test)]
mod tests {
    use crate::certificate::CertificateKey;
    use crate::order::Identifier;

    use super::*;

    fn matching_data(name: &str) -> CertificateData {
        let key = CertificateKey::generate_p256().expect("anahtar üretilmeli");

        let params = rcgen::CertificateParams::new(vec!["localhost".to_owned()])
            .expect("sertifika parametreleri kurulmalı");
        let key_pair = rcgen::KeyPair::try_from(key.pkcs8_der()).expect("rcgen anahtarı kurulmalı");
        let cert = params.self_signed(&key_pair).expect("sertifika imzalanmalı");

        CertificateData {
            name: name.to_owned(),
            identifiers: vec![Identifier::dns("localhost")],
            validity_days: 1,
            private_key: Some(Arc::new(key)),
            chain: vec![cert.der().to_vec()],
        }
    }

    #[test]
    fn certified_key_builds_from_complete_data() {
        let data = matching_data("web");
        let certified = certified_key(&data).expect("CertifiedKey kurulmalı");
        assert_eq!(certified.cert.len(), 1);
    }

    #[test]
    fn certified_key_requires_private_key() {
        let mut data = matching_data("web");
        data.private_key = None;
        assert!(matches!(certified_key(&data), Err(TlsError::MissingKey)));
    }

    #[test]
    fn certified_key_requires_chain() {
        let mut data = matching_data("web");
        data.chain.clear();
        assert!(matches!(certified_key(&data), Err(TlsError::EmptyChain)));
    }

    #[test]
    fn resolver_returns_none_until_published() {
        let registry = Arc::new(CertificateRegistry::new());
        let resolver = ManagedCertResolver::new(Arc::clone(&registry), "web");

        assert!(resolver.resolve_current().is_none());

        registry.store(Arc::new(matching_data("web")));
        assert!(resolver.resolve_current().is_some());
    }

    #[test]
    fn resolver_is_name_scoped() {
        let registry = Arc::new(CertificateRegistry::new());
        registry.store(Arc::new(matching_data("web")));

        let resolver = ManagedCertResolver::new(registry, "baska");
        assert!(resolver.resolve_current().is_none());
    }
}

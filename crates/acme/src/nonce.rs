use std::collections::VecDeque;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use http::header::{HeaderMap, ToStrError};
use thiserror::Error;

/// ACME protokolünde kullanılan `Replay-Nonce` başlığının adı.
pub const REPLAY_NONCE_HEADER: &str = "Replay-Nonce";

/// Nonce doğrulama ve havuzu ile ilişkili hata türleri.
#[derive(Debug, Error)]
pub enum NonceError {
    /// Boş bir nonce değeri ile karşılaşıldı.
    #[error("Replay-Nonce değeri boş olamaz")]
    Empty,
    /// Nonce base64url (padding'siz) formatında değil.
    #[error("Replay-Nonce değeri base64url olarak ayrıştırılamadı: {source}")]
    InvalidBase64 {
        #[source]
        source: base64::DecodeError,
    },
    /// HTTP başlığındaki nonce UTF-8 olarak çözümlenemedi.
    #[error("Replay-Nonce HTTP başlığı UTF-8 olarak çözümlenemedi: {source}")]
    InvalidHeaderEncoding {
        #[source]
        source: ToStrError,
    },
}

/// ACME sunucuları tarafından döndürülen, base64url kodlu nonce değeri.
///
/// Her nonce en fazla bir imzalı isteğe girer; havuzdan `take` edilen değer
/// bir daha geri konmaz.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplayNonce(String);

impl ReplayNonce {
    /// Metinsel bir değerden nonce üretir ve RFC 8555'e uygunluğunu doğrular.
    ///
    /// # Errors
    ///
    /// * `NonceError::Empty` - değer yalnızca boşluklardan oluştuğunda.
    /// * `NonceError::InvalidBase64` - değer base64url olarak çözümlenemediğinde.
    pub fn parse<S: AsRef<str>>(value: S) -> Result<Self, NonceError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(NonceError::Empty);
        }

        URL_SAFE_NO_PAD
            .decode(trimmed)
            .map_err(|source| NonceError::InvalidBase64 { source })?;

        Ok(Self(trimmed.to_owned()))
    }

    /// Nonce değerini base64url kodlu metin olarak döndürür.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ReplayNonce {
    type Err = NonceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// ACME Replay-Nonce değerlerini saklayan küçük bir FIFO havuzu.
///
/// Havuz kilitsizdir; eşzamanlı erişim gereken yerlerde çağıran taraf bir
/// mutex ile sarmalar.
#[derive(Debug, Default)]
pub struct NoncePool {
    nonces: VecDeque<ReplayNonce>,
}

impl NoncePool {
    /// Havuzda tutulan en fazla nonce sayısı.
    pub const CAPACITY: usize = 16;

    /// Boş bir nonce havuzu oluşturur.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nonces: VecDeque::with_capacity(Self::CAPACITY),
        }
    }

    /// Havuzdaki nonce sayısını döndürür.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    /// Havuzun boş olup olmadığını bildirir.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }

    /// Havuza girmiş en eski nonce değerini alır.
    ///
    /// Havuz boşsa `None` döner; taze nonce edinmek transport katmanının
    /// sorumluluğundadır.
    pub fn take(&mut self) -> Option<ReplayNonce> {
        self.nonces.pop_front()
    }

    /// Yeni bir nonce değerini havuzun sonuna ekler.
    ///
    /// Daha önce eklenmiş olan değerler tekrar eklenmez; kapasite dolduğunda
    /// en eski değer düşürülür.
    pub fn put(&mut self, nonce: ReplayNonce) {
        if self.nonces.contains(&nonce) {
            return;
        }

        if self.nonces.len() == Self::CAPACITY {
            self.nonces.pop_front();
        }

        self.nonces.push_back(nonce);
    }

    /// HTTP yanıt başlıklarındaki `Replay-Nonce` değerini havuza aktarır.
    ///
    /// # Errors
    ///
    /// * `NonceError::InvalidHeaderEncoding` - başlık değeri UTF-8 değilse.
    /// * `NonceError::Empty` veya `NonceError::InvalidBase64` - nonce değeri hatalıysa.
    pub fn absorb(&mut self, headers: &HeaderMap) -> Result<Option<ReplayNonce>, NonceError> {
        let Some(value) = headers.get(REPLAY_NONCE_HEADER) else {
            return Ok(None);
        };

        let as_str = value
            .to_str()
            .map_err(|source| NonceError::InvalidHeaderEncoding { source })?;
        let nonce = ReplayNonce::parse(as_str)?;
        self.put(nonce.clone());
        Ok(Some(nonce))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn replay_nonce_accepts_base64url_value() {
        let value = "z9lqO7iAJ6T4tO4Hq8xPRA";
        let nonce = ReplayNonce::parse(value).expect("nonce parse edilmeli");
        assert_eq!(nonce.as_str(), value);
    }

    #[test]
    fn replay_nonce_rejects_padding() {
        let err = ReplayNonce::parse("z9lqO7iAJ6T4tO4Hq8xPRA==").unwrap_err();
        assert!(matches!(err, NonceError::InvalidBase64 { .. }));
    }

    #[test]
    fn replay_nonce_rejects_blank_value() {
        let err = ReplayNonce::parse("  \t").unwrap_err();
        assert!(matches!(err, NonceError::Empty));
    }

    #[test]
    fn take_returns_oldest_nonce_first() {
        let mut pool = NoncePool::new();
        pool.put(ReplayNonce::parse("AAAABBBB").unwrap());
        pool.put(ReplayNonce::parse("CCCCDDDD").unwrap());

        assert_eq!(pool.take().unwrap().as_str(), "AAAABBBB");
        assert_eq!(pool.take().unwrap().as_str(), "CCCCDDDD");
        assert!(pool.take().is_none());
    }

    #[test]
    fn put_drops_oldest_when_capacity_exceeded() {
        let mut pool = NoncePool::new();
        for i in 0..=NoncePool::CAPACITY {
            pool.put(ReplayNonce::parse(format!("nonce{i:03}")).unwrap());
        }

        assert_eq!(pool.len(), NoncePool::CAPACITY);
        assert_eq!(pool.take().unwrap().as_str(), "nonce001");
    }

    #[test]
    fn put_ignores_duplicates() {
        let mut pool = NoncePool::new();
        let nonce = ReplayNonce::parse("1234ABCD").unwrap();
        pool.put(nonce.clone());
        pool.put(nonce);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn absorb_extracts_and_stores_nonce() {
        let mut pool = NoncePool::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            REPLAY_NONCE_HEADER,
            "tN3MwZ6QslW7yA5kuQ5YPA".parse().unwrap(),
        );

        let extracted = pool
            .absorb(&headers)
            .expect("başlık okunmalı")
            .expect("nonce bulunmalı");

        assert_eq!(extracted.as_str(), "tN3MwZ6QslW7yA5kuQ5YPA");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn absorb_without_header_returns_none() {
        let mut pool = NoncePool::new();
        let headers = HeaderMap::new();
        assert!(pool.absorb(&headers).unwrap().is_none());
        assert!(pool.is_empty());
    }
}

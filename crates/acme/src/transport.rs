use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};

use http::header::{HeaderMap, CONTENT_TYPE, LOCATION, RETRY_AFTER, USER_AGENT};
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::directory::{Directory, DirectoryError};
use crate::jws::{AccountKey, JwsError, KeyBinding};
use crate::nonce::{NonceError, NoncePool, ReplayNonce, REPLAY_NONCE_HEADER};
use crate::problem::ProblemDetails;

/// İmzalı istekler için kullanılan içerik türü.
const JOSE_JSON: &str = "application/jose+json";

/// Retry-After başlığı yokken veya ayrıştırılamadığında kullanılan bekleme.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// İstek katmanı hataları.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP isteği gönderilemedi: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ACME sunucusu problem bildirdi: {0}")]
    Problem(#[from] ProblemDetails),
    #[error("istek {status} durum koduyla başarısız: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("Replay-Nonce başlığı eksik veya boş")]
    MissingNonce,
    #[error("imza anahtarı kurulmadan imzalı istek gönderilemez")]
    MissingSigner,
    #[error("directory belgesi henüz yüklenmedi")]
    MissingDirectory,
    #[error("yanıt gövdesi çözümlenemedi: {0}")]
    DecodeBody(#[from] serde_json::Error),
    #[error(transparent)]
    Nonce(#[from] NonceError),
    #[error(transparent)]
    Jws(#[from] JwsError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Başarılı bir ACME yanıtının gövde dışı bileşenleri.
#[derive(Debug, Clone)]
pub struct ResponseParts {
    pub status: StatusCode,
    pub location: Option<Url>,
    /// Polling döngülerinin kullanacağı, Retry-After başlığından türetilen bekleme.
    pub retry_after: Duration,
}

#[derive(Clone)]
struct SignerContext {
    key: Arc<AccountKey>,
    kid: Option<String>,
}

/// JWS imzalı, nonce yöneten ACME istek katmanı.
///
/// Directory GET ve newNonce HEAD istekleri imzasızdır; diğer her istek
/// RFC 8555 §6.2 uyarınca imzalı POST (veya boş gövdeli POST-as-GET) olarak
/// gönderilir. badNonce problemleri yapılandırılan bütçe kadar taze nonce
/// ile şeffafça yeniden denenir.
pub struct Transport {
    http: reqwest::Client,
    user_agent: String,
    directory_uri: Url,
    bad_nonce_retry_limit: usize,
    nonces: Mutex<NoncePool>,
    new_nonce_endpoint: RwLock<Option<Url>>,
    signer: RwLock<Option<SignerContext>>,
}

impl Transport {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        user_agent: String,
        directory_uri: Url,
        bad_nonce_retry_limit: usize,
    ) -> Self {
        Self {
            http,
            user_agent,
            directory_uri,
            bad_nonce_retry_limit: bad_nonce_retry_limit.max(1),
            nonces: Mutex::new(NoncePool::new()),
            new_nonce_endpoint: RwLock::new(None),
            signer: RwLock::new(None),
        }
    }

    /// Directory belgesini imzasız GET ile çeker ve newNonce ucunu kaydeder.
    ///
    /// # Errors
    ///
    /// İstek başarısız olursa veya belge şemaya uymazsa `TransportError` döner.
    pub async fn fetch_directory(&self) -> Result<Directory, TransportError> {
        debug!(uri = %self.directory_uri, "directory belgesi güncelleniyor");

        let response = self
            .http
            .get(self.directory_uri.clone())
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let directory = Directory::from_json_slice(&body)?;
        *self
            .new_nonce_endpoint
            .write()
            .expect("newNonce kilidi zehirlenmemeli") = Some(directory.new_nonce.clone());
        Ok(directory)
    }

    /// İmza bağlamını kurar; `kid` henüz yoksa istekler JWK ile imzalanır.
    pub fn install_account_key(&self, key: Arc<AccountKey>, kid: Option<Url>) {
        *self.signer.write().expect("signer kilidi zehirlenmemeli") = Some(SignerContext {
            key,
            kid: kid.map(String::from),
        });
    }

    /// Hesap URI'si öğrenildiğinde `kid` bağlamını günceller.
    pub fn install_account_kid(&self, kid: &Url) {
        let mut guard = self.signer.write().expect("signer kilidi zehirlenmemeli");
        if let Some(context) = guard.as_mut() {
            context.kid = Some(kid.to_string());
        }
    }

    /// İmzalı POST isteği gönderip JSON gövdeyi çözümler.
    ///
    /// # Errors
    ///
    /// İstek, problem gövdesi veya JSON çözümleme hatalarında
    /// `TransportError` döner.
    pub async fn post_json<B, R>(
        &self,
        url: &Url,
        body: Option<&B>,
    ) -> Result<(R, ResponseParts), TransportError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let (bytes, parts) = self.signed_request(url, body).await?;
        let decoded = serde_json::from_slice(&bytes)?;
        Ok((decoded, parts))
    }

    /// İmzalı POST-as-GET isteği gönderip JSON gövdeyi çözümler.
    ///
    /// # Errors
    ///
    /// İstek veya çözümleme hatalarında `TransportError` döner.
    pub async fn post_as_get_json<R>(&self, url: &Url) -> Result<(R, ResponseParts), TransportError>
    where
        R: DeserializeOwned,
    {
        self.post_json::<(), R>(url, None).await
    }

    /// İmzalı POST-as-GET ile ham gövde indirir (sertifika zinciri gibi).
    ///
    /// # Errors
    ///
    /// İstek başarısız olursa `TransportError` döner.
    pub async fn post_as_get_bytes(
        &self,
        url: &Url,
    ) -> Result<(Vec<u8>, ResponseParts), TransportError> {
        self.signed_request::<()>(url, None).await
    }

    /// Yanıt gövdesine ihtiyaç duymayan imzalı POST isteği gönderir.
    ///
    /// # Errors
    ///
    /// İstek başarısız olursa `TransportError` döner.
    pub async fn post_for_parts<B>(
        &self,
        url: &Url,
        body: Option<&B>,
    ) -> Result<ResponseParts, TransportError>
    where
        B: Serialize + ?Sized,
    {
        let (_, parts) = self.signed_request(url, body).await?;
        Ok(parts)
    }

    async fn signed_request<B>(
        &self,
        url: &Url,
        body: Option<&B>,
    ) -> Result<(Vec<u8>, ResponseParts), TransportError>
    where
        B: Serialize + ?Sized,
    {
        let payload = match body {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };

        let mut last_bad_nonce: Option<TransportError> = None;

        // Her deneme taze bir nonce tüketir; badNonce dışındaki hatalar
        // derhal yüzeye çıkar.
        for _ in 0..self.bad_nonce_retry_limit {
            let nonce = self.next_nonce().await?;
            match self.attempt(url, &payload, nonce).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    let is_bad_nonce = matches!(
                        &err,
                        TransportError::Problem(problem) if problem.is_bad_nonce()
                    );
                    if !is_bad_nonce {
                        return Err(err);
                    }
                    debug!(uri = %url, "badNonce yanıtı alındı, taze nonce ile yineleniyor");
                    last_bad_nonce = Some(err);
                }
            }
        }

        Err(last_bad_nonce.unwrap_or(TransportError::MissingNonce))
    }

    async fn attempt(
        &self,
        url: &Url,
        payload: &[u8],
        nonce: ReplayNonce,
    ) -> Result<(Vec<u8>, ResponseParts), TransportError> {
        let signer = self
            .signer
            .read()
            .expect("signer kilidi zehirlenmemeli")
            .clone()
            .ok_or(TransportError::MissingSigner)?;

        let binding = match signer.kid.as_deref() {
            Some(kid) => KeyBinding::Kid(kid),
            None => KeyBinding::Jwk,
        };
        let jws = signer.key.sign_payload(payload, &nonce, url, binding)?;

        let response = self
            .http
            .post(url.clone())
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, JOSE_JSON)
            .json(&jws)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        self.deposit_nonce(&headers)?;

        let parts = ResponseParts {
            status,
            location: parse_location(url, &headers),
            retry_after: retry_after_delay(&headers),
        };

        let body = response.bytes().await?;
        debug!(uri = %url, status = status.as_u16(), "ACME isteği tamamlandı");

        if status.is_success() {
            return Ok((body.to_vec(), parts));
        }

        if let Ok(problem) = serde_json::from_slice::<ProblemDetails>(&body) {
            return Err(TransportError::Problem(problem));
        }

        Err(status_error(status, &body))
    }

    async fn next_nonce(&self) -> Result<ReplayNonce, TransportError> {
        {
            let mut pool = self.nonces.lock().expect("nonce kilidi zehirlenmemeli");
            if let Some(nonce) = pool.take() {
                return Ok(nonce);
            }
        }

        self.fetch_nonce().await
    }

    async fn fetch_nonce(&self) -> Result<ReplayNonce, TransportError> {
        let endpoint = self
            .new_nonce_endpoint
            .read()
            .expect("newNonce kilidi zehirlenmemeli")
            .clone()
            .ok_or(TransportError::MissingDirectory)?;

        let response = self
            .http
            .head(endpoint)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?;

        let value = response
            .headers()
            .get(REPLAY_NONCE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(TransportError::MissingNonce)?;

        Ok(ReplayNonce::parse(value)?)
    }

    fn deposit_nonce(&self, headers: &HeaderMap) -> Result<(), TransportError> {
        let mut pool = self.nonces.lock().expect("nonce kilidi zehirlenmemeli");
        pool.absorb(headers)?;
        Ok(())
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> TransportError {
    TransportError::UnexpectedStatus {
        status: status.as_u16(),
        body: String::from_utf8_lossy(body).into_owned(),
    }
}

fn parse_location(base: &Url, headers: &HeaderMap) -> Option<Url> {
    let raw = headers.get(LOCATION)?.to_str().ok()?;
    base.join(raw).ok()
}

/// RFC 7231 §7.1.3 Retry-After başlığını bekleme süresine çevirir.
///
/// Tamsayı saniye veya HTTP-date kabul edilir; başlık yoksa ya da
/// ayrıştırılamazsa 1 saniyelik varsayılan döner. Geçmişte kalan bir
/// HTTP-date sıfır bekleme üretir.
#[must_use]
pub fn retry_after_delay(headers: &HeaderMap) -> Duration {
    let Some(value) = headers.get(RETRY_AFTER).and_then(|value| value.to_str().ok()) else {
        return DEFAULT_RETRY_AFTER;
    };

    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(when) = httpdate::parse_http_date(trimmed) {
        return when
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
    }

    DEFAULT_RETRY_AFTER
}

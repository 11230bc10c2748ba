use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;
use url::Url;

use crate::problem::ProblemDetails;
use crate::transport::{ResponseParts, Transport, TransportError};
use crate::wait::{VerificationWaiter, WaitError};

/// Order protokolü hataları.
#[derive(Debug, Error)]
pub enum OrderError {
    /// newOrder yanıtında Location başlığı yok.
    #[error("newOrder yanıtında Location başlığı eksik")]
    MissingLocation,
    /// Sunucu order'ı geçersiz olarak işaretledi.
    #[error("ACME order geçersiz duruma düştü: {problem}")]
    OrderFailed { problem: ProblemDetails },
    /// Polling sırasında beklenmeyen bir order durumu görüldü.
    #[error("beklenmeyen order durumu: {status:?}")]
    UnexpectedStatus { status: OrderStatus },
    /// Geçerli order sertifika URL'i içermiyor.
    #[error("geçerli order sertifika URL'i içermiyor")]
    MissingCertificateUrl,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Wait(#[from] WaitError),
}

/// ACME identifier türleri; bu çekirdek yalnızca DNS taşır.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Dns,
}

/// Sertifikalanacak özne.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: IdentifierKind,
    pub value: String,
}

impl Identifier {
    /// DNS identifier oluşturur.
    #[must_use]
    pub fn dns(value: impl Into<String>) -> Self {
        Self {
            kind: IdentifierKind::Dns,
            value: value.into(),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            IdentifierKind::Dns => write!(f, "dns:{}", self.value),
        }
    }
}

/// RFC 8555 §7.1.3 order durumları.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// newOrder istek gövdesi.
///
/// `validity` sıfır olduğunda notBefore/notAfter hiç gönderilmez; Let's
/// Encrypt bu alanları taşıyan order'ları reddeder.
#[derive(Debug, Clone, Serialize)]
pub struct NewOrder {
    pub identifiers: Vec<Identifier>,
    #[serde(
        rename = "notBefore",
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub not_before: Option<OffsetDateTime>,
    #[serde(
        rename = "notAfter",
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub not_after: Option<OffsetDateTime>,
}

/// RFC 8555 §7.1.3 order kaynağı.
#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    pub status: OrderStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires: Option<OffsetDateTime>,
    pub identifiers: Vec<Identifier>,
    #[serde(
        rename = "notBefore",
        default,
        with = "time::serde::rfc3339::option"
    )]
    pub not_before: Option<OffsetDateTime>,
    #[serde(rename = "notAfter", default, with = "time::serde::rfc3339::option")]
    pub not_after: Option<OffsetDateTime>,
    #[serde(default)]
    pub error: Option<ProblemDetails>,
    pub authorizations: Vec<Url>,
    pub finalize: Url,
    #[serde(default)]
    pub certificate: Option<Url>,
}

#[derive(Debug, Serialize)]
struct OrderFinalization {
    csr: String,
}

/// newOrder isteğini gönderir ve order URI'sini döndürür.
///
/// # Errors
///
/// İstek başarısız olursa veya yanıt Location taşımazsa `OrderError` döner.
pub async fn submit_order(
    transport: &Transport,
    new_order_endpoint: &Url,
    new_order: &NewOrder,
) -> Result<Url, OrderError> {
    debug!("order oluşturuluyor");

    let parts = transport
        .post_for_parts(new_order_endpoint, Some(new_order))
        .await?;
    parts.location.ok_or(OrderError::MissingLocation)
}

/// Order kaynağını POST-as-GET ile çeker.
///
/// # Errors
///
/// İstek veya çözümleme hatasında `OrderError` döner.
pub async fn fetch_order(
    transport: &Transport,
    uri: &Url,
) -> Result<(Order, ResponseParts), OrderError> {
    Ok(transport.post_as_get_json(uri).await?)
}

/// Order `ready` durumuna gelene kadar bekler.
///
/// Durum tablosu: pending ⇒ bekle; ready ⇒ dön; processing/valid ⇒ burada
/// beklenmeyen durum; invalid ⇒ order hatası.
///
/// # Errors
///
/// Order geçersiz düşerse, beklenmeyen duruma geçerse veya bekleme
/// kesilirse `OrderError` döner.
pub async fn wait_for_order_ready(
    transport: &Transport,
    waiter: &mut VerificationWaiter,
    uri: &Url,
) -> Result<Order, OrderError> {
    loop {
        let (order, parts) = fetch_order(transport, uri).await?;

        match order.status {
            OrderStatus::Pending => {}
            OrderStatus::Ready => return Ok(order),
            OrderStatus::Processing | OrderStatus::Valid => {
                return Err(OrderError::UnexpectedStatus {
                    status: order.status,
                });
            }
            OrderStatus::Invalid => return Err(order_failure(order)),
        }

        waiter.pause(parts.retry_after).await?;
    }
}

/// Order `valid` durumuna gelene kadar bekler.
///
/// Durum tablosu: pending ⇒ beklenmeyen durum; ready/processing ⇒ bekle;
/// valid ⇒ dön; invalid ⇒ order hatası.
///
/// # Errors
///
/// Order geçersiz düşerse, beklenmeyen duruma geçerse veya bekleme
/// kesilirse `OrderError` döner.
pub async fn wait_for_order_valid(
    transport: &Transport,
    waiter: &mut VerificationWaiter,
    uri: &Url,
) -> Result<Order, OrderError> {
    loop {
        let (order, parts) = fetch_order(transport, uri).await?;

        match order.status {
            OrderStatus::Pending => {
                return Err(OrderError::UnexpectedStatus {
                    status: order.status,
                });
            }
            OrderStatus::Ready | OrderStatus::Processing => {}
            OrderStatus::Valid => return Ok(order),
            OrderStatus::Invalid => return Err(order_failure(order)),
        }

        waiter.pause(parts.retry_after).await?;
    }
}

/// Order'ı DER kodlu CSR ile sonlandırır.
///
/// CSR gövdede base64url (padding'siz) olarak taşınır.
///
/// # Errors
///
/// İstek başarısız olursa `OrderError` döner.
pub async fn finalize_order(
    transport: &Transport,
    finalize_uri: &Url,
    csr_der: &[u8],
) -> Result<Order, OrderError> {
    let payload = OrderFinalization {
        csr: URL_SAFE_NO_PAD.encode(csr_der),
    };

    let (order, _) = transport.post_json(finalize_uri, Some(&payload)).await?;
    Ok(order)
}

/// Sertifika zincirini ham PEM gövdesi olarak indirir.
///
/// # Errors
///
/// İstek başarısız olursa `OrderError` döner.
pub async fn download_certificate(
    transport: &Transport,
    certificate_uri: &Url,
) -> Result<Vec<u8>, OrderError> {
    debug!(uri = %certificate_uri, "sertifika indiriliyor");

    let (body, _) = transport.post_as_get_bytes(certificate_uri).await?;
    Ok(body)
}

fn order_failure(order: Order) -> OrderError {
    OrderError::OrderFailed {
        problem: order.error.unwrap_or_default(),
    }
}

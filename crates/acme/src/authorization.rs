use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;
use url::Url;

use crate::order::Identifier;
use crate::problem::ProblemDetails;
use crate::transport::{ResponseParts, Transport, TransportError};
use crate::wait::{VerificationWaiter, WaitError};

/// Yetkilendirme ve challenge akışı hataları.
#[derive(Debug, Error)]
pub enum AuthorizationError {
    /// Yetkilendirme kalıcı bir hata durumuna düştü.
    #[error("yetkilendirme {status:?} durumuna düştü")]
    AuthorizationFailed { status: AuthorizationStatus },
    /// Challenge sunucu tarafında geçersiz sayıldı.
    #[error("challenge geçersiz sayıldı: {problem}")]
    ChallengeFailed { problem: ProblemDetails },
    /// Yetkilendirme desteklenen bir challenge içermiyor.
    #[error("desteklenen challenge bulunamadı")]
    NoSupportedChallenge,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Wait(#[from] WaitError),
}

/// RFC 8555 §7.1.4 yetkilendirme durumları.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// RFC 8555 §8 challenge durumları.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// Desteklenen challenge türleri.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Http01,
    Dns01,
}

/// Challenge'ın türe bağlı verisi; `type` alanına göre ayrıştırılır.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeData {
    Http01 { token: String },
    Dns01 { token: String },
    /// Tanınmayan challenge türleri seçime kapalı olarak korunur.
    Unknown { kind: String },
}

/// Tek bir doğrulama mekanizması.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawChallenge")]
pub struct Challenge {
    pub url: Url,
    pub status: ChallengeStatus,
    pub validated: Option<OffsetDateTime>,
    pub error: Option<ProblemDetails>,
    pub data: ChallengeData,
}

impl Challenge {
    /// Challenge türünü döndürür; tanınmayan türler `None` üretir.
    #[must_use]
    pub fn kind(&self) -> Option<ChallengeKind> {
        match &self.data {
            ChallengeData::Http01 { .. } => Some(ChallengeKind::Http01),
            ChallengeData::Dns01 { .. } => Some(ChallengeKind::Dns01),
            ChallengeData::Unknown { .. } => None,
        }
    }

    /// Challenge token'ını döndürür.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match &self.data {
            ChallengeData::Http01 { token } | ChallengeData::Dns01 { token } => Some(token),
            ChallengeData::Unknown { .. } => None,
        }
    }
}

#[derive(Deserialize)]
struct RawChallenge {
    #[serde(rename = "type")]
    kind: String,
    url: Url,
    status: ChallengeStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    validated: Option<OffsetDateTime>,
    #[serde(default)]
    error: Option<ProblemDetails>,
    #[serde(default)]
    token: Option<String>,
}

impl TryFrom<RawChallenge> for Challenge {
    type Error = String;

    fn try_from(raw: RawChallenge) -> Result<Self, Self::Error> {
        let data = match raw.kind.as_str() {
            "http-01" => ChallengeData::Http01 {
                token: raw
                    .token
                    .ok_or_else(|| "http-01 challenge token taşımalı".to_owned())?,
            },
            "dns-01" => ChallengeData::Dns01 {
                token: raw
                    .token
                    .ok_or_else(|| "dns-01 challenge token taşımalı".to_owned())?,
            },
            other => ChallengeData::Unknown {
                kind: other.to_owned(),
            },
        };

        Ok(Self {
            url: raw.url,
            status: raw.status,
            validated: raw.validated,
            error: raw.error,
            data,
        })
    }
}

/// RFC 8555 §7.1.4 yetkilendirme kaynağı.
#[derive(Debug, Clone, Deserialize)]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires: Option<OffsetDateTime>,
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub wildcard: bool,
}

impl Authorization {
    fn find_challenge(&self, kind: ChallengeKind) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|challenge| challenge.kind() == Some(kind))
    }
}

/// Yetkilendirme için kullanılacak challenge'ı seçer.
///
/// HTTP-01 responder çalışıyorsa HTTP-01 tercih edilir; yoksa DNS-01
/// aranır. Hiçbiri bulunamazsa `None` döner.
#[must_use]
pub fn select_challenge(auth: &Authorization, http01_available: bool) -> Option<&Challenge> {
    if http01_available {
        if let Some(challenge) = auth.find_challenge(ChallengeKind::Http01) {
            return Some(challenge);
        }
    }

    auth.find_challenge(ChallengeKind::Dns01)
}

/// Yetkilendirme kaynağını POST-as-GET ile çeker.
///
/// # Errors
///
/// İstek veya çözümleme hatasında `AuthorizationError` döner.
pub async fn fetch_authorization(
    transport: &Transport,
    uri: &Url,
) -> Result<(Authorization, ResponseParts), AuthorizationError> {
    Ok(transport.post_as_get_json(uri).await?)
}

/// Challenge kaynağını POST-as-GET ile çeker.
///
/// # Errors
///
/// İstek veya çözümleme hatasında `AuthorizationError` döner.
pub async fn fetch_challenge(
    transport: &Transport,
    uri: &Url,
) -> Result<(Challenge, ResponseParts), AuthorizationError> {
    Ok(transport.post_as_get_json(uri).await?)
}

#[derive(Serialize)]
struct EmptyPayload {}

/// Challenge'ı doğrulamaya hazır olarak bildirir.
///
/// RFC 8555 §7.5.1: istek gövdesi boş bir JSON objesidir.
///
/// # Errors
///
/// İstek başarısız olursa `AuthorizationError` döner.
pub async fn submit_challenge(transport: &Transport, uri: &Url) -> Result<(), AuthorizationError> {
    transport
        .post_for_parts(uri, Some(&EmptyPayload {}))
        .await?;
    Ok(())
}

/// Yetkilendirme `valid` durumuna gelene kadar bekler.
///
/// Durum tablosu: pending ⇒ bekle; valid ⇒ dön;
/// invalid/deactivated/expired/revoked ⇒ hata.
///
/// # Errors
///
/// Yetkilendirme kalıcı hata durumuna düşerse veya bekleme kesilirse
/// `AuthorizationError` döner.
pub async fn wait_for_authorization_valid(
    transport: &Transport,
    waiter: &mut VerificationWaiter,
    uri: &Url,
) -> Result<(), AuthorizationError> {
    loop {
        let (auth, parts) = fetch_authorization(transport, uri).await?;

        match auth.status {
            AuthorizationStatus::Pending => {}
            AuthorizationStatus::Valid => return Ok(()),
            AuthorizationStatus::Invalid
            | AuthorizationStatus::Deactivated
            | AuthorizationStatus::Expired
            | AuthorizationStatus::Revoked => {
                return Err(AuthorizationError::AuthorizationFailed {
                    status: auth.status,
                });
            }
        }

        waiter.pause(parts.retry_after).await?;
    }
}

/// Challenge `valid` durumuna gelene kadar bekler.
///
/// Durum tablosu: pending/processing ⇒ bekle; valid ⇒ dön; invalid ⇒ hata.
///
/// # Errors
///
/// Challenge geçersiz sayılırsa veya bekleme kesilirse
/// `AuthorizationError` döner.
pub async fn wait_for_challenge_valid(
    transport: &Transport,
    waiter: &mut VerificationWaiter,
    uri: &Url,
) -> Result<(), AuthorizationError> {
    loop {
        let (challenge, parts) = fetch_challenge(transport, uri).await?;

        match challenge.status {
            ChallengeStatus::Pending | ChallengeStatus::Processing => {}
            ChallengeStatus::Valid => {
                debug!(uri = %uri, "challenge doğrulandı");
                return Ok(());
            }
            ChallengeStatus::Invalid => {
                return Err(AuthorizationError::ChallengeFailed {
                    problem: challenge.error.unwrap_or_default(),
                });
            }
        }

        waiter.pause(parts.retry_after).await?;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_authorization(json: &str) -> Authorization {
        serde_json::from_str(json).expect("yetkilendirme ayrıştırılmalı")
    }

    const AUTHORIZATION_WITH_BOTH: &str = r#"{
        "identifier": {"type": "dns", "value": "example.com"},
        "status": "pending",
        "expires": "2024-05-08T12:00:00Z",
        "challenges": [
            {
                "type": "dns-01",
                "url": "https://acme.example/chall/dns",
                "status": "pending",
                "token": "dns-token"
            },
            {
                "type": "http-01",
                "url": "https://acme.example/chall/http",
                "status": "pending",
                "token": "http-token"
            },
            {
                "type": "tls-alpn-01",
                "url": "https://acme.example/chall/alpn",
                "status": "pending",
                "token": "alpn-token"
            }
        ]
    }"#;

    #[test]
    fn challenge_data_dispatches_on_type_field() {
        let auth = sample_authorization(AUTHORIZATION_WITH_BOTH);

        assert_eq!(auth.challenges.len(), 3);
        assert_eq!(auth.challenges[0].kind(), Some(ChallengeKind::Dns01));
        assert_eq!(auth.challenges[0].token(), Some("dns-token"));
        assert_eq!(auth.challenges[1].kind(), Some(ChallengeKind::Http01));
        assert_eq!(auth.challenges[2].kind(), None);
        assert_eq!(auth.challenges[2].token(), None);
    }

    #[test]
    fn http01_challenge_without_token_is_rejected() {
        let result = serde_json::from_str::<Challenge>(
            r#"{
                "type": "http-01",
                "url": "https://acme.example/chall/http",
                "status": "pending"
            }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn selection_prefers_http01_when_responder_runs() {
        let auth = sample_authorization(AUTHORIZATION_WITH_BOTH);
        let selected = select_challenge(&auth, true).expect("challenge seçilmeli");
        assert_eq!(selected.kind(), Some(ChallengeKind::Http01));
    }

    #[test]
    fn selection_falls_back_to_dns01_without_responder() {
        let auth = sample_authorization(AUTHORIZATION_WITH_BOTH);
        let selected = select_challenge(&auth, false).expect("challenge seçilmeli");
        assert_eq!(selected.kind(), Some(ChallengeKind::Dns01));
    }

    #[test]
    fn selection_returns_none_for_unknown_types_only() {
        let auth = sample_authorization(
            r#"{
                "identifier": {"type": "dns", "value": "example.com"},
                "status": "pending",
                "challenges": [
                    {
                        "type": "tls-alpn-01",
                        "url": "https://acme.example/chall/alpn",
                        "status": "pending",
                        "token": "alpn-token"
                    }
                ]
            }"#,
        );
        assert!(select_challenge(&auth, true).is_none());
    }

    #[test]
    fn wildcard_defaults_to_false() {
        let auth = sample_authorization(AUTHORIZATION_WITH_BOTH);
        assert!(!auth.wildcard);
    }

    #[test]
    fn validated_timestamp_is_parsed() {
        let challenge: Challenge = serde_json::from_str(
            r#"{
                "type": "http-01",
                "url": "https://acme.example/chall/http",
                "status": "valid",
                "validated": "2024-05-01T10:30:00Z",
                "token": "tkn"
            }"#,
        )
        .unwrap();
        assert_eq!(challenge.status, ChallengeStatus::Valid);
        assert!(challenge.validated.is_some());
    }
}

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::Error as DeError;
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::directory::Directory;
use crate::jws::{AccountKey, JwsError};
use crate::transport::{Transport, TransportError};

/// Hesap oluşturma ve iletişim bilgisi hataları.
#[derive(Debug, Error)]
pub enum AccountError {
    /// İletişim URI'si ayrıştırılamadı.
    #[error("hesap iletişim URI'si ayrıştırılamadı: {value}")]
    InvalidContactUri {
        value: String,
        #[source]
        source: url::ParseError,
    },
    /// Desteklenmeyen iletişim şeması kullanıldı.
    #[error("hesap iletişim URI şeması desteklenmiyor: {scheme}")]
    UnsupportedContactScheme { scheme: String },
    /// E-posta adresi doğrulaması başarısız oldu.
    #[error("hesap e-posta adresi geçersiz: {value}")]
    InvalidEmail { value: String },
    /// newAccount yanıtında Location başlığı yok.
    #[error("newAccount yanıtında Location başlığı eksik")]
    MissingLocation,
    #[error(transparent)]
    Jws(#[from] JwsError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// ACME hesabı için doğrulanmış iletişim bilgisi.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountContact {
    uri: String,
}

impl AccountContact {
    /// Genel URI girdisinden iletişim bilgisi oluşturur.
    ///
    /// `mailto:` adresleri normalize edilir; diğer şemalar reddedilir.
    ///
    /// # Errors
    ///
    /// URI ayrıştırılamazsa veya desteklenmeyen şemaya sahipse
    /// `AccountError` döndürülür.
    pub fn from_uri(value: &str) -> Result<Self, AccountError> {
        let trimmed = value.trim();
        let url = Url::parse(trimmed).map_err(|source| AccountError::InvalidContactUri {
            value: trimmed.to_owned(),
            source,
        })?;

        match url.scheme() {
            "mailto" => {
                let normalized = normalize_email(url.path())?;
                Ok(Self {
                    uri: format!("mailto:{normalized}"),
                })
            }
            other => Err(AccountError::UnsupportedContactScheme {
                scheme: other.to_owned(),
            }),
        }
    }

    /// E-posta adresinden iletişim girdisi oluşturur.
    ///
    /// # Errors
    ///
    /// E-posta değeri doğrulamadan geçmezse `AccountError` döndürülür.
    pub fn email(address: &str) -> Result<Self, AccountError> {
        let normalized = normalize_email(address)?;
        Ok(Self {
            uri: format!("mailto:{normalized}"),
        })
    }

    /// URI değerini döndürür.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl Serialize for AccountContact {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.uri)
    }
}

fn normalize_email(address: &str) -> Result<String, AccountError> {
    let trimmed = address.trim();
    let invalid = || AccountError::InvalidEmail {
        value: trimmed.to_owned(),
    };

    let (local, domain) = trimmed.rsplit_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.is_empty() || local.contains(char::is_whitespace) {
        return Err(invalid());
    }

    let ascii_domain = idna::domain_to_ascii(domain).map_err(|_| invalid())?;
    Ok(format!("{local}@{ascii_domain}"))
}

/// ACME hesabının kalıcı durumu: hesap URI'si ve imza anahtarı.
///
/// Veri deposuna bir kez yazılır ve sonrasında değişmez; anahtar,
/// sertifika işçileri arasında `Arc` ile paylaşılır.
#[derive(Clone)]
pub struct AccountData {
    pub uri: Url,
    pub key: Arc<AccountKey>,
}

impl fmt::Debug for AccountData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountData")
            .field("uri", &self.uri.as_str())
            .finish_non_exhaustive()
    }
}

impl AccountData {
    /// Hesap thumbprint'ini döndürür (RFC 7638).
    #[must_use]
    pub fn thumbprint(&self) -> String {
        self.key.thumbprint()
    }
}

#[derive(Serialize, Deserialize)]
struct RawAccountData {
    uri: Url,
    private_key_data: String,
}

impl Serialize for AccountData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let der = self.key.to_pkcs8_der().map_err(S::Error::custom)?;
        RawAccountData {
            uri: self.uri.clone(),
            private_key_data: STANDARD.encode(der.as_slice()),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AccountData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawAccountData::deserialize(deserializer)?;
        let der = STANDARD
            .decode(&raw.private_key_data)
            .map_err(D::Error::custom)?;
        let key = AccountKey::from_pkcs8_der(&der).map_err(D::Error::custom)?;
        Ok(Self {
            uri: raw.uri,
            key: Arc::new(key),
        })
    }
}

/// RFC 8555 §7.3 newAccount istek gövdesi.
#[derive(Debug, Serialize)]
struct NewAccountPayload<'a> {
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    contact: &'a [AccountContact],
    #[serde(rename = "termsOfServiceAgreed")]
    terms_of_service_agreed: bool,
}

/// Yeni bir ACME hesabı açar ve hesap verisini döndürür.
///
/// Anahtar çağıran tarafça üretilmiş olmalıdır; bu fonksiyon anahtarı
/// transport'a JWK bağlamıyla kurar, `newAccount` isteğini gönderir ve
/// dönen `Location` başlığını hesap URI'si olarak kaydeder.
///
/// # Errors
///
/// İstek başarısız olursa veya yanıt Location içermezse `AccountError` döner.
pub async fn create_account(
    transport: &Transport,
    directory: &Directory,
    key: Arc<AccountKey>,
    contacts: &[AccountContact],
) -> Result<AccountData, AccountError> {
    debug!("ACME hesabı oluşturuluyor");

    transport.install_account_key(Arc::clone(&key), None);

    let payload = NewAccountPayload {
        contact: contacts,
        terms_of_service_agreed: true,
    };

    let parts = transport
        .post_for_parts(&directory.new_account, Some(&payload))
        .await?;

    let uri = parts.location.ok_or(AccountError::MissingLocation)?;
    transport.install_account_kid(&uri);

    Ok(AccountData { uri, key })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn contact_normalizes_mailto_uri() {
        let contact = AccountContact::from_uri("mailto:Ops@Example.COM ").unwrap();
        assert_eq!(contact.uri(), "mailto:Ops@example.com");
    }

    #[test]
    fn contact_accepts_plain_email() {
        let contact = AccountContact::email("sertifika@örnek.com").unwrap();
        assert_eq!(contact.uri(), "mailto:sertifika@xn--rnek-4qa.com");
    }

    #[test]
    fn contact_rejects_unsupported_scheme() {
        let err = AccountContact::from_uri("https://example.com/contact").unwrap_err();
        assert!(matches!(
            err,
            AccountError::UnsupportedContactScheme { scheme } if scheme == "https"
        ));
    }

    #[test]
    fn contact_rejects_address_without_domain() {
        let err = AccountContact::email("sertifika@").unwrap_err();
        assert!(matches!(err, AccountError::InvalidEmail { .. }));
    }

    #[test]
    fn account_data_round_trips_through_json() {
        let account = AccountData {
            uri: Url::parse("https://acme.example/acct/7").unwrap(),
            key: Arc::new(AccountKey::generate_p256()),
        };

        let encoded = serde_json::to_string(&account).expect("hesap serileştirilmeli");
        let decoded: AccountData = serde_json::from_str(&encoded).expect("hesap çözümlenmeli");

        assert_eq!(decoded.uri, account.uri);
        assert_eq!(decoded.thumbprint(), account.thumbprint());
    }

    #[test]
    fn account_json_embeds_base64_pkcs8() {
        let account = AccountData {
            uri: Url::parse("https://acme.example/acct/7").unwrap(),
            key: Arc::new(AccountKey::generate_p256()),
        };

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&account).unwrap()).unwrap();
        assert_eq!(value["uri"], "https://acme.example/acct/7");
        let field = value["private_key_data"].as_str().expect("alan string olmalı");
        let der = STANDARD.decode(field).expect("base64 çözülmeli");
        AccountKey::from_pkcs8_der(&der).expect("PKCS#8 anahtar çözümlenmeli");
    }

    #[test]
    fn new_account_payload_omits_empty_contact_list() {
        let payload = NewAccountPayload {
            contact: &[],
            terms_of_service_agreed: true,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("contact").is_none());
        assert_eq!(json["termsOfServiceAgreed"], true);
    }
}

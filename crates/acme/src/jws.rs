use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use p256::ecdsa::SigningKey as P256SigningKey;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use p384::ecdsa::SigningKey as P384SigningKey;
use rand_core::OsRng;
use rsa::pkcs1v15::SigningKey as RsaSigningKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::Serialize;
use sha2::{Digest, Sha256};
use signature::{SignatureEncoding, Signer};
use thiserror::Error;
use url::Url;
use zeroize::Zeroizing;

use crate::nonce::ReplayNonce;

/// ACME JWS üretimi sırasında oluşabilecek hatalar.
#[derive(Debug, Error)]
pub enum JwsError {
    /// `kid` bağlamı boş bırakıldığında döner.
    #[error("ACME kid değeri boş olamaz")]
    EmptyKid,
    /// JSON yükü serileştirilirken hata meydana geldiğinde döner.
    #[error("ACME JWS yükü serileştirilemedi: {0}")]
    SerializePayload(#[from] serde_json::Error),
    /// PKCS#8 verisi desteklenen bir anahtar türüne çözümlenemedi.
    #[error("hesap anahtarı PKCS#8 verisinden çözümlenemedi: desteklenmeyen anahtar türü")]
    UnsupportedKey,
    /// Anahtar PKCS#8 olarak serileştirilemedi.
    #[error("hesap anahtarı PKCS#8 olarak serileştirilemedi: {0}")]
    EncodeKey(#[from] p256::pkcs8::Error),
    /// RSA anahtar üretimi başarısız oldu.
    #[error("RSA anahtarı üretilemedi: {0}")]
    GenerateRsa(#[from] rsa::Error),
    /// İmza üretimi sırasında hata oluştu.
    #[error("ACME JWS imzası üretilemedi: {0}")]
    Signature(#[from] signature::Error),
}

/// İmzalanmış ACME JWS çıktısı (Flattened JSON Serialization).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcmeJws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

/// JWS başlığında kullanılacak anahtar referansı türü.
///
/// RFC 8555 §6.2: `kid` ve `jwk` alanlarından tam olarak biri bulunur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyBinding<'a> {
    /// Mevcut bir ACME hesabının `kid` değerini kullanır.
    Kid(&'a str),
    /// Yeni hesap kayıtlarında olduğu gibi JWK içerir.
    Jwk,
}

/// Hesap anahtarının açık bileşeni, JWK formatında.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Jwk {
    /// Eliptik eğri anahtarı (P-256 veya P-384).
    Ec {
        kty: String,
        crv: String,
        x: String,
        y: String,
    },
    /// RSA anahtarı.
    Rsa { kty: String, n: String, e: String },
}

impl Jwk {
    /// RFC 7638 thumbprint'i: sözlük sıralı kanonik JWK üzerinden SHA-256,
    /// base64url kodlu.
    #[must_use]
    pub fn thumbprint(&self) -> String {
        let canonical = match self {
            Self::Ec { kty, crv, x, y } => {
                format!(r#"{{"crv":"{crv}","kty":"{kty}","x":"{x}","y":"{y}"}}"#)
            }
            Self::Rsa { kty, n, e } => {
                format!(r#"{{"e":"{e}","kty":"{kty}","n":"{n}"}}"#)
            }
        };
        let digest = Sha256::digest(canonical.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }
}

/// ACME hesabını temsil eden imza anahtarı.
///
/// İmza algoritması anahtar türünden türetilir: RSA anahtarları RS256,
/// ECDSA P-256 anahtarları ES256, P-384 anahtarları ES384 üretir. Başka bir
/// anahtar türü PKCS#8 verisinden kabul edilmez.
#[derive(Clone)]
pub enum AccountKey {
    EcdsaP256(P256SigningKey),
    EcdsaP384(P384SigningKey),
    Rsa(RsaPrivateKey),
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EcdsaP256(_) => "AccountKey::EcdsaP256",
            Self::EcdsaP384(_) => "AccountKey::EcdsaP384",
            Self::Rsa(_) => "AccountKey::Rsa",
        };
        f.debug_struct(name).finish_non_exhaustive()
    }
}

impl AccountKey {
    /// Varsayılan hesap anahtarı üretir (ECDSA P-256).
    #[must_use]
    pub fn generate_p256() -> Self {
        Self::EcdsaP256(P256SigningKey::random(&mut OsRng))
    }

    /// ECDSA P-384 hesap anahtarı üretir.
    #[must_use]
    pub fn generate_p384() -> Self {
        Self::EcdsaP384(P384SigningKey::random(&mut OsRng))
    }

    /// RSA hesap anahtarı üretir.
    ///
    /// # Errors
    ///
    /// Anahtar üretimi başarısız olursa `JwsError::GenerateRsa` döner.
    pub fn generate_rsa(bits: usize) -> Result<Self, JwsError> {
        Ok(Self::Rsa(RsaPrivateKey::new(&mut OsRng, bits)?))
    }

    /// PKCS#8 DER verisinden hesap anahtarı çözümler.
    ///
    /// Desteklenen türler sırayla denenir; hiçbiri eşleşmezse anahtar türü
    /// desteklenmiyor demektir.
    ///
    /// # Errors
    ///
    /// Veri P-256, P-384 veya RSA anahtarına çözümlenemezse
    /// `JwsError::UnsupportedKey` döner.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, JwsError> {
        if let Ok(key) = P256SigningKey::from_pkcs8_der(der) {
            return Ok(Self::EcdsaP256(key));
        }
        if let Ok(key) = P384SigningKey::from_pkcs8_der(der) {
            return Ok(Self::EcdsaP384(key));
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs8_der(der) {
            return Ok(Self::Rsa(key));
        }
        Err(JwsError::UnsupportedKey)
    }

    /// Anahtarı PKCS#8 DER olarak serileştirir.
    ///
    /// # Errors
    ///
    /// Serileştirme başarısız olursa `JwsError::EncodeKey` döner.
    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, JwsError> {
        let document = match self {
            Self::EcdsaP256(key) => key.to_pkcs8_der()?,
            Self::EcdsaP384(key) => key.to_pkcs8_der()?,
            Self::Rsa(key) => key.to_pkcs8_der()?,
        };
        Ok(Zeroizing::new(document.as_bytes().to_vec()))
    }

    /// ACME JWS başlığında kullanılacak algoritma adını döndürür.
    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::EcdsaP256(_) => "ES256",
            Self::EcdsaP384(_) => "ES384",
            Self::Rsa(_) => "RS256",
        }
    }

    /// Açık anahtarı JWK formatında döndürür.
    #[must_use]
    pub fn jwk(&self) -> Jwk {
        match self {
            Self::EcdsaP256(key) => {
                let point = key.verifying_key().to_encoded_point(false);
                Jwk::Ec {
                    kty: "EC".to_owned(),
                    crv: "P-256".to_owned(),
                    x: URL_SAFE_NO_PAD.encode(point.x().expect("P-256 noktası x içermeli")),
                    y: URL_SAFE_NO_PAD.encode(point.y().expect("P-256 noktası y içermeli")),
                }
            }
            Self::EcdsaP384(key) => {
                let point = key.verifying_key().to_encoded_point(false);
                Jwk::Ec {
                    kty: "EC".to_owned(),
                    crv: "P-384".to_owned(),
                    x: URL_SAFE_NO_PAD.encode(point.x().expect("P-384 noktası x içermeli")),
                    y: URL_SAFE_NO_PAD.encode(point.y().expect("P-384 noktası y içermeli")),
                }
            }
            Self::Rsa(key) => {
                let public = key.to_public_key();
                Jwk::Rsa {
                    kty: "RSA".to_owned(),
                    n: URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
                    e: URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
                }
            }
        }
    }

    /// Hesap thumbprint'ini döndürür (RFC 7638).
    #[must_use]
    pub fn thumbprint(&self) -> String {
        self.jwk().thumbprint()
    }

    /// Ham payload byte dizisini imzalayıp ACME JWS çıktısı üretir.
    ///
    /// Boş payload POST-as-GET isteklerine karşılık gelir ve boş string
    /// olarak kodlanır.
    ///
    /// # Errors
    ///
    /// * `JwsError::EmptyKid` - `KeyBinding::Kid` boş değer taşıyorsa.
    /// * `JwsError::SerializePayload` - korumalı başlık serileştirilemezse.
    /// * `JwsError::Signature` - imza üretimi başarısız olursa.
    pub fn sign_payload(
        &self,
        payload: &[u8],
        nonce: &ReplayNonce,
        url: &Url,
        binding: KeyBinding<'_>,
    ) -> Result<AcmeJws, JwsError> {
        let (kid, jwk) = match binding {
            KeyBinding::Kid(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(JwsError::EmptyKid);
                }
                (Some(trimmed.to_owned()), None)
            }
            KeyBinding::Jwk => (None, Some(self.jwk())),
        };

        let header = ProtectedHeader {
            alg: self.algorithm(),
            nonce: nonce.as_str().to_owned(),
            url: url.as_str().to_owned(),
            kid,
            jwk,
        };

        let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let signing_input = format!("{protected}.{payload}");
        let signature = self.sign_raw(signing_input.as_bytes())?;

        Ok(AcmeJws {
            protected,
            payload,
            signature: URL_SAFE_NO_PAD.encode(signature),
        })
    }

    /// JSON seri hale getirilebilir payload'ı ACME JWS olarak imzalar.
    ///
    /// # Errors
    ///
    /// JSON serileştirme veya imza üretimi başarısız olursa `JwsError` döner.
    pub fn sign_json<T: Serialize>(
        &self,
        payload: &T,
        nonce: &ReplayNonce,
        url: &Url,
        binding: KeyBinding<'_>,
    ) -> Result<AcmeJws, JwsError> {
        let bytes = serde_json::to_vec(payload)?;
        self.sign_payload(&bytes, nonce, url, binding)
    }

    fn sign_raw(&self, signing_input: &[u8]) -> Result<Vec<u8>, JwsError> {
        match self {
            Self::EcdsaP256(key) => {
                let signature: p256::ecdsa::Signature = key.try_sign(signing_input)?;
                Ok(signature.to_bytes().to_vec())
            }
            Self::EcdsaP384(key) => {
                let signature: p384::ecdsa::Signature = key.try_sign(signing_input)?;
                Ok(signature.to_bytes().to_vec())
            }
            Self::Rsa(key) => {
                let signing_key = RsaSigningKey::<Sha256>::new(key.clone());
                let signature = signing_key.try_sign(signing_input)?;
                Ok(signature.to_bytes().into_vec())
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ProtectedHeader {
    alg: &'static str,
    nonce: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
}

#[cfg(test)]
mod tests {
    use p256::ecdsa::signature::Verifier;
    use pretty_assertions::assert_eq;
    use rand_chacha::{rand_core::SeedableRng, ChaCha20Rng};
    use serde_json::json;

    use super::*;

    fn sample_p256_key() -> AccountKey {
        let secret = p256::SecretKey::from_slice(&[7_u8; 32]).expect("geçerli p256 anahtarı");
        AccountKey::EcdsaP256(P256SigningKey::from(secret))
    }

    fn sample_rsa_key() -> AccountKey {
        let mut rng = ChaCha20Rng::from_seed([11_u8; 32]);
        AccountKey::Rsa(RsaPrivateKey::new(&mut rng, 1024).expect("rsa anahtarı üretimi"))
    }

    fn sample_nonce() -> ReplayNonce {
        ReplayNonce::parse("z9lqO7iAJ6T4tO4Hq8xPRA").expect("nonce parse edilmeli")
    }

    fn sample_url() -> Url {
        Url::parse("https://acme.example/new-account").unwrap()
    }

    fn decode_protected(jws: &AcmeJws) -> serde_json::Value {
        let bytes = URL_SAFE_NO_PAD
            .decode(jws.protected.as_bytes())
            .expect("protected decode");
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn p256_sign_payload_with_jwk_binding() {
        let key = sample_p256_key();
        let payload = br#"{"termsOfServiceAgreed":true}"#;
        let signed = key
            .sign_payload(payload, &sample_nonce(), &sample_url(), KeyBinding::Jwk)
            .expect("jws üretimi");

        let protected = decode_protected(&signed);
        assert_eq!(protected["alg"], "ES256");
        assert_eq!(protected["nonce"], sample_nonce().as_str());
        assert_eq!(protected["url"], sample_url().as_str());
        assert!(protected.get("kid").is_none());

        let jwk = protected["jwk"].as_object().expect("jwk nesnesi");
        assert_eq!(jwk["kty"], "EC");
        assert_eq!(jwk["crv"], "P-256");

        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signed.signature.as_bytes())
            .expect("signature decode");
        assert_eq!(signature_bytes.len(), 64);
        let signature =
            p256::ecdsa::Signature::from_slice(&signature_bytes).expect("imza ayrıştırılmalı");
        let signing_input = format!("{}.{}", signed.protected, signed.payload);
        let AccountKey::EcdsaP256(signing_key) = &key else {
            unreachable!()
        };
        signing_key
            .verifying_key()
            .verify(signing_input.as_bytes(), &signature)
            .expect("imza doğrulama");
    }

    #[test]
    fn kid_binding_omits_jwk() {
        let key = sample_p256_key();
        let kid = "https://acme.example/acct/123";
        let signed = key
            .sign_payload(b"{}", &sample_nonce(), &sample_url(), KeyBinding::Kid(kid))
            .expect("jws üretimi");

        let protected = decode_protected(&signed);
        assert_eq!(protected["kid"], kid);
        assert!(protected.get("jwk").is_none());
    }

    #[test]
    fn empty_kid_rejected() {
        let key = sample_p256_key();
        let err = key
            .sign_payload(
                b"{}",
                &sample_nonce(),
                &sample_url(),
                KeyBinding::Kid(" \t"),
            )
            .unwrap_err();
        assert!(matches!(err, JwsError::EmptyKid));
    }

    #[test]
    fn empty_payload_encodes_as_empty_string() {
        let key = sample_p256_key();
        let signed = key
            .sign_payload(
                &[],
                &sample_nonce(),
                &sample_url(),
                KeyBinding::Kid("https://acme.example/acct/1"),
            )
            .expect("jws üretimi");
        assert_eq!(signed.payload, "");
    }

    #[test]
    fn sign_json_serializes_payload() {
        let key = sample_p256_key();
        let payload = json!({"status": "deactivated"});
        let signed = key
            .sign_json(&payload, &sample_nonce(), &sample_url(), KeyBinding::Jwk)
            .expect("jws üretimi");

        let decoded = URL_SAFE_NO_PAD
            .decode(signed.payload.as_bytes())
            .expect("payload decode");
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value, payload);
    }

    #[test]
    fn rsa_key_uses_rs256() {
        let key = sample_rsa_key();
        assert_eq!(key.algorithm(), "RS256");

        let signed = key
            .sign_payload(b"{}", &sample_nonce(), &sample_url(), KeyBinding::Jwk)
            .expect("rsa jws üretimi");
        let protected = decode_protected(&signed);
        assert_eq!(protected["alg"], "RS256");
        let jwk = protected["jwk"].as_object().expect("jwk nesnesi");
        assert_eq!(jwk["kty"], "RSA");
    }

    #[test]
    fn p384_key_uses_es384() {
        let key = AccountKey::generate_p384();
        assert_eq!(key.algorithm(), "ES384");
    }

    #[test]
    fn pkcs8_round_trip_preserves_key() {
        for key in [sample_p256_key(), AccountKey::generate_p384()] {
            let der = key.to_pkcs8_der().expect("pkcs8 serileştirme");
            let restored = AccountKey::from_pkcs8_der(&der).expect("pkcs8 çözümleme");
            assert_eq!(key.algorithm(), restored.algorithm());
            assert_eq!(key.thumbprint(), restored.thumbprint());
        }
    }

    #[test]
    fn pkcs8_rejects_unsupported_key_material() {
        let err = AccountKey::from_pkcs8_der(&[0x30, 0x03, 0x02, 0x01, 0x00]).unwrap_err();
        assert!(matches!(err, JwsError::UnsupportedKey));
    }

    #[test]
    fn thumbprint_matches_canonical_jwk_digest() {
        // RFC 7638 §3.1 örneği: alanlar sözlük sırasında, boşluksuz JSON.
        let jwk = Jwk::Ec {
            kty: "EC".to_owned(),
            crv: "P-256".to_owned(),
            x: "xco".to_owned(),
            y: "yco".to_owned(),
        };
        let canonical = r#"{"crv":"P-256","kty":"EC","x":"xco","y":"yco"}"#;
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()));
        assert_eq!(jwk.thumbprint(), expected);
    }
}

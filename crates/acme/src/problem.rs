use std::fmt;

use serde::{Deserialize, Serialize};

/// RFC 8555 §6.7'de tanımlı ACME hata URN'leri.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProblemType(pub String);

impl ProblemType {
    pub const ACCOUNT_DOES_NOT_EXIST: &'static str =
        "urn:ietf:params:acme:error:accountDoesNotExist";
    pub const ALREADY_REVOKED: &'static str = "urn:ietf:params:acme:error:alreadyRevoked";
    pub const BAD_CSR: &'static str = "urn:ietf:params:acme:error:badCSR";
    pub const BAD_NONCE: &'static str = "urn:ietf:params:acme:error:badNonce";
    pub const BAD_PUBLIC_KEY: &'static str = "urn:ietf:params:acme:error:badPublicKey";
    pub const BAD_REVOCATION_REASON: &'static str =
        "urn:ietf:params:acme:error:badRevocationReason";
    pub const BAD_SIGNATURE_ALGORITHM: &'static str =
        "urn:ietf:params:acme:error:badSignatureAlgorithm";
    pub const CAA: &'static str = "urn:ietf:params:acme:error:caa";
    pub const COMPOUND: &'static str = "urn:ietf:params:acme:error:compound";
    pub const CONNECTION: &'static str = "urn:ietf:params:acme:error:connection";
    pub const DNS: &'static str = "urn:ietf:params:acme:error:dns";
    pub const EXTERNAL_ACCOUNT_REQUIRED: &'static str =
        "urn:ietf:params:acme:error:externalAccountRequired";
    pub const INCORRECT_RESPONSE: &'static str = "urn:ietf:params:acme:error:incorrectResponse";
    pub const INVALID_CONTACT: &'static str = "urn:ietf:params:acme:error:invalidContact";
    pub const MALFORMED: &'static str = "urn:ietf:params:acme:error:malformed";
    pub const ORDER_NOT_READY: &'static str = "urn:ietf:params:acme:error:orderNotReady";
    pub const RATE_LIMITED: &'static str = "urn:ietf:params:acme:error:rateLimited";
    pub const REJECTED_IDENTIFIER: &'static str = "urn:ietf:params:acme:error:rejectedIdentifier";
    pub const SERVER_INTERNAL: &'static str = "urn:ietf:params:acme:error:serverInternal";
    pub const TLS: &'static str = "urn:ietf:params:acme:error:tls";
    pub const UNAUTHORIZED: &'static str = "urn:ietf:params:acme:error:unauthorized";
    pub const UNSUPPORTED_CONTACT: &'static str = "urn:ietf:params:acme:error:unsupportedContact";
    pub const UNSUPPORTED_IDENTIFIER: &'static str =
        "urn:ietf:params:acme:error:unsupportedIdentifier";
    pub const USER_ACTION_REQUIRED: &'static str = "urn:ietf:params:acme:error:userActionRequired";

    /// URN değerini metin olarak döndürür.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hatanın geçersiz nonce kaynaklı olup olmadığını bildirir.
    #[must_use]
    pub fn is_bad_nonce(&self) -> bool {
        self.0 == Self::BAD_NONCE
    }
}

/// RFC 7807 problem detayı; ACME sunucularının hata gövdesi.
///
/// RFC 8555 §6.7.1 uyarınca alt problemler özyinelemeli olarak taşınır.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProblemDetails {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub problem_type: Option<ProblemType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<ProblemDetails>,
}

impl ProblemDetails {
    /// Hatanın geçersiz nonce kaynaklı olup olmadığını bildirir.
    #[must_use]
    pub fn is_bad_nonce(&self) -> bool {
        self.problem_type
            .as_ref()
            .is_some_and(ProblemType::is_bad_nonce)
    }

    fn format_into(&self, out: &mut String, indent: &str) {
        if let Some(problem_type) = &self.problem_type {
            out.push_str(indent);
            out.push_str(problem_type.as_str());
        }

        if let Some(title) = &self.title {
            if self.problem_type.is_some() {
                out.push_str(": ");
            } else {
                out.push_str(indent);
            }
            out.push_str(title);
        }

        let child_indent = format!("{indent}  ");

        if let Some(detail) = &self.detail {
            out.push('\n');
            out.push_str(&child_indent);
            out.push_str(detail);
        }

        for sub in &self.subproblems {
            out.push('\n');
            sub.format_into(out, &child_indent);
        }
    }
}

impl fmt::Display for ProblemDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.format_into(&mut out, "");
        f.write_str(&out)
    }
}

impl std::error::Error for ProblemDetails {}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn deserializes_acme_problem_body() {
        let body = br#"{
            "type": "urn:ietf:params:acme:error:badNonce",
            "title": "Bad nonce",
            "status": 400,
            "detail": "JWS has an invalid anti-replay nonce"
        }"#;

        let problem: ProblemDetails = serde_json::from_slice(body).expect("problem ayrıştırılmalı");
        assert!(problem.is_bad_nonce());
        assert_eq!(problem.status, Some(400));
        assert_eq!(problem.title.as_deref(), Some("Bad nonce"));
    }

    #[test]
    fn display_includes_type_title_and_detail() {
        let problem = ProblemDetails {
            problem_type: Some(ProblemType(ProblemType::RATE_LIMITED.to_owned())),
            title: Some("Rate limited".to_owned()),
            detail: Some("too many new orders".to_owned()),
            ..ProblemDetails::default()
        };

        let rendered = problem.to_string();
        assert_eq!(
            rendered,
            "urn:ietf:params:acme:error:rateLimited: Rate limited\n  too many new orders"
        );
    }

    #[test]
    fn display_indents_subproblems_recursively() {
        let problem = ProblemDetails {
            problem_type: Some(ProblemType(ProblemType::COMPOUND.to_owned())),
            title: Some("Compound".to_owned()),
            subproblems: vec![ProblemDetails {
                problem_type: Some(ProblemType(ProblemType::DNS.to_owned())),
                title: Some("DNS failure".to_owned()),
                detail: Some("no TXT record".to_owned()),
                ..ProblemDetails::default()
            }],
            ..ProblemDetails::default()
        };

        let rendered = problem.to_string();
        assert_eq!(
            rendered,
            "urn:ietf:params:acme:error:compound: Compound\n  urn:ietf:params:acme:error:dns: DNS failure\n    no TXT record"
        );
    }

    #[test]
    fn missing_type_is_not_bad_nonce() {
        let problem = ProblemDetails::default();
        assert!(!problem.is_bad_nonce());
    }
}

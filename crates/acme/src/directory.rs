use std::borrow::ToOwned;
use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

/// ACME directory belgesi ayrıştırma hataları.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory belgesi JSON olarak ayrıştırılamadı: {0}")]
    Json(#[from] serde_json::Error),
    #[error("directory belgesi bir JSON objesi olmalı")]
    NotAnObject,
    #[error("directory alanı bulunamadı: {0}")]
    MissingField(&'static str),
    #[error("directory alanı geçersiz URL içeriyor: {field}: {source}")]
    InvalidUrl {
        field: String,
        #[source]
        source: url::ParseError,
    },
    #[error("directory alanı string tipinde olmalı: {field}")]
    InvalidUrlType { field: String },
    #[error("directory meta alanı beklenen türde değil: {field}")]
    InvalidMetaField { field: &'static str },
}

/// RFC 8555 §7.1.1 directory belgesi.
///
/// Sunucunun uç nokta URL'leri başlangıçta bir kez çekilir ve istemci
/// ömrü boyunca önbellekte tutulur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub new_nonce: Url,
    pub new_account: Url,
    pub new_order: Url,
    pub revoke_cert: Url,
    pub key_change: Url,
    pub new_authz: Option<Url>,
    pub meta: Option<DirectoryMeta>,
    /// Sunucuya özgü, standart dışı string uç noktaları.
    pub additional_endpoints: BTreeMap<String, Url>,
}

/// Directory `meta` bloğu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryMeta {
    pub terms_of_service: Option<Url>,
    pub website: Option<Url>,
    pub caa_identities: Vec<String>,
    pub external_account_required: bool,
}

impl Directory {
    /// ACME directory JSON belgesini tip güvenli yapıya dönüştürür.
    ///
    /// # Errors
    ///
    /// JSON objesi beklenen şemayı karşılamadığında veya zorunlu alanlar
    /// geçersiz URL içerdiğinde `DirectoryError` döndürülür.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, DirectoryError> {
        let value: Value = serde_json::from_slice(bytes)?;
        match value {
            Value::Object(map) => Self::from_object(&map),
            _ => Err(DirectoryError::NotAnObject),
        }
    }

    fn from_object(object: &Map<String, Value>) -> Result<Self, DirectoryError> {
        let new_nonce = parse_required_url(object, "newNonce")?;
        let new_account = parse_required_url(object, "newAccount")?;
        let new_order = parse_required_url(object, "newOrder")?;
        let revoke_cert = parse_required_url(object, "revokeCert")?;
        let key_change = parse_required_url(object, "keyChange")?;
        let new_authz = parse_optional_url(object, "newAuthz")?;
        let meta = parse_meta(object)?;
        let additional_endpoints = collect_additional_endpoints(object)?;

        Ok(Self {
            new_nonce,
            new_account,
            new_order,
            revoke_cert,
            key_change,
            new_authz,
            meta,
            additional_endpoints,
        })
    }
}

fn parse_required_url(
    object: &Map<String, Value>,
    key: &'static str,
) -> Result<Url, DirectoryError> {
    match object.get(key) {
        Some(Value::String(value)) => {
            Url::parse(value).map_err(|source| DirectoryError::InvalidUrl {
                field: key.to_owned(),
                source,
            })
        }
        Some(_) => Err(DirectoryError::InvalidUrlType {
            field: key.to_owned(),
        }),
        None => Err(DirectoryError::MissingField(key)),
    }
}

fn parse_optional_url(
    object: &Map<String, Value>,
    key: &'static str,
) -> Result<Option<Url>, DirectoryError> {
    match object.get(key) {
        Some(Value::String(value)) => Url::parse(value)
            .map(Some)
            .map_err(|source| DirectoryError::InvalidUrl {
                field: key.to_owned(),
                source,
            }),
        Some(_) => Err(DirectoryError::InvalidUrlType {
            field: key.to_owned(),
        }),
        None => Ok(None),
    }
}

fn parse_meta(object: &Map<String, Value>) -> Result<Option<DirectoryMeta>, DirectoryError> {
    let Some(raw_meta) = object.get("meta") else {
        return Ok(None);
    };
    let meta_object = raw_meta
        .as_object()
        .ok_or(DirectoryError::InvalidMetaField { field: "meta" })?;

    let terms_of_service = parse_meta_url(meta_object, "termsOfService")?;
    let website = parse_meta_url(meta_object, "website")?;
    let caa_identities = match meta_object.get("caaIdentities") {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(ToOwned::to_owned)
            .collect(),
        Some(_) => {
            return Err(DirectoryError::InvalidMetaField {
                field: "caaIdentities",
            });
        }
        None => Vec::new(),
    };
    let external_account_required = match meta_object.get("externalAccountRequired") {
        Some(Value::Bool(flag)) => *flag,
        Some(_) => {
            return Err(DirectoryError::InvalidMetaField {
                field: "externalAccountRequired",
            });
        }
        None => false,
    };

    Ok(Some(DirectoryMeta {
        terms_of_service,
        website,
        caa_identities,
        external_account_required,
    }))
}

fn parse_meta_url(
    object: &Map<String, Value>,
    key: &'static str,
) -> Result<Option<Url>, DirectoryError> {
    match object.get(key) {
        Some(Value::String(value)) => Url::parse(value)
            .map(Some)
            .map_err(|source| DirectoryError::InvalidUrl {
                field: format!("meta.{key}"),
                source,
            }),
        Some(_) => Err(DirectoryError::InvalidMetaField { field: key }),
        None => Ok(None),
    }
}

fn collect_additional_endpoints(
    object: &Map<String, Value>,
) -> Result<BTreeMap<String, Url>, DirectoryError> {
    let mut additional = BTreeMap::new();
    for (key, value) in object {
        if matches!(
            key.as_str(),
            "meta" | "newNonce" | "newAccount" | "newOrder" | "revokeCert" | "keyChange"
                | "newAuthz"
        ) {
            continue;
        }
        if let Value::String(url) = value {
            let parsed = Url::parse(url).map_err(|source| DirectoryError::InvalidUrl {
                field: key.clone(),
                source,
            })?;
            additional.insert(key.clone(), parsed);
        }
    }
    Ok(additional)
}

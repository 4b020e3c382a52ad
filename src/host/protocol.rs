use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire error codes (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCode {
    BadJson,
    BadRequest,
    Unsupported,
    UnlockFailed,
    Unauthorized,
    SessionExpired,
    NonceReplay,
    InvalidState,
    DbError,
    EncryptFailed,
    EtldMismatch,
    EtldInvalid,
    UrlParseError,
    PhishingBlock,
    NoCredentials,
}

impl WireCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireCode::BadJson => "BAD_JSON",
            WireCode::BadRequest => "BAD_REQUEST",
            WireCode::Unsupported => "UNSUPPORTED",
            WireCode::UnlockFailed => "UNLOCK_FAILED",
            WireCode::Unauthorized => "UNAUTHORIZED",
            WireCode::SessionExpired => "SESSION_EXPIRED",
            WireCode::NonceReplay => "NONCE_REPLAY",
            WireCode::InvalidState => "INVALID_STATE",
            WireCode::DbError => "DB_ERROR",
            WireCode::EncryptFailed => "ENCRYPT_FAILED",
            WireCode::EtldMismatch => "ETLD_MISMATCH",
            WireCode::EtldInvalid => "ETLD_INVALID",
            WireCode::UrlParseError => "URL_PARSE_ERROR",
            WireCode::PhishingBlock => "PHISHING_BLOCK",
            WireCode::NoCredentials => "NO_CREDENTIALS",
        }
    }
}

/// Response envelope; one per request, always.
#[derive(Debug, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            code: None,
            message: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            ok: true,
            data: Some(Value::Object(Default::default())),
            code: None,
            message: None,
        }
    }

    pub fn err(code: WireCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            code: Some(code.as_str().to_string()),
            message: Some(message.into()),
        }
    }

    pub fn err_with_data(code: WireCode, message: impl Into<String>, data: Value) -> Self {
        Self {
            ok: false,
            data: Some(data),
            code: Some(code.as_str().to_string()),
            message: Some(message.into()),
        }
    }
}

// Secrets cross the wire as plain JSON strings; inside the process they
// live in SecretString, which does not serialize on its own.
pub mod secret_string {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value.expose_secret())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(SecretString::new(s.into()))
    }
}

// ===== Request payloads =====

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockParams {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(with = "secret_string")]
    pub master_password: SecretString,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCredentialsParams {
    pub domain_etld1: String,
    pub exact_host: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub require_exact_host: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveCredentialParams {
    pub domain_etld1: String,
    pub exact_host: String,
    pub username: String,
    #[serde(with = "secret_string")]
    pub password: SecretString,
    #[serde(default)]
    pub require_exact_host: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhishingCheckParams {
    pub url: String,
    #[serde(default)]
    pub saved_etld1: Option<String>,
    #[serde(default)]
    pub exact_host: Option<String>,
}

// ===== Response payloads =====

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockData {
    pub token: String,
    pub ttl_seconds: u64,
}

#[derive(Serialize)]
pub struct CredentialItem {
    pub username: String,
    #[serde(with = "secret_string")]
    pub password: SecretString,
}

#[derive(Serialize)]
pub struct ItemsData {
    pub items: Vec<CredentialItem>,
}

#[derive(Debug, Serialize)]
pub struct SaveData {
    pub saved: bool,
    pub id: i64,
}

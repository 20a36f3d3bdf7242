//! Token authentication against an external identity service.
//!
//! The service receives the token as a single form field in a POST and
//! answers with `{"code": 200, "message": "...", "data": {"userId": ...}}`.
//! Only the user id is consumed.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use teamq_protocol::message::coerce_i64;
use thiserror::Error;
use tracing::debug;

use crate::identity::{Identity, IdentityKind};

/// Form field carrying the token unless configured otherwise.
pub const DEFAULT_TOKEN_FIELD: &str = "TEA_AUTH_TOKEN";

/// Longest accepted text user id, in bytes.
pub const MAX_USER_ID_LENGTH: usize = 1024;

/// `code` the identity service returns on success.
const SERVICE_CODE_SUCCESS: i64 = 200;

/// Authentication failures. These are logged; the sender only sees a
/// generic error.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("request to identity service failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("identity service returned HTTP {0}")]
    Status(u16),

    #[error("identity service returned malformed JSON: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    #[error("identity service rejected the token (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("'data' should be an object")]
    MissingData,

    #[error("'data.userId' is missing")]
    MissingUserId,

    #[error("'data.userId' is not a valid user id: {0}")]
    InvalidUserId(String),

    #[error("'data.userId' is empty")]
    EmptyUserId,

    #[error("'data.userId' is {0} bytes long")]
    UserIdTooLong(usize),
}

/// Resolves a token to the identity it was issued for.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify `token` and return the user it belongs to, in the requested
    /// representation.
    async fn authenticate(&self, token: &str, kind: IdentityKind) -> Result<Identity, AuthError>;
}

/// Identity service settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// URL the token is POSTed to.
    pub endpoint: String,
    /// Name of the form field carrying the token.
    pub token_field: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl AuthConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token_field: DEFAULT_TOKEN_FIELD.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// [`Authenticator`] that calls the identity service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAuthenticator {
    config: AuthConfig,
    client: reqwest::Client,
}

impl HttpAuthenticator {
    /// Build an authenticator with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self::with_client(config, client))
    }

    /// Build an authenticator around an existing client.
    #[must_use]
    pub fn with_client(config: AuthConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    #[tracing::instrument(skip_all, fields(endpoint = %self.config.endpoint))]
    async fn authenticate(&self, token: &str, kind: IdentityKind) -> Result<Identity, AuthError> {
        let resp = self
            .client
            .post(&self.config.endpoint)
            .form(&[(self.config.token_field.as_str(), token)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::Status(status.as_u16()));
        }

        let body = resp.bytes().await?;
        let identity = parse_response(&body, kind)?;
        debug!(user = %identity, "Identity service accepted token");
        Ok(identity)
    }
}

#[derive(Deserialize)]
struct ServiceResponse {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Map<String, Value>>,
}

/// Interpret an identity service response body.
///
/// # Errors
///
/// Returns an error if the body is not the expected JSON shape, `code` is
/// not 200, or `data.userId` cannot be converted to `kind`.
pub fn parse_response(body: &[u8], kind: IdentityKind) -> Result<Identity, AuthError> {
    let response: ServiceResponse = serde_json::from_slice(body)?;
    if response.code != SERVICE_CODE_SUCCESS {
        return Err(AuthError::Rejected {
            code: response.code,
            message: response.message,
        });
    }

    let data = response.data.ok_or(AuthError::MissingData)?;
    let user_id = data.get("userId").ok_or(AuthError::MissingUserId)?;

    match kind {
        IdentityKind::Numeric => numeric_user_id(user_id).map(Identity::Numeric),
        IdentityKind::Text => text_user_id(user_id).map(Identity::Text),
    }
}

fn numeric_user_id(value: &Value) -> Result<i64, AuthError> {
    let id = match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Err(AuthError::EmptyUserId);
            }
            s.parse::<i64>()
                .map_err(|_| AuthError::InvalidUserId(s.to_string()))?
        }
        Value::Number(_) => {
            coerce_i64(value).ok_or_else(|| AuthError::InvalidUserId(value.to_string()))?
        }
        other => return Err(AuthError::InvalidUserId(other.to_string())),
    };
    Ok(id)
}

fn text_user_id(value: &Value) -> Result<String, AuthError> {
    let id = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => return Err(AuthError::InvalidUserId(other.to_string())),
    };
    if id.is_empty() {
        return Err(AuthError::EmptyUserId);
    }
    if id.len() > MAX_USER_ID_LENGTH {
        return Err(AuthError::UserIdTooLong(id.len()));
    }
    Ok(id)
}

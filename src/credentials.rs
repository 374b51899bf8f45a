//! Bearer credential for the speech service.
//!
//! The credential is obtained by exchanging a signed service-account
//! assertion at the token endpoint and is cached in durable storage until
//! its reported expiry.

use crate::error::AuthError;
use crate::storage::{get_parsed, KeyValueStore};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub const ACCESS_TOKEN_KEY: &str = "tts_access_token";
pub const TOKEN_EXPIRY_KEY: &str = "tts_token_expiry";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expiry_timestamp_ms: i64,
}

impl Credential {
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.expiry_timestamp_ms
    }
}

/// Service-account identity, as found in a downloaded key file.
#[derive(Clone, Deserialize)]
pub struct ServiceIdentity {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
}

impl fmt::Debug for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceIdentity")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .finish_non_exhaustive()
    }
}

impl ServiceIdentity {
    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        let identity: ServiceIdentity =
            serde_json::from_str(json).map_err(|e| AuthError::InvalidIdentity(e.to_string()))?;
        if identity.client_email.is_empty() || identity.private_key.is_empty() {
            return Err(AuthError::InvalidIdentity(
                "client_email and private_key are required".to_string(),
            ));
        }
        Ok(identity)
    }

    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuthError::InvalidIdentity(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Produces the signed assertion presented to the token endpoint.
pub trait AssertionSigner: Send + Sync {
    fn sign(
        &self,
        identity: &ServiceIdentity,
        scope: &str,
        audience: &str,
        issued_at: i64,
    ) -> Result<String, AuthError>;
}

/// RS256 JWT signer for service-account keys.
pub struct JwtAssertionSigner;

impl AssertionSigner for JwtAssertionSigner {
    fn sign(
        &self,
        identity: &ServiceIdentity,
        scope: &str,
        audience: &str,
        issued_at: i64,
    ) -> Result<String, AuthError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = identity.private_key_id.clone();

        let claims = AssertionClaims {
            iss: identity.client_email.clone(),
            scope: scope.to_string(),
            aud: audience.to_string(),
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };

        let key = EncodingKey::from_rsa_pem(identity.private_key.as_bytes())
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        jsonwebtoken::encode(&header, &claims, &key).map_err(|e| AuthError::Signing(e.to_string()))
    }
}

/// Source of bearer credentials for the synthesis backend.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns a credential that is valid now, refreshing it if needed.
    async fn ensure_valid(&self) -> Result<Credential, AuthError>;

    /// Drops the cached credential so the next `ensure_valid` refreshes.
    fn invalidate(&self) -> Result<(), AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

pub struct CredentialManager {
    identity: Option<ServiceIdentity>,
    signer: Arc<dyn AssertionSigner>,
    token_uri: String,
    scope: String,
    client: reqwest::Client,
    store: Arc<dyn KeyValueStore>,
    // Serializes refreshes so concurrent callers share one exchange.
    refresh: tokio::sync::Mutex<()>,
}

impl CredentialManager {
    pub fn new(
        identity: Option<ServiceIdentity>,
        token_uri: impl Into<String>,
        scope: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            identity,
            signer: Arc::new(JwtAssertionSigner),
            token_uri: token_uri.into(),
            scope: scope.into(),
            client,
            store,
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn AssertionSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// The cached credential, if both keys are present and parse.
    pub fn cached(&self) -> Result<Option<Credential>, AuthError> {
        let token = self
            .store
            .get(ACCESS_TOKEN_KEY)
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        let expiry = match get_parsed::<i64>(self.store.as_ref(), TOKEN_EXPIRY_KEY) {
            Ok(expiry) => expiry,
            Err(e) => {
                tracing::warn!("Ignoring cached token expiry: {}", e);
                None
            }
        };

        Ok(match (token, expiry) {
            (Some(access_token), Some(expiry_timestamp_ms)) if !access_token.is_empty() => {
                Some(Credential {
                    access_token,
                    expiry_timestamp_ms,
                })
            }
            _ => None,
        })
    }

    fn persist(&self, credential: &Credential) -> Result<(), AuthError> {
        self.store
            .set(ACCESS_TOKEN_KEY, &credential.access_token)
            .and_then(|_| {
                self.store.set(
                    TOKEN_EXPIRY_KEY,
                    &credential.expiry_timestamp_ms.to_string(),
                )
            })
            .map_err(|e| AuthError::Storage(e.to_string()))
    }

    async fn exchange(&self, identity: &ServiceIdentity) -> Result<Credential, AuthError> {
        let assertion =
            self.signer
                .sign(identity, &self.scope, &self.token_uri, Utc::now().timestamp())?;

        tracing::debug!("Exchanging assertion for {} at {}", identity.client_email, self.token_uri);

        let resp = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("missing access_token".to_string()))?;
        let expires_in = body
            .expires_in
            .filter(|s| *s > 0)
            .ok_or_else(|| AuthError::MalformedResponse("missing expires_in".to_string()))?;

        let expiry_timestamp_ms = expires_in
            .checked_mul(1000)
            .and_then(|ms| Utc::now().timestamp_millis().checked_add(ms))
            .ok_or_else(|| {
                AuthError::MalformedResponse(format!("expires_in out of range: {}", expires_in))
            })?;

        Ok(Credential {
            access_token,
            expiry_timestamp_ms,
        })
    }
}

#[async_trait]
impl CredentialProvider for CredentialManager {
    async fn ensure_valid(&self) -> Result<Credential, AuthError> {
        let _guard = self.refresh.lock().await;

        let now_ms = Utc::now().timestamp_millis();
        if let Some(credential) = self.cached()? {
            if credential.is_valid_at(now_ms) {
                return Ok(credential);
            }
            tracing::debug!("Cached speech credential expired, refreshing");
        }

        let identity = self.identity.as_ref().ok_or(AuthError::MissingIdentity)?;
        let credential = self.exchange(identity).await?;
        self.persist(&credential)?;
        tracing::info!("Obtained speech credential for {}", identity.client_email);
        Ok(credential)
    }

    fn invalidate(&self) -> Result<(), AuthError> {
        tracing::debug!("Invalidating cached speech credential");
        self.store
            .remove(ACCESS_TOKEN_KEY)
            .and_then(|_| self.store.remove(TOKEN_EXPIRY_KEY))
            .map_err(|e| AuthError::Storage(e.to_string()))
    }
}

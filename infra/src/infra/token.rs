//! Exchange of the caller's bearer token for a workflow-scoped token.
//!
//! The exchange has two steps which must run in order:
//! 1. establish a security context: the inbound JWT is verified against the
//!    identity broker's key and its claims are read,
//! 2. request a user token for the workflow service's own identity binding
//!    (jwt-bearer grant) using that context as the assertion.

use super::binding::{IdentityBrokerConfig, OAuthCredentials, WorkflowServiceConfig};
use anyhow::Result;
use async_trait::async_trait;
use entity_workflow_base::error::WorkflowTriggerError;
use jsonwebtoken::{jwk::JwkSet, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::{fmt, sync::Arc};

pub const USER_TOKEN_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Access token for one outbound call. Never cached.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceToken(String);

impl ServiceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for ServiceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServiceToken(******)")
    }
}

/// Extract the token of an `Authorization: Bearer <token>` header value.
///
/// Returns None for a missing header, another scheme, or an empty token.
pub fn extract_bearer_token(authorization: Option<&str>) -> Option<&str> {
    let mut parts = authorization?.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Some(token),
        _ => None,
    }
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TokenClaims {
    pub exp: i64,
    pub zid: Option<String>,
    pub client_id: Option<String>,
    pub user_name: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub scope: Vec<String>,
}

/// Verified caller identity, the result of the first exchange step.
#[derive(Clone)]
pub struct SecurityContext {
    token: String,
    claims: TokenClaims,
}

impl SecurityContext {
    pub fn new(token: impl Into<String>, claims: TokenClaims) -> Self {
        Self {
            token: token.into(),
            claims,
        }
    }
    pub fn token(&self) -> &str {
        &self.token
    }
    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }
    pub fn user_name(&self) -> Option<&str> {
        self.claims.user_name.as_deref()
    }
    pub fn zone_id(&self) -> Option<&str> {
        self.claims.zid.as_deref()
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("user_name", &self.claims.user_name)
            .field("zid", &self.claims.zid)
            .field("client_id", &self.claims.client_id)
            .finish()
    }
}

#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait IdentityBroker: Send + Sync {
    async fn create_security_context(&self, token: &str) -> Result<SecurityContext>;

    async fn request_user_token(
        &self,
        context: &SecurityContext,
        credentials: &OAuthCredentials,
    ) -> Result<ServiceToken>;
}

#[derive(Deserialize, Debug)]
struct AccessTokenResponse {
    access_token: String,
}

/// Identity broker reached over its OAuth endpoints.
#[derive(Clone, Debug)]
pub struct XsuaaIdentityBrokerImpl {
    client: reqwest::Client,
    broker: IdentityBrokerConfig,
}

impl XsuaaIdentityBrokerImpl {
    pub fn new(client: reqwest::Client, broker: IdentityBrokerConfig) -> Self {
        Self { client, broker }
    }

    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey> {
        if let Some(pem) = self.broker.credentials.verificationkey.as_ref() {
            return DecodingKey::from_rsa_pem(normalize_pem(pem).as_bytes()).map_err(|e| {
                WorkflowTriggerError::TokenExchangeFailed(format!("bad verification key: {e:?}"))
                    .into()
            });
        }
        let url = self.broker.credentials.token_keys_url()?;
        let res = self.client.get(url).send().await.map_err(|e| {
            WorkflowTriggerError::TokenExchangeFailed(format!("token_keys request error: {e:?}"))
        })?;
        if !res.status().is_success() {
            return Err(WorkflowTriggerError::TokenExchangeFailed(format!(
                "token_keys responded {}",
                res.status()
            ))
            .into());
        }
        let keys: JwkSet = serde_json::from_slice(res.bytes().await?.as_ref())?;
        let jwk = match kid {
            Some(kid) => keys.find(kid),
            None => keys.keys.first(),
        }
        .ok_or_else(|| {
            WorkflowTriggerError::TokenExchangeFailed(format!("no token key for kid {kid:?}"))
        })?;
        DecodingKey::from_jwk(jwk).map_err(|e| {
            WorkflowTriggerError::TokenExchangeFailed(format!("bad token key: {e:?}")).into()
        })
    }
}

#[async_trait]
impl IdentityBroker for XsuaaIdentityBrokerImpl {
    async fn create_security_context(&self, token: &str) -> Result<SecurityContext> {
        let header = jsonwebtoken::decode_header(token).map_err(|e| {
            WorkflowTriggerError::TokenExchangeFailed(format!("malformed jwt: {e:?}"))
        })?;
        let key = self.decoding_key(header.kid.as_deref()).await?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        let data = jsonwebtoken::decode::<TokenClaims>(token, &key, &validation).map_err(|e| {
            WorkflowTriggerError::TokenExchangeFailed(format!("jwt rejected: {e:?}"))
        })?;
        if let (Some(zone), Some(zid)) = (
            self.broker.credentials.identityzone.as_deref(),
            data.claims.zid.as_deref(),
        ) {
            if zone != zid {
                return Err(WorkflowTriggerError::TokenExchangeFailed(format!(
                    "token zone {zid} does not match identity zone {zone}"
                ))
                .into());
            }
        }
        Ok(SecurityContext::new(token, data.claims))
    }

    async fn request_user_token(
        &self,
        context: &SecurityContext,
        credentials: &OAuthCredentials,
    ) -> Result<ServiceToken> {
        let url = credentials.token_url()?;
        let res = self
            .client
            .post(url)
            .basic_auth(&credentials.clientid, Some(&credentials.clientsecret))
            .header(http::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", USER_TOKEN_GRANT_TYPE),
                ("response_type", "token"),
                ("client_id", credentials.clientid.as_str()),
                ("assertion", context.token()),
            ])
            .send()
            .await
            .map_err(|e| {
                WorkflowTriggerError::TokenExchangeFailed(format!("token request error: {e:?}"))
            })?;
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(WorkflowTriggerError::TokenExchangeFailed(format!(
                "token request responded {}: {}",
                status.as_u16(),
                body
            ))
            .into());
        }
        let token: AccessTokenResponse = serde_json::from_str(&body).map_err(|e| {
            WorkflowTriggerError::TokenExchangeFailed(format!("unexpected token response: {e:?}"))
        })?;
        Ok(ServiceToken::new(token.access_token))
    }
}

/// Runs both exchange steps for one triggering event.
#[derive(Clone)]
pub struct TokenBroker {
    identity_broker: Arc<dyn IdentityBroker>,
}

impl TokenBroker {
    pub fn new(identity_broker: Arc<dyn IdentityBroker>) -> Self {
        Self { identity_broker }
    }

    /// Fails with `TokenUnavailable` when there is no usable bearer token
    /// (nothing is sent anywhere) and with `TokenExchangeFailed` when either
    /// step is rejected.
    pub async fn exchange(
        &self,
        workflow: &WorkflowServiceConfig,
        authorization: Option<&str>,
    ) -> Result<ServiceToken> {
        let token = extract_bearer_token(authorization).ok_or_else(|| {
            WorkflowTriggerError::TokenUnavailable(
                "no bearer token in authorization header".to_string(),
            )
        })?;
        let context = self
            .identity_broker
            .create_security_context(token)
            .await
            .inspect_err(|e| tracing::error!("Workflow createSecurityContext ERROR: {:?}", e))
            .map_err(into_exchange_failed)?;
        tracing::debug!("security context established: {:?}", context);
        self.identity_broker
            .request_user_token(&context, &workflow.uaa)
            .await
            .inspect_err(|e| tracing::error!("Workflow requestToken ERROR: {:?}", e))
            .map_err(|e| into_exchange_failed(e).into())
    }
}

// bindings often carry the key on a single line without breaks
fn normalize_pem(pem: &str) -> String {
    const BEGIN: &str = "-----BEGIN PUBLIC KEY-----";
    const END: &str = "-----END PUBLIC KEY-----";
    if pem.contains('\n') {
        return pem.to_string();
    }
    match pem
        .strip_prefix(BEGIN)
        .and_then(|rest| rest.strip_suffix(END))
    {
        Some(body) => format!("{BEGIN}\n{}\n{END}\n", body.trim()),
        None => pem.to_string(),
    }
}

fn into_exchange_failed(e: anyhow::Error) -> WorkflowTriggerError {
    match e.downcast::<WorkflowTriggerError>() {
        Ok(e @ WorkflowTriggerError::TokenExchangeFailed(_)) => e,
        Ok(other) => WorkflowTriggerError::TokenExchangeFailed(other.to_string()),
        Err(e) => WorkflowTriggerError::TokenExchangeFailed(format!("{e:?}")),
    }
}

//! Session-backed strategy.
//!
//! The client presents an opaque session artifact (typically the value of an
//! OAuth2 proxy session cookie) as its connect password. A [`SessionDecoder`]
//! turns it into a [`SessionPrincipal`], whose claims become available to
//! templates as `{oidc.session.<claim>}`.
use super::{DecisionContext, DecisionStrategy, resolve_target_account};
use crate::DecisionError;
use crate::claims::UserClaims;
use crate::replacer::Resolver;
use crate::template::Template;
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub const SESSION_CLAIM_PREFIX: &str = "oidc.session.";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("empty session artifact")]
    Empty,
    #[error("session token rejected: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("invalid session claim: {0}")]
    InvalidClaim(String),
}

/// Identity recovered from a session artifact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPrincipal {
    pub email: String,
    pub claims: Map<String, Value>,
}

#[async_trait]
pub trait SessionDecoder: Send + Sync {
    async fn decode(&self, artifact: &str) -> Result<SessionPrincipal, SessionError>;

    /// Look up a claim by name. `Ok(None)` means the principal has no such claim.
    fn extract_claim(
        &self,
        principal: &SessionPrincipal,
        claim: &str,
    ) -> Result<Option<Value>, SessionError>;
}

/// Decodes HS256 session tokens signed with a shared cookie secret.
///
/// Nested claims can be addressed with dots, e.g. `realm_access.roles`.
pub struct JwtSessionDecoder {
    key: DecodingKey,
    validation: Validation,
}

impl JwtSessionDecoder {
    pub fn new(cookie_secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(cookie_secret),
            validation,
        }
    }

    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.validation.leeway = seconds;
        self
    }
}

impl fmt::Debug for JwtSessionDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSessionDecoder")
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionDecoder for JwtSessionDecoder {
    async fn decode(&self, artifact: &str) -> Result<SessionPrincipal, SessionError> {
        let artifact = artifact.trim();
        if artifact.is_empty() {
            return Err(SessionError::Empty);
        }
        let data =
            jsonwebtoken::decode::<Map<String, Value>>(artifact, &self.key, &self.validation)?;
        let claims = data.claims;
        let email = match claims.get("email") {
            None => String::new(),
            Some(Value::String(email)) => email.clone(),
            Some(_) => return Err(SessionError::InvalidClaim("email".to_string())),
        };
        Ok(SessionPrincipal { email, claims })
    }

    fn extract_claim(
        &self,
        principal: &SessionPrincipal,
        claim: &str,
    ) -> Result<Option<Value>, SessionError> {
        if claim.is_empty() {
            return Err(SessionError::InvalidClaim(claim.to_string()));
        }
        let mut segments = claim.split('.');
        let Some(first) = segments.next() else {
            return Ok(None);
        };
        let mut current = match principal.claims.get(first) {
            Some(value) => value,
            None => return Ok(None),
        };
        for segment in segments {
            current = match current.get(segment) {
                Some(value) => value,
                None => return Ok(None),
            };
        }
        Ok(Some(current.clone()))
    }
}

/// Resolves `oidc.session.<claim>` against a decoded principal.
///
/// Lookups under the prefix always resolve: missing or unusable claims log a
/// warning and yield an empty string.
pub struct SessionResolver {
    decoder: Arc<dyn SessionDecoder>,
    principal: SessionPrincipal,
}

impl SessionResolver {
    pub fn new(decoder: Arc<dyn SessionDecoder>, principal: SessionPrincipal) -> Self {
        Self { decoder, principal }
    }
}

impl Resolver for SessionResolver {
    fn resolve(&self, key: &str) -> Option<String> {
        let claim = key.strip_prefix(SESSION_CLAIM_PREFIX)?;
        let value = match self.decoder.extract_claim(&self.principal, claim) {
            Ok(Some(Value::String(value))) => value,
            Ok(Some(Value::Number(value))) => value.to_string(),
            Ok(Some(Value::Bool(value))) => value.to_string(),
            Ok(Some(_)) => {
                warn!(claim, "session claim is not a scalar value");
                String::new()
            }
            Ok(None) => {
                warn!(claim, "session claim not found");
                String::new()
            }
            Err(err) => {
                warn!(claim, error = %err, "unable to extract session claim");
                String::new()
            }
        };
        Some(value)
    }
}

/// Authorizes clients holding a valid session artifact.
#[derive(Clone)]
pub struct SessionStrategy {
    decoder: Arc<dyn SessionDecoder>,
    account: Option<String>,
    template: Option<Template>,
}

impl SessionStrategy {
    pub fn new(decoder: Arc<dyn SessionDecoder>) -> Self {
        Self {
            decoder,
            account: None,
            template: None,
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_template(mut self, template: Template) -> Self {
        self.template = Some(template);
        self
    }
}

impl fmt::Debug for SessionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStrategy")
            .field("account", &self.account)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DecisionStrategy for SessionStrategy {
    fn module(&self) -> &str {
        "session"
    }

    async fn decide(&self, ctx: &mut DecisionContext) -> Result<UserClaims, DecisionError> {
        let artifact = ctx.request().connect_opts().password.clone();
        let principal = self
            .decoder
            .decode(&artifact)
            .await
            .map_err(DecisionError::SessionDecode)?;

        ctx.replacer_mut().push(Arc::new(SessionResolver::new(
            self.decoder.clone(),
            principal.clone(),
        )));

        let mut claims = UserClaims::new(ctx.request().user_nkey());
        claims.aud = resolve_target_account(ctx, self.account.as_deref())?;
        match &self.template {
            Some(template) => template.render(ctx.replacer(), &mut claims),
            None if !principal.email.is_empty() => claims.name = Some(principal.email.clone()),
            None => {}
        }
        debug!(account = %claims.aud, "session principal authorized");
        Ok(claims)
    }
}

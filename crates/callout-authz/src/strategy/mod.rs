//! Decision strategies: turn an authorization request into user claims.
//!
//! # How it fits
//! A [`crate::PolicySet`] selects one strategy per request. The strategy
//! returns the [`UserClaims`] the client should receive, with `aud` naming the
//! target account, or a [`DecisionError`] that is reported back to the client
//! inside a signed error envelope.
//!
//! # Key invariants
//! - A strategy never signs anything; signing happens after the decision.
//! - Target-account resolution fails closed: an empty account is an error,
//!   never a grant into a default account.
//!
//! # Extending
//! Implement [`DecisionStrategy`] and register a builder with
//! [`StrategyRegistry::register`] to make the new module available from
//! configuration.
mod allow;
mod deny;
mod registry;
mod session;

pub use allow::AllowStrategy;
pub use deny::DenyStrategy;
pub use registry::{
    SessionDecoders, StrategyBuildContext, StrategyBuilder, StrategyConfig, StrategyRegistry,
};
pub use session::{
    JwtSessionDecoder, SESSION_CLAIM_PREFIX, SessionDecoder, SessionError, SessionPrincipal,
    SessionResolver, SessionStrategy,
};

use crate::DecisionError;
use crate::claims::{AuthorizationRequest, UserClaims};
use crate::replacer::Replacer;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Per-request state handed to a strategy.
#[derive(Debug)]
pub struct DecisionContext {
    request: Arc<AuthorizationRequest>,
    replacer: Replacer,
}

impl DecisionContext {
    pub fn new(request: Arc<AuthorizationRequest>) -> Self {
        let replacer = Replacer::for_request(request.clone());
        Self { request, replacer }
    }

    pub fn with_replacer(request: Arc<AuthorizationRequest>, replacer: Replacer) -> Self {
        Self { request, replacer }
    }

    pub fn request(&self) -> &AuthorizationRequest {
        &self.request
    }

    pub fn replacer(&self) -> &Replacer {
        &self.replacer
    }

    pub fn replacer_mut(&mut self) -> &mut Replacer {
        &mut self.replacer
    }
}

#[async_trait]
pub trait DecisionStrategy: Send + Sync {
    /// Short module name used in logs.
    fn module(&self) -> &str;

    async fn decide(&self, ctx: &mut DecisionContext) -> Result<UserClaims, DecisionError>;
}

/// Closed set of built-in strategies plus an escape hatch for custom ones.
#[derive(Clone)]
pub enum Strategy {
    Allow(AllowStrategy),
    Deny(DenyStrategy),
    Session(SessionStrategy),
    Custom(Arc<dyn DecisionStrategy>),
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Allow(allow) => f.debug_tuple("Allow").field(allow).finish(),
            Strategy::Deny(_) => f.write_str("Deny"),
            Strategy::Session(session) => f.debug_tuple("Session").field(session).finish(),
            Strategy::Custom(custom) => f.debug_tuple("Custom").field(&custom.module()).finish(),
        }
    }
}

#[async_trait]
impl DecisionStrategy for Strategy {
    fn module(&self) -> &str {
        match self {
            Strategy::Allow(allow) => allow.module(),
            Strategy::Deny(deny) => deny.module(),
            Strategy::Session(session) => session.module(),
            Strategy::Custom(custom) => custom.module(),
        }
    }

    async fn decide(&self, ctx: &mut DecisionContext) -> Result<UserClaims, DecisionError> {
        match self {
            Strategy::Allow(allow) => allow.decide(ctx).await,
            Strategy::Deny(deny) => deny.decide(ctx).await,
            Strategy::Session(session) => session.decide(ctx).await,
            Strategy::Custom(custom) => custom.decide(ctx).await,
        }
    }
}

/// Configured account (after substitution) or, when unset, the username the
/// client connected with.
pub(crate) fn resolve_target_account(
    ctx: &DecisionContext,
    account: Option<&str>,
) -> Result<String, DecisionError> {
    let audience = match account.filter(|account| !account.is_empty()) {
        Some(account) => ctx.replacer().replace_all(account, ""),
        None => ctx.request().connect_opts().username.clone(),
    };
    if audience.is_empty() {
        return Err(DecisionError::NoTargetAccount);
    }
    Ok(audience)
}

//! Authorization decisions for connection callouts.
//!
//! # Purpose
//! When a client connects, the messaging server forwards a signed
//! authorization request to a callout service. This crate holds everything
//! needed to answer it: the claim documents and their JWT codec, request
//! matchers, policies, decision strategies, and the account keys used to sign
//! the result.
//!
//! # How it fits
//! The `callout` service subscribes to the server's callout subject, decodes
//! each request with [`verify_request`], runs it through a [`PolicySet`], signs
//! the resulting [`UserClaims`] with the target account key, and wraps them in
//! an [`AuthorizationResponse`] signed by the auth account key.
//!
//! # Key invariants
//! - All tokens are EdDSA/Ed25519 and self-certifying: `iss` is the public key
//!   that verifies the signature.
//! - Policy selection is first match wins; a policy without matchers never
//!   matches.
//! - Explicit denials and unmatched requests look identical on the wire.
//! - Target-account resolution fails closed.
//!
//! # Important configuration
//! - Strategies are declared as `module: <name>` plus settings and built by a
//!   [`StrategyRegistry`].
//! - Session strategies reference decoders by name; unknown names fail at
//!   build time, not per request.
//!
//! # Examples
//! ```rust
//! use callout_authz::{
//!     AuthorizationRequest, ClientInformation, ConnectOptions, PolicySet, ServerId,
//!     Strategy, AllowStrategy,
//! };
//!
//! let policies = PolicySet::new(Vec::new(), Some(Strategy::Allow(AllowStrategy::new())));
//! let request = AuthorizationRequest::new(
//!     ServerId::default(),
//!     "UCLIENT",
//!     ClientInformation::default(),
//!     ConnectOptions::default(),
//! );
//! assert!(policies.select(&request).is_some());
//! ```
//!
//! # Common pitfalls
//! - Single-key signing uses one key for every target account; use a
//!   [`Keystore`] when clients land in accounts with their own keys.
//! - Template placeholders that do not resolve are kept verbatim.

mod claims;
mod errors;
mod keys;
mod keystore;
mod matcher;
mod options;
mod pinned;
mod policy;
mod provision;
mod replacer;
mod strategy;
mod template;
mod token;

pub use claims::{
    AUTHORIZATION_REQUEST_TYPE, AUTHORIZATION_RESPONSE_TYPE, AuthorizationRequest,
    AuthorizationRequestData, AuthorizationResponse, AuthorizationResponseData, CLAIMS_VERSION,
    ClientInformation, ConnectOptions, NO_LIMIT, Permission, ResponsePermission, ServerId,
    USER_CLAIMS_TYPE, UserClaims, UserClaimsData,
};
pub use errors::{AuthzError, AuthzResult, DecisionError, ProvisionError, RegistryError};
pub use keys::{KeyKind, KeyPair, decode_public_key, encode_public_key};
pub use keystore::Keystore;
pub use matcher::{ClientInfoMatcher, ConnectOptsMatcher, Matcher, RequestMatcher};
pub use options::{Account, AuthCalloutMap, AuthorizationMap, ServerOptions, User};
pub use pinned::PinnedTokens;
pub use policy::{Policy, PolicyConfig, PolicySet, Selection};
pub use provision::{InternalAccountProvisioner, ProvisionRequest, ProvisionedAccount};
pub use replacer::{FileVars, Replacer, RequestVars, Resolver};
pub use strategy::{
    AllowStrategy, DecisionContext, DecisionStrategy, DenyStrategy, JwtSessionDecoder,
    SESSION_CLAIM_PREFIX, SessionDecoder, SessionDecoders, SessionError, SessionPrincipal,
    SessionResolver, SessionStrategy, Strategy, StrategyBuildContext, StrategyBuilder,
    StrategyConfig, StrategyRegistry,
};
pub use template::Template;
pub use token::{SignedClaims, sign, verify, verify_request};

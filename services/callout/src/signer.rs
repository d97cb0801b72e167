//! Signing of user claims and response envelopes.
//!
//! Two modes:
//! - Single key: one account key signs both the user claims and the envelope.
//!   Clients can then only be placed into the account that key belongs to.
//! - Keystore: user claims are signed by the target account's key and the
//!   envelope by the auth account's key.
use callout_authz::{
    AuthorizationResponse, AuthzResult, KeyPair, Keystore, UserClaims, sign,
};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub enum SigningMode {
    SingleKey(KeyPair),
    Keystore {
        keystore: Arc<dyn Keystore>,
        auth_account: String,
    },
}

impl fmt::Debug for SigningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningMode::SingleKey(key) => f.debug_tuple("SingleKey").field(key).finish(),
            SigningMode::Keystore { auth_account, .. } => f
                .debug_struct("Keystore")
                .field("auth_account", auth_account)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseSigner {
    mode: SigningMode,
}

impl ResponseSigner {
    pub fn new(mode: SigningMode) -> Self {
        Self { mode }
    }

    pub fn single_key(key: KeyPair) -> Self {
        Self::new(SigningMode::SingleKey(key))
    }

    pub fn keystore(keystore: Arc<dyn Keystore>, auth_account: impl Into<String>) -> Self {
        Self::new(SigningMode::Keystore {
            keystore,
            auth_account: auth_account.into(),
        })
    }

    pub fn mode(&self) -> &SigningMode {
        &self.mode
    }

    /// Sign `claims` with the key of the account named in `claims.aud`.
    pub fn sign_user_claims(&self, claims: &mut UserClaims) -> AuthzResult<String> {
        let key = match &self.mode {
            SigningMode::SingleKey(key) => key.clone(),
            SigningMode::Keystore { keystore, .. } => keystore.signing_key(&claims.aud)?,
        };
        sign(claims, &key)
    }

    /// Sign the envelope with the auth account key.
    pub fn sign_response(&self, response: &mut AuthorizationResponse) -> AuthzResult<String> {
        let key = match &self.mode {
            SigningMode::SingleKey(key) => key.clone(),
            SigningMode::Keystore {
                keystore,
                auth_account,
            } => keystore.signing_key(auth_account)?,
        };
        sign(response, &key)
    }

    /// Account whose key signs envelopes, for logs.
    pub fn auth_account(&self) -> Option<&str> {
        match &self.mode {
            SigningMode::SingleKey(_) => None,
            SigningMode::Keystore { auth_account, .. } => Some(auth_account),
        }
    }
}

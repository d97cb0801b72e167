use crate::AuthzResult;
use crate::claims::UserClaims;
use crate::keys::{KeyKind, KeyPair};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Pre-issued connect tokens that bypass policy evaluation.
///
/// Each account holds at most one token. Presenting it as the connect-options
/// token authorizes the client straight into that account with the stored
/// claims template.
#[derive(Debug, Default)]
pub struct PinnedTokens {
    inner: RwLock<PinnedInner>,
}

#[derive(Debug, Default)]
struct PinnedInner {
    claims_by_token: HashMap<String, UserClaims>,
    token_by_account: HashMap<String, String>,
    account_by_token: HashMap<String, String>,
}

impl PinnedTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a token for `account`, replacing any token it already had.
    ///
    /// Without a template the account gets unrestricted claims.
    pub fn register(
        &self,
        account: impl Into<String>,
        template: Option<UserClaims>,
    ) -> AuthzResult<String> {
        let account = account.into();
        let token = KeyPair::generate(KeyKind::User)?.seed();
        let claims = template.unwrap_or_else(|| {
            let mut claims = UserClaims::new("");
            claims.aud = account.clone();
            claims
        });

        let mut inner = self.inner.write();
        inner.remove_account(&account);
        inner.claims_by_token.insert(token.clone(), claims);
        inner
            .account_by_token
            .insert(token.clone(), account.clone());
        inner.token_by_account.insert(account, token.clone());
        Ok(token)
    }

    /// Account and claims template a presented token is pinned to.
    pub fn lookup(&self, token: &str) -> Option<(String, UserClaims)> {
        if token.is_empty() {
            return None;
        }
        let inner = self.inner.read();
        let claims = inner.claims_by_token.get(token)?;
        let account = inner.account_by_token.get(token)?;
        Some((account.clone(), claims.clone()))
    }

    pub fn len(&self) -> usize {
        self.inner.read().token_by_account.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PinnedInner {
    fn remove_account(&mut self, account: &str) {
        if let Some(token) = self.token_by_account.remove(account) {
            self.claims_by_token.remove(&token);
            self.account_by_token.remove(&token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::NO_LIMIT;

    #[test]
    fn register_and_lookup() {
        let pinned = PinnedTokens::new();
        let token = pinned.register("SYS", None).expect("register");
        assert!(token.starts_with("SU"));

        let (account, claims) = pinned.lookup(&token).expect("lookup");
        assert_eq!(account, "SYS");
        assert_eq!(claims.aud, "SYS");
        assert_eq!(claims.nats.subs, NO_LIMIT);
        assert_eq!(pinned.len(), 1);
    }

    #[test]
    fn re_registering_replaces_previous_token() {
        let pinned = PinnedTokens::new();
        let first = pinned.register("SYS", None).expect("first");
        let second = pinned.register("SYS", None).expect("second");

        assert_ne!(first, second);
        assert!(pinned.lookup(&first).is_none());
        assert!(pinned.lookup(&second).is_some());
        assert_eq!(pinned.len(), 1);
    }

    #[test]
    fn accounts_keep_separate_tokens() {
        let pinned = PinnedTokens::new();
        assert!(pinned.is_empty());
        let sys = pinned.register("SYS", None).expect("sys");
        let app = pinned.register("APP", None).expect("app");

        assert_eq!(pinned.lookup(&sys).map(|(account, _)| account).as_deref(), Some("SYS"));
        assert_eq!(pinned.lookup(&app).map(|(account, _)| account).as_deref(), Some("APP"));
        assert_eq!(pinned.len(), 2);
    }

    #[test]
    fn empty_token_never_matches() {
        let pinned = PinnedTokens::new();
        pinned.register("APP", None).expect("register");
        assert!(pinned.lookup("").is_none());
    }
}

use crate::keys::{KeyKind, KeyPair};
use crate::{AuthzError, AuthzResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup of account signing keys by account name.
///
/// Implementations must be safe to call concurrently from every request task
/// and must only hand out account keys.
pub trait Keystore: Send + Sync {
    fn signing_key(&self, account: &str) -> AuthzResult<KeyPair>;
}

/// Account name to printable seed, parsed on each lookup.
impl Keystore for HashMap<String, String> {
    fn signing_key(&self, account: &str) -> AuthzResult<KeyPair> {
        let seed = self
            .get(account)
            .ok_or_else(|| AuthzError::MissingSigningKey(account.to_string()))?;
        KeyPair::from_seed(seed)?.require_kind(KeyKind::Account)
    }
}

impl Keystore for HashMap<String, KeyPair> {
    fn signing_key(&self, account: &str) -> AuthzResult<KeyPair> {
        self.get(account)
            .cloned()
            .ok_or_else(|| AuthzError::MissingSigningKey(account.to_string()))?
            .require_kind(KeyKind::Account)
    }
}

impl<T: Keystore + ?Sized> Keystore for Arc<T> {
    fn signing_key(&self, account: &str) -> AuthzResult<KeyPair> {
        (**self).signing_key(account)
    }
}

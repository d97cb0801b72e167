//! One-shot creation of the internal auth account.
//!
//! When no external signing key is configured the callout service can mint
//! its own account key and register a dedicated account with the owning
//! server. Provisioning is a two-step handshake:
//! 1. [`InternalAccountProvisioner::provision`] validates the request against
//!    the current [`ServerOptions`] and returns a [`ProvisionedAccount`].
//! 2. The owner of the server configuration applies it with
//!    [`ServerOptions::merge_internal_account`].
//!
//! Both steps must finish before the service starts listening.
use crate::ProvisionError;
use crate::keys::{KeyKind, KeyPair};
use crate::options::{Account, AuthCalloutMap, AuthorizationMap, ServerOptions, User};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub signing_key_configured: bool,
    pub internal_account: Option<String>,
    pub internal_user: Option<String>,
}

/// Everything generated for the internal account.
#[derive(Clone)]
pub struct ProvisionedAccount {
    pub account: String,
    pub user: String,
    pub public_key: String,
    /// Account seed; becomes the service's single signing key.
    pub seed: String,
    pub authorization: AuthorizationMap,
    pub account_definition: Account,
}

impl fmt::Debug for ProvisionedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionedAccount")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct InternalAccountProvisioner {
    request: ProvisionRequest,
    provisioned: AtomicBool,
}

impl InternalAccountProvisioner {
    pub fn new(request: ProvisionRequest) -> Self {
        Self {
            request,
            provisioned: AtomicBool::new(false),
        }
    }

    /// Validate and generate the internal account.
    ///
    /// Returns `Ok(None)` when nothing needs provisioning (an external signing
    /// key is configured, or no internal account was requested).
    ///
    /// # Errors
    /// Checked in this order:
    /// - [`ProvisionError::SigningKeyConflict`]: signing key and internal
    ///   account both configured.
    /// - [`ProvisionError::MissingInternalAccount`]: internal user without an
    ///   internal account.
    /// - [`ProvisionError::AuthorizationMapConflict`]: the server already has
    ///   an authorization map.
    /// - [`ProvisionError::NoAccounts`]: the server defines no accounts.
    /// - [`ProvisionError::AlreadyProvisioned`]: called a second time.
    pub fn provision(
        &self,
        options: &ServerOptions,
    ) -> Result<Option<ProvisionedAccount>, ProvisionError> {
        let request = &self.request;
        let internal_account = request
            .internal_account
            .as_deref()
            .filter(|account| !account.is_empty());
        let internal_user = request
            .internal_user
            .as_deref()
            .filter(|user| !user.is_empty());

        if request.signing_key_configured && internal_account.is_some() {
            return Err(ProvisionError::SigningKeyConflict);
        }
        if internal_user.is_some() && internal_account.is_none() {
            return Err(ProvisionError::MissingInternalAccount);
        }
        if request.signing_key_configured {
            return Ok(None);
        }
        let Some(account) = internal_account else {
            return Ok(None);
        };
        if options.authorization.is_some() {
            return Err(ProvisionError::AuthorizationMapConflict);
        }
        if options.accounts.is_none() {
            return Err(ProvisionError::NoAccounts);
        }
        if self.provisioned.swap(true, Ordering::SeqCst) {
            return Err(ProvisionError::AlreadyProvisioned);
        }

        let key = KeyPair::generate(KeyKind::Account)?;
        let public_key = key.public_key();
        let seed = key.seed();
        let user = internal_user
            .map(str::to_string)
            .unwrap_or_else(|| public_key.clone());

        let authorization = AuthorizationMap {
            users: Vec::new(),
            auth_callout: Some(AuthCalloutMap {
                issuer: public_key.clone(),
                account: account.to_string(),
                auth_users: vec![public_key.clone()],
            }),
        };
        let account_definition = Account {
            name: account.to_string(),
            users: vec![User {
                user: public_key.clone(),
                password: seed.clone(),
            }],
        };

        info!(account, issuer = %public_key, "provisioned internal auth account");
        Ok(Some(ProvisionedAccount {
            account: account.to_string(),
            user,
            public_key,
            seed,
            authorization,
            account_definition,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(account: Option<&str>, user: Option<&str>) -> ProvisionRequest {
        ProvisionRequest {
            signing_key_configured: false,
            internal_account: account.map(str::to_string),
            internal_user: user.map(str::to_string),
        }
    }

    fn options_with_accounts() -> ServerOptions {
        ServerOptions {
            authorization: None,
            accounts: Some(vec![Account {
                name: "APP".to_string(),
                users: Vec::new(),
            }]),
        }
    }

    #[test]
    fn generates_account_bound_to_public_key() {
        let provisioner = InternalAccountProvisioner::new(request(Some("AUTH"), None));
        let provisioned = provisioner
            .provision(&options_with_accounts())
            .expect("provision")
            .expect("account");

        assert!(provisioned.public_key.starts_with('A'));
        assert!(provisioned.seed.starts_with("SA"));
        assert_eq!(provisioned.user, provisioned.public_key);

        let callout = provisioned.authorization.auth_callout.as_ref().expect("map");
        assert_eq!(callout.issuer, provisioned.public_key);
        assert_eq!(callout.account, "AUTH");
        assert_eq!(callout.auth_users, vec![provisioned.public_key.clone()]);

        let users = &provisioned.account_definition.users;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user, provisioned.public_key);
        assert_eq!(users[0].password, provisioned.seed);

        let key = KeyPair::from_seed(&provisioned.seed).expect("seed");
        assert_eq!(key.public_key(), provisioned.public_key);
    }

    #[test]
    fn explicit_user_name_is_kept() {
        let provisioner = InternalAccountProvisioner::new(request(Some("AUTH"), Some("callout")));
        let provisioned = provisioner
            .provision(&options_with_accounts())
            .expect("provision")
            .expect("account");
        assert_eq!(provisioned.user, "callout");
    }

    #[test]
    fn nothing_to_do_without_internal_account() {
        let provisioner = InternalAccountProvisioner::new(request(None, None));
        assert!(provisioner
            .provision(&options_with_accounts())
            .expect("noop")
            .is_none());

        let external = InternalAccountProvisioner::new(ProvisionRequest {
            signing_key_configured: true,
            ..ProvisionRequest::default()
        });
        assert!(external
            .provision(&ServerOptions::default())
            .expect("noop")
            .is_none());
    }

    #[test]
    fn validation_order() {
        let conflict = InternalAccountProvisioner::new(ProvisionRequest {
            signing_key_configured: true,
            internal_account: Some("AUTH".to_string()),
            internal_user: Some("u".to_string()),
        });
        assert!(matches!(
            conflict.provision(&ServerOptions::default()),
            Err(ProvisionError::SigningKeyConflict)
        ));

        let orphan_user = InternalAccountProvisioner::new(request(None, Some("u")));
        assert!(matches!(
            orphan_user.provision(&ServerOptions::default()),
            Err(ProvisionError::MissingInternalAccount)
        ));

        let orphan_user_with_key = InternalAccountProvisioner::new(ProvisionRequest {
            signing_key_configured: true,
            internal_account: None,
            internal_user: Some("callout".to_string()),
        });
        assert!(matches!(
            orphan_user_with_key.provision(&ServerOptions::default()),
            Err(ProvisionError::MissingInternalAccount)
        ));

        let mut with_map = options_with_accounts();
        with_map.authorization = Some(AuthorizationMap::default());
        let custom_map = InternalAccountProvisioner::new(request(Some("AUTH"), None));
        assert!(matches!(
            custom_map.provision(&with_map),
            Err(ProvisionError::AuthorizationMapConflict)
        ));

        let no_accounts = InternalAccountProvisioner::new(request(Some("AUTH"), None));
        assert!(matches!(
            no_accounts.provision(&ServerOptions::default()),
            Err(ProvisionError::NoAccounts)
        ));
    }

    #[test]
    fn provisions_at_most_once() {
        let provisioner = InternalAccountProvisioner::new(request(Some("AUTH"), None));
        let options = options_with_accounts();
        provisioner.provision(&options).expect("first");
        assert!(matches!(
            provisioner.provision(&options),
            Err(ProvisionError::AlreadyProvisioned)
        ));
    }

    #[test]
    fn merge_appends_account_and_map() {
        let provisioner = InternalAccountProvisioner::new(request(Some("AUTH"), None));
        let mut options = options_with_accounts();
        let provisioned = provisioner
            .provision(&options)
            .expect("provision")
            .expect("account");

        options
            .merge_internal_account(&provisioned)
            .expect("merge");
        let accounts = options.accounts.as_ref().expect("accounts");
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[1].name, "AUTH");

        let credentials = options.callout_credentials().expect("credentials");
        assert_eq!(credentials.user, provisioned.public_key);
        assert_eq!(credentials.password, provisioned.seed);

        assert!(matches!(
            options.merge_internal_account(&provisioned),
            Err(ProvisionError::AlreadyProvisioned)
        ));
        assert_eq!(options.accounts.as_ref().map(Vec::len), Some(2));
    }
}

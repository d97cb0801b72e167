//! The slice of the owning server's configuration the callout service reads
//! and, during provisioning, extends.
use crate::ProvisionError;
use crate::provision::ProvisionedAccount;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    #[serde(default)]
    pub users: Vec<User>,
}

/// Points the server at the callout service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCalloutMap {
    /// Public key responses must be signed with.
    pub issuer: String,
    /// Account the callout service's own connection lives in.
    pub account: String,
    /// Users that bypass the callout (the service itself).
    #[serde(default)]
    pub auth_users: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationMap {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_callout: Option<AuthCalloutMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts: Option<Vec<Account>>,
}

impl ServerOptions {
    /// Register a provisioned internal account.
    ///
    /// Fails without touching `self` when an authorization map is already
    /// present, which includes a second merge of the same account.
    pub fn merge_internal_account(
        &mut self,
        provisioned: &ProvisionedAccount,
    ) -> Result<(), ProvisionError> {
        if self.authorization.is_some() {
            return Err(ProvisionError::AlreadyProvisioned);
        }
        let Some(accounts) = self.accounts.as_mut() else {
            return Err(ProvisionError::NoAccounts);
        };
        accounts.push(provisioned.account_definition.clone());
        self.authorization = Some(provisioned.authorization.clone());
        Ok(())
    }

    /// Credentials the callout service should connect with, if the server
    /// configuration names them.
    ///
    /// Users listed directly in the authorization map take precedence over
    /// users of the callout account.
    pub fn callout_credentials(&self) -> Option<User> {
        let authorization = self.authorization.as_ref()?;
        let callout = authorization.auth_callout.as_ref()?;
        let is_auth_user = |user: &&User| callout.auth_users.contains(&user.user);

        if !authorization.users.is_empty() {
            return authorization.users.iter().find(is_auth_user).cloned();
        }
        self.accounts
            .as_deref()?
            .iter()
            .filter(|account| account.name == callout.account)
            .flat_map(|account| account.users.iter())
            .find(is_auth_user)
            .cloned()
    }
}

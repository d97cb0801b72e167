//! Request predicates used to pick a policy.
//!
//! Every populated field of a matcher must equal the corresponding request
//! field; unset (or empty) fields match anything.
use crate::claims::AuthorizationRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Predicate over an authorization request.
pub trait RequestMatcher: fmt::Debug + Send + Sync {
    fn matches(&self, request: &AuthorizationRequest) -> bool;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectOptsMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<i32>,
}

impl RequestMatcher for ConnectOptsMatcher {
    fn matches(&self, request: &AuthorizationRequest) -> bool {
        let opts = request.connect_opts();
        field_matches(&self.username, &opts.username)
            && field_matches(&self.password, &opts.password)
            && field_matches(&self.token, &opts.token)
            && field_matches(&self.name, &opts.name)
            && field_matches(&self.lang, &opts.lang)
            && field_matches(&self.version, &opts.version)
            && self.protocol.is_none_or(|protocol| protocol == opts.protocol)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientInfoMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,
    /// `true` requires an in-process client (empty host), `false` a remote one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_process: Option<bool>,
}

impl RequestMatcher for ClientInfoMatcher {
    fn matches(&self, request: &AuthorizationRequest) -> bool {
        let info = request.client_info();
        if let Some(in_process) = self.in_process
            && in_process != info.host.is_empty()
        {
            return false;
        }
        field_matches(&self.host, &info.host)
            && field_matches(&self.user, &info.user)
            && field_matches(&self.kind, &info.kind)
            && field_matches(&self.client_type, &info.client_type)
    }
}

/// Matchers that can be declared in configuration.
///
/// ```yaml
/// match:
///   - client_info: { in_process: true }
///   - connect_opts: { username: svc }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    ConnectOpts(ConnectOptsMatcher),
    ClientInfo(ClientInfoMatcher),
}

impl Matcher {
    pub fn into_shared(self) -> Arc<dyn RequestMatcher> {
        match self {
            Matcher::ConnectOpts(matcher) => Arc::new(matcher),
            Matcher::ClientInfo(matcher) => Arc::new(matcher),
        }
    }
}

impl RequestMatcher for Matcher {
    fn matches(&self, request: &AuthorizationRequest) -> bool {
        match self {
            Matcher::ConnectOpts(matcher) => matcher.matches(request),
            Matcher::ClientInfo(matcher) => matcher.matches(request),
        }
    }
}

fn field_matches(expected: &Option<String>, actual: &str) -> bool {
    match expected.as_deref() {
        None | Some("") => true,
        Some(expected) => expected == actual,
    }
}

//! Claim documents exchanged during an authorization callout.
//!
//! Three JWT payloads travel over the bus:
//! - [`AuthorizationRequest`]: signed by the server, describes the connecting
//!   client.
//! - [`UserClaims`]: the identity the client is granted, signed by the target
//!   account key.
//! - [`AuthorizationResponse`]: the envelope sent back to the server, signed by
//!   the auth account key. It carries either an encoded `UserClaims` or an
//!   error string, never both.
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const AUTHORIZATION_REQUEST_TYPE: &str = "authorization_request";
pub const AUTHORIZATION_RESPONSE_TYPE: &str = "authorization_response";
pub const USER_CLAIMS_TYPE: &str = "user";
pub const CLAIMS_VERSION: u8 = 2;

/// Limit value meaning "unbounded".
pub const NO_LIMIT: i64 = -1;

/// Identity of the server asking for a decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerId {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
}

/// What the server observed about the connecting client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInformation {
    // Empty for in-process connections.
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, rename = "type")]
    pub client_type: String,
}

/// Options the client sent in its connect handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    #[serde(default, rename = "user")]
    pub username: String,
    #[serde(default, rename = "pass")]
    pub password: String,
    #[serde(default, rename = "auth_token")]
    pub token: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub protocol: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequestData {
    pub server_id: ServerId,
    pub user_nkey: String,
    #[serde(default)]
    pub client_info: ClientInformation,
    #[serde(default)]
    pub connect_opts: ConnectOptions,
    #[serde(rename = "type")]
    pub claim_type: String,
    #[serde(default)]
    pub version: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    #[serde(default)]
    pub iss: String,
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub aud: String,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default)]
    pub jti: String,
    pub nats: AuthorizationRequestData,
}

impl AuthorizationRequest {
    /// Build an unsigned request, as a server would before signing it.
    pub fn new(
        server_id: ServerId,
        user_nkey: impl Into<String>,
        client_info: ClientInformation,
        connect_opts: ConnectOptions,
    ) -> Self {
        let user_nkey = user_nkey.into();
        Self {
            iss: String::new(),
            sub: user_nkey.clone(),
            aud: String::new(),
            iat: now_epoch_seconds(),
            exp: None,
            jti: new_jti(),
            nats: AuthorizationRequestData {
                server_id,
                user_nkey,
                client_info,
                connect_opts,
                claim_type: AUTHORIZATION_REQUEST_TYPE.to_string(),
                version: CLAIMS_VERSION,
            },
        }
    }

    pub fn user_nkey(&self) -> &str {
        &self.nats.user_nkey
    }

    pub fn server_id(&self) -> &ServerId {
        &self.nats.server_id
    }

    pub fn client_info(&self) -> &ClientInformation {
        &self.nats.client_info
    }

    pub fn connect_opts(&self) -> &ConnectOptions {
        &self.nats.connect_opts
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

impl Permission {
    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

/// Permission for a user to publish to reply subjects of requests it received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePermission {
    #[serde(default)]
    pub max: i32,
    // Nanoseconds.
    #[serde(default)]
    pub ttl: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaimsData {
    #[serde(default, rename = "pub", skip_serializing_if = "Permission::is_empty")]
    pub publish: Permission,
    #[serde(default, rename = "sub", skip_serializing_if = "Permission::is_empty")]
    pub subscribe: Permission,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp: Option<ResponsePermission>,
    pub subs: i64,
    pub data: i64,
    pub payload: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub src: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub locale: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_connection_types: Vec<String>,
    #[serde(default)]
    pub bearer_token: bool,
    #[serde(rename = "type")]
    pub claim_type: String,
    #[serde(default)]
    pub version: u8,
}

impl Default for UserClaimsData {
    fn default() -> Self {
        Self {
            publish: Permission::default(),
            subscribe: Permission::default(),
            resp: None,
            subs: NO_LIMIT,
            data: NO_LIMIT,
            payload: NO_LIMIT,
            src: Vec::new(),
            locale: String::new(),
            allowed_connection_types: Vec::new(),
            bearer_token: false,
            claim_type: USER_CLAIMS_TYPE.to_string(),
            version: CLAIMS_VERSION,
        }
    }
}

/// Identity granted to a connecting client.
///
/// `sub` is the client's user key and `aud` names the account the client is
/// placed into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaims {
    #[serde(default)]
    pub iss: String,
    pub sub: String,
    #[serde(default)]
    pub aud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default)]
    pub jti: String,
    pub nats: UserClaimsData,
}

impl UserClaims {
    pub fn new(user_nkey: impl Into<String>) -> Self {
        Self {
            iss: String::new(),
            sub: user_nkey.into(),
            aud: String::new(),
            name: None,
            iat: now_epoch_seconds(),
            exp: None,
            jti: new_jti(),
            nats: UserClaimsData::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponseData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "type")]
    pub claim_type: String,
    #[serde(default)]
    pub version: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    #[serde(default)]
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default)]
    pub jti: String,
    pub nats: AuthorizationResponseData,
}

impl AuthorizationResponse {
    /// Envelope granting access with an encoded user claims token.
    pub fn success(request: &AuthorizationRequest, user_jwt: impl Into<String>) -> Self {
        Self::with_outcome(request, Some(user_jwt.into()), None)
    }

    /// Envelope refusing access.
    pub fn failure(request: &AuthorizationRequest, error: impl Into<String>) -> Self {
        Self::with_outcome(request, None, Some(error.into()))
    }

    fn with_outcome(
        request: &AuthorizationRequest,
        jwt: Option<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            iss: String::new(),
            sub: request.user_nkey().to_string(),
            aud: request.server_id().id.clone(),
            iat: now_epoch_seconds(),
            exp: None,
            jti: new_jti(),
            nats: AuthorizationResponseData {
                jwt,
                error,
                claim_type: AUTHORIZATION_RESPONSE_TYPE.to_string(),
                version: CLAIMS_VERSION,
            },
        }
    }

    pub fn jwt(&self) -> Option<&str> {
        self.nats.jwt.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.nats.error.as_deref()
    }
}

pub(crate) fn now_epoch_seconds() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs() as i64
}

fn new_jti() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

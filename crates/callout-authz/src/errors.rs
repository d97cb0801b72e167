use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("invalid seed: {0}")]
    InvalidSeed(String),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("missing signing key for account {0}")]
    MissingSigningKey(String),
    #[error("key encoding failed: {0}")]
    KeyEncoding(String),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("issuer mismatch: expected {expected} key, got {actual}")]
    IssuerMismatch { expected: String, actual: String },
    #[error("claim type mismatch: expected {expected}, got {actual}")]
    ClaimTypeMismatch { expected: String, actual: String },
}

pub type AuthzResult<T> = Result<T, AuthzError>;

/// Reasons a decision strategy (or the policy layer) refuses a request.
///
/// The `Display` text is meant for logs. What goes back to the connecting
/// client is [`DecisionError::wire_message`].
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("access denied")]
    AccessDenied,
    #[error("no matching policy")]
    NoMatchingPolicy,
    #[error("no target account specified")]
    NoTargetAccount,
    #[error("unable to decode session state: {0}")]
    SessionDecode(#[source] crate::SessionError),
    #[error("unable to sign user claims: {0}")]
    Signing(#[from] AuthzError),
}

impl DecisionError {
    /// Error text carried in the signed response envelope.
    ///
    /// Explicit denials and unmatched requests render identically so a client
    /// cannot discover which policies exist.
    pub fn wire_message(&self) -> &'static str {
        match self {
            DecisionError::AccessDenied | DecisionError::NoMatchingPolicy => "access denied",
            DecisionError::NoTargetAccount => "no target account specified",
            DecisionError::SessionDecode(_) => "unable to decode session state",
            DecisionError::Signing(_) => "unable to sign user claims",
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown strategy module: {0}")]
    UnknownModule(String),
    #[error("invalid settings for strategy module {module}: {source}")]
    InvalidSettings {
        module: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown session decoder: {0}")]
    UnknownSessionDecoder(String),
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("auth signing key and internal account are mutually exclusive")]
    SigningKeyConflict,
    #[error("internal account is required when using internal user")]
    MissingInternalAccount,
    #[error("internal account is not allowed when a custom authorization map is used")]
    AuthorizationMapConflict,
    #[error("internal account is not allowed when no accounts are defined")]
    NoAccounts,
    #[error("internal account already provisioned")]
    AlreadyProvisioned,
    #[error("failed to create internal auth account: {0}")]
    KeyGeneration(#[from] AuthzError),
}

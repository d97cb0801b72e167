//! Ed25519 key pairs and their printable encodings.
//!
//! # Purpose
//! Every party in the callout exchange is identified by an Ed25519 public key:
//! servers sign authorization requests, accounts sign user claims and response
//! envelopes, and users are the subjects being authorized. This module owns the
//! textual form of those keys and the seeds they are derived from.
//!
//! # Key invariants
//! - Public keys render as a one-letter role prefix (`A` account, `U` user,
//!   `N` server) followed by 64 lowercase hex characters.
//! - Seeds render as `S` plus the role prefix followed by the 32-byte seed in
//!   hex. A seed always reproduces the same public key.
//! - The PKCS8 encoding needed by `jsonwebtoken` is computed once per key pair
//!   and reused for every signature.
//!
//! # Security
//! Seeds are private key material. `KeyPair`'s `Debug` output only shows the
//! public key, and callers must never log [`KeyPair::seed`].
use crate::{AuthzError, AuthzResult};
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use jsonwebtoken::EncodingKey;
use rand::RngCore;
use std::fmt;

const ED25519_KEY_LEN: usize = 32;

/// Role a key plays in the callout exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Account,
    User,
    Server,
}

impl KeyKind {
    const ALL: [KeyKind; 3] = [KeyKind::Account, KeyKind::User, KeyKind::Server];

    pub fn public_prefix(self) -> char {
        match self {
            KeyKind::Account => 'A',
            KeyKind::User => 'U',
            KeyKind::Server => 'N',
        }
    }

    pub fn seed_prefix(self) -> &'static str {
        match self {
            KeyKind::Account => "SA",
            KeyKind::User => "SU",
            KeyKind::Server => "SN",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyKind::Account => "account",
            KeyKind::User => "user",
            KeyKind::Server => "server",
        }
    }

    fn from_public_prefix(prefix: char) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.public_prefix() == prefix)
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An Ed25519 key pair tagged with its role.
///
/// # Examples
/// ```rust
/// use callout_authz::{KeyKind, KeyPair};
///
/// let pair = KeyPair::generate(KeyKind::Account).expect("generate");
/// let restored = KeyPair::from_seed(&pair.seed()).expect("restore");
/// assert_eq!(pair.public_key(), restored.public_key());
/// assert!(pair.public_key().starts_with('A'));
/// ```
#[derive(Clone)]
pub struct KeyPair {
    kind: KeyKind,
    signing_key: SigningKey,
    encoding_key: EncodingKey,
}

impl KeyPair {
    /// Generate a fresh key pair from OS randomness.
    ///
    /// # Errors
    /// - [`AuthzError::KeyEncoding`] if the PKCS8 conversion fails.
    pub fn generate(kind: KeyKind) -> AuthzResult<Self> {
        let mut seed = [0u8; ED25519_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_raw_seed(kind, seed)
    }

    /// Restore a key pair from its printable seed (`SA…`, `SU…`, `SN…`).
    ///
    /// # Errors
    /// - [`AuthzError::InvalidSeed`] when the prefix is unknown or the body is
    ///   not 32 bytes of hex.
    pub fn from_seed(seed: &str) -> AuthzResult<Self> {
        let seed = seed.trim();
        let kind = KeyKind::ALL
            .into_iter()
            .find(|kind| seed.starts_with(kind.seed_prefix()))
            .ok_or_else(|| AuthzError::InvalidSeed("unknown seed prefix".to_string()))?;
        let raw = decode_key_bytes(&seed[kind.seed_prefix().len()..])
            .ok_or_else(|| AuthzError::InvalidSeed("seed body must be 32 hex bytes".to_string()))?;
        Self::from_raw_seed(kind, raw)
    }

    fn from_raw_seed(kind: KeyKind, seed: [u8; ED25519_KEY_LEN]) -> AuthzResult<Self> {
        let signing_key = SigningKey::from_bytes(&seed);
        // jsonwebtoken only accepts Ed25519 private keys as PKCS8 DER.
        let der = signing_key
            .to_pkcs8_der()
            .map_err(|err| AuthzError::KeyEncoding(err.to_string()))?;
        let encoding_key = EncodingKey::from_ed_der(der.as_bytes());
        Ok(Self {
            kind,
            signing_key,
            encoding_key,
        })
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Fail unless this pair plays the `expected` role.
    ///
    /// # Errors
    /// - [`AuthzError::InvalidSeed`] naming both roles.
    pub fn require_kind(self, expected: KeyKind) -> AuthzResult<Self> {
        if self.kind != expected {
            return Err(AuthzError::InvalidSeed(format!(
                "expected {expected} seed, got {}",
                self.kind
            )));
        }
        Ok(self)
    }

    pub fn public_key(&self) -> String {
        encode_public_key(self.kind, &self.signing_key.verifying_key().to_bytes())
    }

    /// Printable seed. Treat as a secret.
    pub fn seed(&self) -> String {
        format!(
            "{}{}",
            self.kind.seed_prefix(),
            hex::encode(self.signing_key.to_bytes())
        )
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("kind", &self.kind)
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

pub fn encode_public_key(kind: KeyKind, bytes: &[u8; ED25519_KEY_LEN]) -> String {
    format!("{}{}", kind.public_prefix(), hex::encode(bytes))
}

/// Split a printable public key into its role and raw Ed25519 bytes.
pub fn decode_public_key(value: &str) -> AuthzResult<(KeyKind, [u8; ED25519_KEY_LEN])> {
    let mut chars = value.chars();
    let kind = chars
        .next()
        .and_then(KeyKind::from_public_prefix)
        .ok_or_else(|| AuthzError::InvalidPublicKey(value.to_string()))?;
    let bytes = decode_key_bytes(chars.as_str())
        .ok_or_else(|| AuthzError::InvalidPublicKey(value.to_string()))?;
    Ok((kind, bytes))
}

fn decode_key_bytes(body: &str) -> Option<[u8; ED25519_KEY_LEN]> {
    let bytes = hex::decode(body).ok()?;
    bytes.try_into().ok()
}

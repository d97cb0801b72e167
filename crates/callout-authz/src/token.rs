use crate::claims::{
    AUTHORIZATION_REQUEST_TYPE, AUTHORIZATION_RESPONSE_TYPE, AuthorizationRequest,
    AuthorizationResponse, USER_CLAIMS_TYPE, UserClaims,
};
use crate::keys::{KeyKind, KeyPair, decode_public_key};
use crate::{AuthzError, AuthzResult};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Claim documents that are exchanged as self-signed JWTs.
///
/// Tokens are verified against the public key named in their own `iss`
/// claim, so the issuer field doubles as the verification key.
pub trait SignedClaims: Serialize + DeserializeOwned {
    /// Value of the `nats.type` discriminator.
    const CLAIM_TYPE: &'static str;

    fn issuer(&self) -> &str;
    fn set_issuer(&mut self, issuer: String);
    fn claim_type(&self) -> &str;
}

impl SignedClaims for AuthorizationRequest {
    const CLAIM_TYPE: &'static str = AUTHORIZATION_REQUEST_TYPE;

    fn issuer(&self) -> &str {
        &self.iss
    }

    fn set_issuer(&mut self, issuer: String) {
        self.iss = issuer;
    }

    fn claim_type(&self) -> &str {
        &self.nats.claim_type
    }
}

impl SignedClaims for UserClaims {
    const CLAIM_TYPE: &'static str = USER_CLAIMS_TYPE;

    fn issuer(&self) -> &str {
        &self.iss
    }

    fn set_issuer(&mut self, issuer: String) {
        self.iss = issuer;
    }

    fn claim_type(&self) -> &str {
        &self.nats.claim_type
    }
}

impl SignedClaims for AuthorizationResponse {
    const CLAIM_TYPE: &'static str = AUTHORIZATION_RESPONSE_TYPE;

    fn issuer(&self) -> &str {
        &self.iss
    }

    fn set_issuer(&mut self, issuer: String) {
        self.iss = issuer;
    }

    fn claim_type(&self) -> &str {
        &self.nats.claim_type
    }
}

/// Stamp `key` as the issuer of `claims` and encode them as an EdDSA JWT.
pub fn sign<C: SignedClaims>(claims: &mut C, key: &KeyPair) -> AuthzResult<String> {
    claims.set_issuer(key.public_key());
    let mut header = Header::new(Algorithm::EdDSA);
    header.typ = Some("JWT".to_string());
    Ok(jsonwebtoken::encode(&header, claims, key.encoding_key())?)
}

/// Decode and verify a token signed by a key of the `expected` kind.
///
/// `exp` is optional but enforced when present; `aud` is not checked here.
pub fn verify<C: SignedClaims>(token: &str, expected: KeyKind) -> AuthzResult<C> {
    let issuer = unverified_issuer(token)?;
    let (kind, public_key) = decode_public_key(&issuer)?;
    if kind != expected {
        return Err(AuthzError::IssuerMismatch {
            expected: expected.to_string(),
            actual: kind.to_string(),
        });
    }

    let decoding_key = DecodingKey::from_ed_components(&URL_SAFE_NO_PAD.encode(public_key))?;
    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.required_spec_claims.clear();
    validation.validate_aud = false;

    let claims = jsonwebtoken::decode::<C>(token, &decoding_key, &validation)?.claims;
    if claims.issuer() != issuer {
        return Err(AuthzError::MalformedToken("issuer changed during decode".to_string()));
    }
    if claims.claim_type() != C::CLAIM_TYPE {
        return Err(AuthzError::ClaimTypeMismatch {
            expected: C::CLAIM_TYPE.to_string(),
            actual: claims.claim_type().to_string(),
        });
    }
    Ok(claims)
}

pub fn verify_request(token: &[u8]) -> AuthzResult<AuthorizationRequest> {
    let token = std::str::from_utf8(token)
        .map_err(|_| AuthzError::MalformedToken("request is not utf-8".to_string()))?;
    verify(token.trim(), KeyKind::Server)
}

fn unverified_issuer(token: &str) -> AuthzResult<String> {
    // Only the issuer is read before verification; it selects the key that
    // the signature is then checked against.
    #[derive(serde::Deserialize)]
    struct IssuerOnly {
        #[serde(default)]
        iss: String,
    }

    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthzError::MalformedToken("token format".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthzError::MalformedToken("token payload".to_string()))?;
    let parsed: IssuerOnly = serde_json::from_slice(&bytes)
        .map_err(|err| AuthzError::MalformedToken(format!("token payload: {err}")))?;
    if parsed.iss.is_empty() {
        return Err(AuthzError::MalformedToken("missing issuer".to_string()));
    }
    Ok(parsed.iss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{ClientInformation, ConnectOptions, ServerId};

    fn request() -> AuthorizationRequest {
        AuthorizationRequest::new(
            ServerId {
                id: "NSERVER".to_string(),
                ..ServerId::default()
            },
            "UCLIENT",
            ClientInformation::default(),
            ConnectOptions::default(),
        )
    }

    #[test]
    fn signed_request_verifies_against_issuer() {
        let server = KeyPair::generate(KeyKind::Server).expect("server key");
        let mut req = request();
        let token = sign(&mut req, &server).expect("sign");

        let decoded = verify_request(token.as_bytes()).expect("verify");
        assert_eq!(decoded.iss, server.public_key());
        assert_eq!(decoded.user_nkey(), "UCLIENT");
    }

    #[test]
    fn rejects_tampered_signature() {
        let server = KeyPair::generate(KeyKind::Server).expect("server key");
        let mut req = request();
        let token = sign(&mut req, &server).expect("sign");

        let forged_payload = {
            let mut forged = req.clone();
            forged.nats.user_nkey = "UOTHER".to_string();
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).expect("json"))
        };
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = &forged_payload;
        let forged = parts.join(".");

        let err = verify_request(forged.as_bytes()).expect_err("tampered");
        assert!(matches!(err, AuthzError::Jwt(_)));
    }

    #[test]
    fn rejects_wrong_issuer_kind() {
        let account = KeyPair::generate(KeyKind::Account).expect("account key");
        let mut req = request();
        let token = sign(&mut req, &account).expect("sign");

        let err = verify_request(token.as_bytes()).expect_err("kind");
        assert!(matches!(err, AuthzError::IssuerMismatch { .. }));
    }

    #[test]
    fn rejects_wrong_claim_type() {
        let account = KeyPair::generate(KeyKind::Account).expect("account key");
        let mut claims = UserClaims::new("UCLIENT");
        let token = sign(&mut claims, &account).expect("sign");

        let err = verify::<AuthorizationResponse>(&token, KeyKind::Account).expect_err("type");
        assert!(matches!(err, AuthzError::ClaimTypeMismatch { .. }));
    }

    #[test]
    fn rejects_expired_tokens() {
        let server = KeyPair::generate(KeyKind::Server).expect("server key");
        let mut req = request();
        req.exp = Some(req.iat - 3600);
        let token = sign(&mut req, &server).expect("sign");

        let err = verify_request(token.as_bytes()).expect_err("expired");
        assert!(matches!(err, AuthzError::Jwt(_)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            verify_request(b"not-a-token").expect_err("garbage"),
            AuthzError::MalformedToken(_)
        ));
        assert!(matches!(
            verify_request(&[0xff, 0xfe]).expect_err("utf8"),
            AuthzError::MalformedToken(_)
        ));
    }
}

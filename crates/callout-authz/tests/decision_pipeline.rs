use callout_authz::{
    AllowStrategy, AuthorizationRequest, AuthorizationResponse, ClientInfoMatcher,
    ClientInformation, ConnectOptions, DecisionContext, DecisionError, KeyKind, KeyPair, Matcher,
    Policy, PolicySet, ServerId, Strategy, UserClaims, sign, verify, verify_request,
};
use std::sync::Arc;

fn signed_request(server: &KeyPair, kind: &str, username: &str) -> String {
    let mut request = AuthorizationRequest::new(
        ServerId {
            id: server.public_key(),
            ..ServerId::default()
        },
        "U1",
        ClientInformation {
            kind: kind.to_string(),
            ..ClientInformation::default()
        },
        ConnectOptions {
            username: username.to_string(),
            ..ConnectOptions::default()
        },
    );
    sign(&mut request, server).expect("sign request")
}

fn leaf_deny_then_allow() -> PolicySet {
    PolicySet::new(
        vec![Policy::from_matchers(
            vec![Matcher::ClientInfo(ClientInfoMatcher {
                kind: Some("leaf".to_string()),
                ..ClientInfoMatcher::default()
            })],
            Strategy::Deny(callout_authz::DenyStrategy),
        )],
        Some(Strategy::Allow(AllowStrategy::new())),
    )
}

async fn decide(policies: &PolicySet, token: &str) -> Result<UserClaims, DecisionError> {
    let request = Arc::new(verify_request(token.as_bytes()).expect("verify request"));
    let mut ctx = DecisionContext::new(request);
    policies.authorize(&mut ctx).await
}

#[tokio::test]
async fn non_matching_policy_falls_through_to_default() {
    let server = KeyPair::generate(KeyKind::Server).expect("server");
    let auth = KeyPair::generate(KeyKind::Account).expect("auth");
    let token = signed_request(&server, "client", "acct-9");
    let request = verify_request(token.as_bytes()).expect("verify request");

    let mut claims = decide(&leaf_deny_then_allow(), &token)
        .await
        .expect("allowed");
    assert_eq!(claims.sub, "U1");
    assert_eq!(claims.aud, "acct-9");

    let jwt = sign(&mut claims, &auth).expect("sign claims");
    let mut response = AuthorizationResponse::success(&request, jwt);
    let envelope = sign(&mut response, &auth).expect("sign envelope");

    let decoded: AuthorizationResponse = verify(&envelope, KeyKind::Account).expect("verify");
    assert_eq!(decoded.aud, server.public_key());
    assert_eq!(decoded.iss, auth.public_key());
    let user: UserClaims = verify(decoded.jwt().expect("jwt"), KeyKind::Account).expect("user");
    assert_eq!(user.aud, "acct-9");
}

#[tokio::test]
async fn matching_policy_short_circuits() {
    let server = KeyPair::generate(KeyKind::Server).expect("server");
    let token = signed_request(&server, "leaf", "acct-9");
    let err = decide(&leaf_deny_then_allow(), &token)
        .await
        .expect_err("denied");
    assert!(matches!(err, DecisionError::AccessDenied));
    assert_eq!(err.wire_message(), "access denied");
}

#[tokio::test]
async fn empty_policy_set_rejects_like_a_deny() {
    let server = KeyPair::generate(KeyKind::Server).expect("server");
    let token = signed_request(&server, "client", "acct-9");
    let err = decide(&PolicySet::new(Vec::new(), None), &token)
        .await
        .expect_err("unmatched");
    assert!(matches!(err, DecisionError::NoMatchingPolicy));
    assert_eq!(err.wire_message(), DecisionError::AccessDenied.wire_message());
}

#[test]
fn single_key_tokens_verify_independently() {
    let key = KeyPair::generate(KeyKind::Account).expect("key");
    let mut first = UserClaims::new("U1");
    first.aud = "acct-1".to_string();
    let mut second = first.clone();

    let a = sign(&mut first, &key).expect("first");
    let b = sign(&mut second, &key).expect("second");
    for token in [a, b] {
        let claims: UserClaims = verify(&token, KeyKind::Account).expect("verify");
        assert_eq!(claims.iss, key.public_key());
    }
}

#![allow(dead_code)]

use bytes::Bytes;
use callout::bootstrap::{Bootstrap, build_service};
use callout::config::CalloutConfig;
use callout_authz::{
    AuthorizationRequest, AuthorizationResponse, ClientInformation, ConnectOptions, KeyKind,
    KeyPair, ServerId, ServerOptions, StrategyRegistry, sign, verify,
};
use callout_bus::{BusConnection, BusError, InProcessBus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const SUBJECT: &str = "$SYS.REQ.USER.AUTH";
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

/// Base configuration; callers pick a signing mode.
pub fn config() -> CalloutConfig {
    CalloutConfig {
        metrics_bind: "127.0.0.1:0".parse().expect("addr"),
        subject: SUBJECT.to_string(),
        queue_group: "auth_callout".to_string(),
        auth_account: "AUTH".to_string(),
        signing_key: None,
        keystore: HashMap::new(),
        internal_account: None,
        internal_user: None,
        session_decoders: HashMap::new(),
        policies: Vec::new(),
        default_strategy: None,
        pinned_accounts: Vec::new(),
        server: ServerOptions::default(),
    }
}

pub fn config_from_yaml(yaml: &str) -> CalloutConfig {
    let mut config = config();
    config.apply_yaml(yaml).expect("yaml");
    config
}

pub struct Harness {
    pub bus: InProcessBus,
    pub bootstrap: Bootstrap,
    pub server_key: KeyPair,
}

impl Harness {
    pub async fn start(config: CalloutConfig) -> Self {
        let mut server = config.server.clone();
        let bootstrap =
            build_service(&config, &mut server, &StrategyRegistry::default()).expect("build");
        let bus = InProcessBus::new();
        bootstrap
            .service
            .start(Arc::new(bus.clone()))
            .await
            .expect("start");
        Self {
            bus,
            bootstrap,
            server_key: KeyPair::generate(KeyKind::Server).expect("server key"),
        }
    }

    /// Signed request as the server would publish it.
    pub fn request(&self, connect_opts: ConnectOptions) -> (AuthorizationRequest, Bytes) {
        let user = KeyPair::generate(KeyKind::User).expect("user key");
        let mut request = AuthorizationRequest::new(
            ServerId {
                name: "n1".to_string(),
                id: self.server_key.public_key(),
                ..ServerId::default()
            },
            user.public_key(),
            ClientInformation {
                host: "10.0.0.7".to_string(),
                kind: "Client".to_string(),
                ..ClientInformation::default()
            },
            connect_opts,
        );
        let token = sign(&mut request, &self.server_key).expect("sign request");
        (request, Bytes::from(token))
    }

    pub async fn send(&self, payload: Bytes) -> Result<AuthorizationResponse, BusError> {
        let reply = self.bus.request(SUBJECT, payload, REQUEST_TIMEOUT).await?;
        let token = std::str::from_utf8(&reply.payload).expect("utf-8");
        Ok(verify(token, KeyKind::Account).expect("verify response"))
    }

    pub async fn authorize(&self, connect_opts: ConnectOptions) -> AuthorizationResponse {
        let (request, payload) = self.request(connect_opts);
        let response = self.send(payload).await.expect("reply");
        assert_eq!(response.sub, request.user_nkey());
        assert_eq!(response.aud, self.server_key.public_key());
        response
    }

    pub async fn stop(&self) {
        self.bootstrap.service.stop().await;
    }
}

pub fn user(username: &str, password: &str) -> ConnectOptions {
    ConnectOptions {
        username: username.to_string(),
        password: password.to_string(),
        ..ConnectOptions::default()
    }
}

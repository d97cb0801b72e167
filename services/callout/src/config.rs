use anyhow::{Context, Result, bail};
use callout_authz::{PolicyConfig, ServerOptions, StrategyConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;

pub const DEFAULT_SUBJECT: &str = "$SYS.REQ.USER.AUTH";
pub const DEFAULT_AUTH_ACCOUNT: &str = "AUTH";
pub const DEFAULT_QUEUE_GROUP: &str = "auth_callout";
const DEFAULT_METRICS_BIND: &str = "0.0.0.0:8080";

// Callout service configuration sourced from environment variables with an
// optional YAML file layered on top.
#[derive(Debug, Clone)]
pub struct CalloutConfig {
    // Metrics and health HTTP listener bind address.
    pub metrics_bind: SocketAddr,
    // Subject the server publishes authorization requests on.
    pub subject: String,
    // Queue group shared by service replicas.
    pub queue_group: String,
    // Account whose key signs response envelopes in keystore mode.
    pub auth_account: String,
    // Seed used for every signature (single-key mode).
    pub signing_key: Option<String>,
    // Account name -> seed (keystore mode).
    pub keystore: HashMap<String, String>,
    // Account to provision when no signing key is given.
    pub internal_account: Option<String>,
    // User name for the provisioned account.
    pub internal_user: Option<String>,
    // Named session decoders for `session` strategies.
    pub session_decoders: HashMap<String, SessionDecoderConfig>,
    // Ordered policies; first match wins.
    pub policies: Vec<PolicyConfig>,
    // Strategy for requests no policy matches.
    pub default_strategy: Option<StrategyConfig>,
    // Accounts that get a pinned connect token at startup.
    pub pinned_accounts: Vec<String>,
    // Owning-server options the internal account is merged into.
    pub server: ServerOptions,
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionDecoderConfig {
    // HS256 secret shared with the session issuer.
    pub cookie_secret: String,
    #[serde(default)]
    pub leeway_seconds: u64,
}

impl std::fmt::Debug for SessionDecoderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDecoderConfig")
            .field("cookie_secret", &"<redacted>")
            .field("leeway_seconds", &self.leeway_seconds)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CalloutConfigOverride {
    metrics_bind: Option<String>,
    subject: Option<String>,
    queue_group: Option<String>,
    auth_account: Option<String>,
    signing_key: Option<String>,
    keystore: Option<HashMap<String, String>>,
    internal_account: Option<String>,
    internal_user: Option<String>,
    session_decoders: Option<HashMap<String, SessionDecoderConfig>>,
    policies: Option<Vec<PolicyConfig>>,
    default: Option<StrategyConfig>,
    pinned_accounts: Option<Vec<String>>,
    server: Option<ServerOptions>,
}

impl CalloutConfig {
    pub fn from_env() -> Result<Self> {
        let metrics_bind = std::env::var("CALLOUT_METRICS_BIND")
            .unwrap_or_else(|_| DEFAULT_METRICS_BIND.to_string())
            .parse()
            .with_context(|| "parse CALLOUT_METRICS_BIND")?;
        let subject =
            non_empty_env("CALLOUT_SUBJECT").unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
        let queue_group =
            non_empty_env("CALLOUT_QUEUE_GROUP").unwrap_or_else(|| DEFAULT_QUEUE_GROUP.to_string());
        let auth_account = non_empty_env("CALLOUT_AUTH_ACCOUNT")
            .unwrap_or_else(|| DEFAULT_AUTH_ACCOUNT.to_string());

        Ok(Self {
            metrics_bind,
            subject,
            queue_group,
            auth_account,
            signing_key: non_empty_env("CALLOUT_SIGNING_KEY"),
            keystore: HashMap::new(),
            internal_account: non_empty_env("CALLOUT_INTERNAL_ACCOUNT"),
            internal_user: non_empty_env("CALLOUT_INTERNAL_USER"),
            session_decoders: HashMap::new(),
            policies: Vec::new(),
            default_strategy: None,
            pinned_accounts: Vec::new(),
            server: ServerOptions::default(),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("CALLOUT_CONFIG") {
            // YAML overrides carry the structured settings env vars cannot.
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read CALLOUT_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: CalloutConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse callout config yaml")?;
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.subject
            && !value.is_empty()
        {
            self.subject = value;
        }
        if let Some(value) = override_cfg.queue_group
            && !value.is_empty()
        {
            self.queue_group = value;
        }
        if let Some(value) = override_cfg.auth_account
            && !value.is_empty()
        {
            self.auth_account = value;
        }
        if let Some(value) = override_cfg.signing_key {
            self.signing_key = Some(value).filter(|value| !value.is_empty());
        }
        if let Some(value) = override_cfg.keystore {
            self.keystore = value;
        }
        if let Some(value) = override_cfg.internal_account {
            self.internal_account = Some(value).filter(|value| !value.is_empty());
        }
        if let Some(value) = override_cfg.internal_user {
            self.internal_user = Some(value).filter(|value| !value.is_empty());
        }
        if let Some(value) = override_cfg.session_decoders {
            self.session_decoders = value;
        }
        if let Some(value) = override_cfg.policies {
            self.policies = value;
        }
        if let Some(value) = override_cfg.default {
            self.default_strategy = Some(value);
        }
        if let Some(value) = override_cfg.pinned_accounts {
            self.pinned_accounts = value;
        }
        if let Some(value) = override_cfg.server {
            self.server = value;
        }
        Ok(())
    }

    /// Reject combinations that cannot produce a working signer.
    ///
    /// Provisioning-specific checks (internal user without account, conflicts
    /// with the server's authorization map) happen in the provisioner.
    pub fn validate(&self) -> Result<()> {
        if self.signing_key.is_some() && !self.keystore.is_empty() {
            bail!("signing_key and keystore are mutually exclusive");
        }
        if self.signing_key.is_some() && self.internal_account.is_some() {
            bail!("auth signing key and internal account are mutually exclusive");
        }
        if !self.keystore.is_empty() && self.internal_account.is_some() {
            bail!("keystore and internal account are mutually exclusive");
        }
        if self.signing_key.is_none() && self.keystore.is_empty() && self.internal_account.is_none()
        {
            bail!("one of signing_key, keystore, or internal_account is required");
        }
        let referenced = self
            .policies
            .iter()
            .map(|policy| &policy.strategy)
            .chain(self.default_strategy.iter())
            .filter(|strategy| strategy.module == "session")
            .filter_map(|strategy| strategy.settings.get("decoder"))
            .filter_map(|decoder| decoder.as_str());
        for decoder in referenced {
            if !self.session_decoders.contains_key(decoder) {
                bail!("policy references unknown session decoder {decoder:?}");
            }
        }
        Ok(())
    }

    pub fn keystore_mode(&self) -> bool {
        self.signing_key.is_none() && !self.keystore.is_empty()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

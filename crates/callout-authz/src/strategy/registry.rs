use super::{AllowStrategy, DenyStrategy, SessionDecoder, SessionStrategy, Strategy};
use crate::RegistryError;
use crate::template::Template;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Named session decoders available to `session` strategies.
pub type SessionDecoders = HashMap<String, Arc<dyn SessionDecoder>>;

/// Strategy declaration as it appears in configuration.
///
/// `module` selects the builder; every other key is handed to it.
///
/// ```yaml
/// module: allow
/// account: "{connect_opts.username}"
/// template:
///   allow_pub: ["users.{connect_opts.username}.>"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub module: String,
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl StrategyConfig {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            settings: Map::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    fn parse<T: DeserializeOwned>(&self) -> Result<T, RegistryError> {
        serde_json::from_value(Value::Object(self.settings.clone())).map_err(|source| {
            RegistryError::InvalidSettings {
                module: self.module.clone(),
                source,
            }
        })
    }
}

/// Dependencies a builder may draw on.
pub struct StrategyBuildContext<'a> {
    pub session_decoders: &'a SessionDecoders,
}

pub type StrategyBuilder = Arc<
    dyn Fn(&StrategyConfig, &StrategyBuildContext<'_>) -> Result<Strategy, RegistryError>
        + Send
        + Sync,
>;

/// Maps `module` discriminators to strategy builders.
#[derive(Clone)]
pub struct StrategyRegistry {
    builders: HashMap<String, StrategyBuilder>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("allow", Arc::new(build_allow));
        registry.register("deny", Arc::new(build_deny));
        registry.register("session", Arc::new(build_session));
        registry
    }
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Register (or replace) the builder for `module`.
    pub fn register(&mut self, module: impl Into<String>, builder: StrategyBuilder) {
        self.builders.insert(module.into(), builder);
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    pub fn build(
        &self,
        config: &StrategyConfig,
        ctx: &StrategyBuildContext<'_>,
    ) -> Result<Strategy, RegistryError> {
        let builder = self
            .builders
            .get(&config.module)
            .ok_or_else(|| RegistryError::UnknownModule(config.module.clone()))?;
        builder(config, ctx)
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut modules: Vec<_> = self.modules().collect();
        modules.sort_unstable();
        f.debug_struct("StrategyRegistry")
            .field("modules", &modules)
            .finish()
    }
}

fn build_allow(
    config: &StrategyConfig,
    _ctx: &StrategyBuildContext<'_>,
) -> Result<Strategy, RegistryError> {
    Ok(Strategy::Allow(config.parse::<AllowStrategy>()?))
}

fn build_deny(
    config: &StrategyConfig,
    _ctx: &StrategyBuildContext<'_>,
) -> Result<Strategy, RegistryError> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct DenySettings {}

    config.parse::<DenySettings>()?;
    Ok(Strategy::Deny(DenyStrategy))
}

fn build_session(
    config: &StrategyConfig,
    ctx: &StrategyBuildContext<'_>,
) -> Result<Strategy, RegistryError> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct SessionSettings {
        decoder: String,
        #[serde(default)]
        account: Option<String>,
        #[serde(default)]
        template: Option<Template>,
    }

    let settings = config.parse::<SessionSettings>()?;
    let decoder = ctx
        .session_decoders
        .get(&settings.decoder)
        .cloned()
        .ok_or(RegistryError::UnknownSessionDecoder(settings.decoder))?;

    let mut strategy = SessionStrategy::new(decoder);
    if let Some(account) = settings.account {
        strategy = strategy.with_account(account);
    }
    if let Some(template) = settings.template {
        strategy = strategy.with_template(template);
    }
    Ok(Strategy::Session(strategy))
}

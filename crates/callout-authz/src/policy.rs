//! Ordered policies that route requests to strategies.
//!
//! Selection is first-match-wins over the declared order, then the default
//! strategy, then nothing. A policy with no matchers never matches.
use crate::DecisionError;
use crate::RegistryError;
use crate::claims::{AuthorizationRequest, UserClaims};
use crate::matcher::{Matcher, RequestMatcher};
use crate::strategy::{
    DecisionContext, DecisionStrategy, Strategy, StrategyBuildContext, StrategyConfig,
    StrategyRegistry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Policy declaration as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "match", default)]
    pub matchers: Vec<Matcher>,
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone)]
pub struct Policy {
    name: Option<String>,
    matchers: Vec<Arc<dyn RequestMatcher>>,
    strategy: Arc<Strategy>,
}

impl Policy {
    pub fn new(matchers: Vec<Arc<dyn RequestMatcher>>, strategy: Strategy) -> Self {
        Self {
            name: None,
            matchers,
            strategy: Arc::new(strategy),
        }
    }

    pub fn from_matchers(matchers: Vec<Matcher>, strategy: Strategy) -> Self {
        Self::new(
            matchers.into_iter().map(Matcher::into_shared).collect(),
            strategy,
        )
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn strategy(&self) -> &Arc<Strategy> {
        &self.strategy
    }

    pub fn matches(&self, request: &AuthorizationRequest) -> bool {
        !self.matchers.is_empty() && self.matchers.iter().all(|m| m.matches(request))
    }
}

/// Outcome of policy selection.
#[derive(Debug, Clone)]
pub struct Selection {
    pub strategy: Arc<Strategy>,
    /// Index of the matching policy; `None` when the default was used.
    pub policy: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: Vec<Policy>,
    default: Option<Arc<Strategy>>,
}

impl PolicySet {
    pub fn new(policies: Vec<Policy>, default: Option<Strategy>) -> Self {
        Self {
            policies,
            default: default.map(Arc::new),
        }
    }

    /// Build every policy (and the default) through `registry`.
    pub fn from_config(
        policies: &[PolicyConfig],
        default: Option<&StrategyConfig>,
        registry: &StrategyRegistry,
        ctx: &StrategyBuildContext<'_>,
    ) -> Result<Self, RegistryError> {
        let mut built = Vec::with_capacity(policies.len());
        for config in policies {
            let strategy = registry.build(&config.strategy, ctx)?;
            let mut policy = Policy::from_matchers(config.matchers.clone(), strategy);
            if let Some(name) = &config.name {
                policy = policy.with_name(name.clone());
            }
            built.push(policy);
        }
        let default = default
            .map(|config| registry.build(config, ctx))
            .transpose()?;
        Ok(Self::new(built, default))
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    pub fn select(&self, request: &AuthorizationRequest) -> Option<Selection> {
        if let Some((index, policy)) = self
            .policies
            .iter()
            .enumerate()
            .find(|(_, policy)| policy.matches(request))
        {
            return Some(Selection {
                strategy: policy.strategy.clone(),
                policy: Some(index),
            });
        }
        self.default.as_ref().map(|strategy| Selection {
            strategy: strategy.clone(),
            policy: None,
        })
    }

    /// Select a strategy for the request in `ctx` and run it.
    pub async fn authorize(&self, ctx: &mut DecisionContext) -> Result<UserClaims, DecisionError> {
        let selection = self
            .select(ctx.request())
            .ok_or(DecisionError::NoMatchingPolicy)?;
        debug!(
            module = selection.strategy.module(),
            policy = ?selection.policy,
            "policy selected"
        );
        selection.strategy.decide(ctx).await
    }
}

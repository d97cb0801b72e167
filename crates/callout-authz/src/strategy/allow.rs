use super::{DecisionContext, DecisionStrategy, resolve_target_account};
use crate::DecisionError;
use crate::claims::UserClaims;
use crate::template::Template;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Grants every request it is asked about.
///
/// `account` may contain placeholders; when unset the connect username is
/// used as the target account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllowStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
}

impl AllowStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_template(mut self, template: Template) -> Self {
        self.template = Some(template);
        self
    }
}

#[async_trait]
impl DecisionStrategy for AllowStrategy {
    fn module(&self) -> &str {
        "allow"
    }

    async fn decide(&self, ctx: &mut DecisionContext) -> Result<UserClaims, DecisionError> {
        let mut claims = UserClaims::new(ctx.request().user_nkey());
        if let Some(template) = &self.template {
            template.render(ctx.replacer(), &mut claims);
        }
        claims.aud = resolve_target_account(ctx, self.account.as_deref())?;
        Ok(claims)
    }
}

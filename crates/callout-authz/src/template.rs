use crate::claims::{ResponsePermission, UserClaims};
use crate::replacer::Replacer;
use serde::{Deserialize, Serialize};

/// Shape of the user claims granted by a strategy.
///
/// String fields may contain `{placeholders}`. Known placeholders are
/// substituted and unknown ones are kept verbatim. Entries that render empty
/// are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Template {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow_pub: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deny_pub: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow_sub: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deny_sub: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_responses: Option<ResponsePermission>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_subscriptions: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_data: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub src: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_connection_types: Vec<String>,
    pub bearer_token: bool,
}

impl Template {
    /// Fill `claims` from this template.
    ///
    /// Limits left unset keep whatever `claims` already holds.
    pub fn render(&self, replacer: &Replacer, claims: &mut UserClaims) {
        if let Some(name) = &self.name {
            let name = replacer.replace_known(name);
            claims.name = (!name.is_empty()).then_some(name);
        }

        let nats = &mut claims.nats;
        nats.publish.allow = render_list(replacer, &self.allow_pub);
        nats.publish.deny = render_list(replacer, &self.deny_pub);
        nats.subscribe.allow = render_list(replacer, &self.allow_sub);
        nats.subscribe.deny = render_list(replacer, &self.deny_sub);
        nats.resp = self.allow_responses.clone();

        if let Some(subs) = self.max_subscriptions {
            nats.subs = subs;
        }
        if let Some(data) = self.max_data {
            nats.data = data;
        }
        if let Some(payload) = self.max_payload {
            nats.payload = payload;
        }

        nats.src = render_list(replacer, &self.src);
        if let Some(locale) = &self.locale {
            nats.locale = replacer.replace_known(locale);
        }
        nats.allowed_connection_types = self.allowed_connection_types.clone();
        nats.bearer_token = self.bearer_token;
    }
}

fn render_list(replacer: &Replacer, entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| replacer.replace_known(entry))
        .filter(|entry| !entry.is_empty())
        .collect()
}

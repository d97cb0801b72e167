//! `{placeholder}` substitution for templates and account names.
//!
//! A [`Replacer`] holds explicit bindings plus an ordered chain of
//! [`Resolver`]s. Lookups try the bindings first, then each resolver in the
//! order it was added; the first hit wins.
//!
//! Two substitution modes exist:
//! - [`Replacer::replace_all`] swaps unknown placeholders for a fixed string.
//! - [`Replacer::replace_known`] leaves unknown placeholders untouched.
use crate::claims::AuthorizationRequest;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Source of placeholder values.
pub trait Resolver: Send + Sync {
    fn resolve(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Default)]
pub struct Replacer {
    bindings: HashMap<String, String>,
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl Replacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replacer exposing the request variables and `file.<path>` lookups.
    pub fn for_request(request: Arc<AuthorizationRequest>) -> Self {
        let mut replacer = Self::new();
        replacer.push(Arc::new(RequestVars::new(request)));
        replacer.push(Arc::new(FileVars));
        replacer
    }

    pub fn bind(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.bindings.insert(key.into(), value.into());
    }

    pub fn push(&mut self, resolver: Arc<dyn Resolver>) {
        self.resolvers.push(resolver);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.bindings.get(key) {
            return Some(value.clone());
        }
        self.resolvers
            .iter()
            .find_map(|resolver| resolver.resolve(key))
    }

    pub fn replace_all(&self, input: &str, empty: &str) -> String {
        self.replace(input, Some(empty))
    }

    pub fn replace_known(&self, input: &str) -> String {
        self.replace(input, None)
    }

    fn replace(&self, input: &str, unknown: Option<&str>) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return out;
            };
            let key = &after[..end];
            if key.is_empty() || key.contains('{') {
                // Not a placeholder; emit the brace and rescan after it.
                out.push('{');
                rest = after;
                continue;
            }
            match (self.get(key), unknown) {
                (Some(value), _) => out.push_str(&value),
                (None, Some(empty)) => out.push_str(empty),
                (None, None) => {
                    out.push('{');
                    out.push_str(key);
                    out.push('}');
                }
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out
    }
}

impl fmt::Debug for Replacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replacer")
            .field("bindings", &self.bindings.keys().collect::<Vec<_>>())
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

/// Exposes fields of the authorization request under fixed keys.
pub struct RequestVars {
    request: Arc<AuthorizationRequest>,
}

impl RequestVars {
    pub fn new(request: Arc<AuthorizationRequest>) -> Self {
        Self { request }
    }
}

impl Resolver for RequestVars {
    fn resolve(&self, key: &str) -> Option<String> {
        let opts = self.request.connect_opts();
        let info = self.request.client_info();
        let server = self.request.server_id();
        let value = match key {
            "connect_opts.username" => opts.username.clone(),
            "connect_opts.password" => opts.password.clone(),
            "connect_opts.token" => opts.token.clone(),
            "connect_opts.name" => opts.name.clone(),
            "connect_opts.lang" => opts.lang.clone(),
            "connect_opts.version" => opts.version.clone(),
            "connect_opts.protocol" => opts.protocol.to_string(),
            "client_info.host" => info.host.clone(),
            "client_info.id" => info.id.to_string(),
            "client_info.user" => info.user.clone(),
            "client_info.name" => info.name.clone(),
            "client_info.kind" => info.kind.clone(),
            "client_info.type" => info.client_type.clone(),
            "server.id" => server.id.clone(),
            "server.name" => server.name.clone(),
            "user_nkey" => self.request.user_nkey().to_string(),
            _ => return None,
        };
        Some(value)
    }
}

/// Resolves `file.<path>` to the file's contents without the trailing newline.
pub struct FileVars;

impl Resolver for FileVars {
    fn resolve(&self, key: &str) -> Option<String> {
        let path = key.strip_prefix("file.")?;
        match std::fs::read_to_string(path) {
            Ok(contents) => Some(contents.trim_end_matches(['\r', '\n']).to_string()),
            Err(err) => {
                warn!(path, error = %err, "unable to read placeholder file");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{ClientInformation, ConnectOptions, ServerId};

    fn replacer() -> Replacer {
        let request = AuthorizationRequest::new(
            ServerId {
                name: "edge-1".to_string(),
                id: "NSERVER".to_string(),
                ..ServerId::default()
            },
            "UCLIENT",
            ClientInformation {
                host: "10.1.2.3".to_string(),
                id: 42,
                ..ClientInformation::default()
            },
            ConnectOptions {
                username: "alice".to_string(),
                ..ConnectOptions::default()
            },
        );
        Replacer::for_request(Arc::new(request))
    }

    #[test]
    fn resolves_request_variables() {
        let r = replacer();
        assert_eq!(
            r.replace_all("{connect_opts.username}@{server.name}", ""),
            "alice@edge-1"
        );
        assert_eq!(r.replace_all("{client_info.id}", ""), "42");
        assert_eq!(r.replace_all("{user_nkey}", ""), "UCLIENT");
    }

    #[test]
    fn unknown_keys_follow_mode() {
        let r = replacer();
        assert_eq!(r.replace_all("x-{nope}-y", ""), "x--y");
        assert_eq!(r.replace_all("x-{nope}-y", "?"), "x-?-y");
        assert_eq!(r.replace_known("x-{nope}-{connect_opts.username}"), "x-{nope}-alice");
    }

    #[test]
    fn bindings_take_precedence() {
        let mut r = replacer();
        r.bind("connect_opts.username", "override");
        r.bind("tenant", "acme");
        assert_eq!(
            r.replace_all("{tenant}/{connect_opts.username}", ""),
            "acme/override"
        );
    }

    #[test]
    fn later_resolvers_only_fill_gaps() {
        struct Fixed;
        impl Resolver for Fixed {
            fn resolve(&self, _key: &str) -> Option<String> {
                Some("fallback".to_string())
            }
        }

        let mut r = replacer();
        r.push(Arc::new(Fixed));
        assert_eq!(r.replace_all("{server.id}|{other}", ""), "NSERVER|fallback");
    }

    #[test]
    fn malformed_braces_pass_through() {
        let r = replacer();
        assert_eq!(r.replace_all("{}", ""), "{}");
        assert_eq!(r.replace_all("open {connect_opts.username", ""), "open {connect_opts.username");
        assert_eq!(r.replace_all("{{connect_opts.username}}", ""), "{alice}");
        assert_eq!(r.replace_all("plain text", ""), "plain text");
    }

    #[test]
    fn file_placeholders_read_contents() {
        let path = std::env::temp_dir().join(format!("callout-replacer-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, "secret-value\n").expect("write");

        let r = replacer();
        let rendered = r.replace_all(&format!("{{file.{}}}", path.display()), "");
        assert_eq!(rendered, "secret-value");

        std::fs::remove_file(&path).expect("cleanup");
        assert_eq!(r.replace_all(&format!("{{file.{}}}", path.display()), "-"), "-");
    }
}

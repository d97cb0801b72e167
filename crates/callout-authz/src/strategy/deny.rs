use super::{DecisionContext, DecisionStrategy};
use crate::DecisionError;
use crate::claims::UserClaims;
use async_trait::async_trait;

/// Refuses every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyStrategy;

#[async_trait]
impl DecisionStrategy for DenyStrategy {
    fn module(&self) -> &str {
        "deny"
    }

    async fn decide(&self, _ctx: &mut DecisionContext) -> Result<UserClaims, DecisionError> {
        Err(DecisionError::AccessDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{AuthorizationRequest, ClientInformation, ConnectOptions, ServerId};
    use std::sync::Arc;

    #[tokio::test]
    async fn always_denies() {
        let request = AuthorizationRequest::new(
            ServerId::default(),
            "UCLIENT",
            ClientInformation::default(),
            ConnectOptions {
                username: "admin".to_string(),
                ..ConnectOptions::default()
            },
        );
        let mut ctx = DecisionContext::new(Arc::new(request));
        let err = DenyStrategy.decide(&mut ctx).await.expect_err("deny");
        assert_eq!(err.wire_message(), "access denied");
    }
}

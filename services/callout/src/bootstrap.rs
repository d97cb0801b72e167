//! Assembles a [`CalloutService`] from configuration.
use anyhow::{Context, Result, bail};
use callout_authz::{
    InternalAccountProvisioner, JwtSessionDecoder, KeyKind, KeyPair, PinnedTokens, PolicySet,
    ProvisionRequest, ProvisionedAccount, ServerOptions, SessionDecoder, SessionDecoders,
    StrategyBuildContext, StrategyRegistry,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::CalloutConfig;
use crate::service::{CalloutService, RequestHandler};
use crate::signer::ResponseSigner;

/// A built service plus what startup produced alongside it.
#[derive(Debug)]
pub struct Bootstrap {
    pub service: CalloutService,
    pub pinned: Arc<PinnedTokens>,
    /// Account name -> pinned connect token, for handing to internal clients.
    pub pinned_tokens: HashMap<String, String>,
    pub provisioned: Option<ProvisionedAccount>,
}

/// Build the service described by `config`.
///
/// When an internal account is configured it is provisioned and merged into
/// `server` before anything else is built.
pub fn build_service(
    config: &CalloutConfig,
    server: &mut ServerOptions,
    registry: &StrategyRegistry,
) -> Result<Bootstrap> {
    config.validate()?;

    let provisioner = InternalAccountProvisioner::new(ProvisionRequest {
        signing_key_configured: config.signing_key.is_some(),
        internal_account: config.internal_account.clone(),
        internal_user: config.internal_user.clone(),
    });
    let provisioned = provisioner
        .provision(server)
        .context("provision internal account")?;
    if let Some(account) = &provisioned {
        server
            .merge_internal_account(account)
            .context("merge internal account")?;
    }

    let signer = build_signer(config, provisioned.as_ref())?;

    let session_decoders: SessionDecoders = config
        .session_decoders
        .iter()
        .map(|(name, decoder)| {
            let decoder = JwtSessionDecoder::new(decoder.cookie_secret.as_bytes())
                .with_leeway(decoder.leeway_seconds);
            (name.clone(), Arc::new(decoder) as Arc<dyn SessionDecoder>)
        })
        .collect();
    let ctx = StrategyBuildContext {
        session_decoders: &session_decoders,
    };
    let policies = PolicySet::from_config(
        &config.policies,
        config.default_strategy.as_ref(),
        registry,
        &ctx,
    )
    .context("build policies")?;
    if policies.policies().is_empty() && config.default_strategy.is_none() {
        warn!("no policies or default strategy configured; every request will be denied");
    }

    let pinned = Arc::new(PinnedTokens::new());
    let mut pinned_tokens = HashMap::new();
    for account in &config.pinned_accounts {
        let token = pinned
            .register(account.clone(), None)
            .with_context(|| format!("pin token for {account}"))?;
        pinned_tokens.insert(account.clone(), token);
    }
    if !pinned.is_empty() {
        info!(accounts = pinned.len(), "registered pinned tokens");
    }

    let handler = RequestHandler::new(policies, signer, pinned.clone());
    let service = CalloutService::new(config.subject.clone(), config.queue_group.clone(), handler);
    Ok(Bootstrap {
        service,
        pinned,
        pinned_tokens,
        provisioned,
    })
}

fn build_signer(
    config: &CalloutConfig,
    provisioned: Option<&ProvisionedAccount>,
) -> Result<ResponseSigner> {
    if let Some(seed) = &config.signing_key {
        let key = KeyPair::from_seed(seed)
            .and_then(|key| key.require_kind(KeyKind::Account))
            .context("parse signing_key")?;
        info!(issuer = %key.public_key(), "single-key signing");
        return Ok(ResponseSigner::single_key(key));
    }
    if config.keystore_mode() {
        for (account, seed) in &config.keystore {
            KeyPair::from_seed(seed)
                .and_then(|key| key.require_kind(KeyKind::Account))
                .with_context(|| format!("parse keystore seed for {account}"))?;
        }
        if !config.keystore.contains_key(&config.auth_account) {
            warn!(
                auth_account = %config.auth_account,
                "keystore has no key for the auth account; responses cannot be signed"
            );
        }
        info!(
            accounts = config.keystore.len(),
            auth_account = %config.auth_account,
            "keystore signing"
        );
        return Ok(ResponseSigner::keystore(
            Arc::new(config.keystore.clone()),
            config.auth_account.clone(),
        ));
    }
    if let Some(account) = provisioned {
        let key = KeyPair::from_seed(&account.seed).context("parse provisioned seed")?;
        return Ok(ResponseSigner::single_key(key));
    }
    bail!("no signing key available");
}

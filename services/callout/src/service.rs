//! Request loop of the callout service.
//!
//! `CalloutService` owns one subscription on the callout subject. Each message
//! is handled on its own task by a shared [`RequestHandler`]:
//! decode, decide, sign, reply. Undecodable requests and envelopes that cannot
//! be signed get no reply; the server times them out.
use anyhow::{Context, Result, bail};
use bytes::Bytes;
use callout_authz::{
    AuthorizationRequest, AuthorizationResponse, DecisionContext, DecisionError, PinnedTokens,
    PolicySet, UserClaims, verify_request,
};
use callout_bus::{BusConnection, Message};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::signer::ResponseSigner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Listening,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Allowed,
    Denied,
    Dropped,
    DecodeFailed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Allowed => "allowed",
            Outcome::Denied => "denied",
            Outcome::Dropped => "dropped",
            Outcome::DecodeFailed => "decode_failed",
        }
    }
}

/// What to do with one inbound request.
#[derive(Debug)]
pub enum Disposition {
    Reply { token: String, outcome: Outcome },
    Drop(Outcome),
}

#[derive(Debug)]
pub struct RequestHandler {
    policies: PolicySet,
    signer: ResponseSigner,
    pinned: Arc<PinnedTokens>,
}

impl RequestHandler {
    pub fn new(policies: PolicySet, signer: ResponseSigner, pinned: Arc<PinnedTokens>) -> Self {
        Self {
            policies,
            signer,
            pinned,
        }
    }

    pub async fn handle(&self, bus: &dyn BusConnection, message: Message) -> Outcome {
        let started = Instant::now();
        let outcome = match message.reply.as_deref() {
            None => {
                warn!(subject = %message.subject, "authorization request without reply subject");
                Outcome::Dropped
            }
            Some(reply) => match self.respond(&message.payload).await {
                Disposition::Reply { token, outcome } => {
                    match bus.publish(reply, None, Bytes::from(token)).await {
                        Ok(()) => outcome,
                        Err(err) => {
                            error!(error = %err, "failed to publish authorization response");
                            Outcome::Dropped
                        }
                    }
                }
                Disposition::Drop(outcome) => outcome,
            },
        };
        metrics::counter!("callout_requests_total", "outcome" => outcome.as_str()).increment(1);
        metrics::histogram!("callout_decision_seconds").record(started.elapsed().as_secs_f64());
        outcome
    }

    /// Decode a raw request and produce the signed envelope to send back.
    pub async fn respond(&self, payload: &[u8]) -> Disposition {
        let request = match verify_request(payload) {
            Ok(request) => Arc::new(request),
            Err(err) => {
                warn!(error = %err, "failed to decode authorization request");
                return Disposition::Drop(Outcome::DecodeFailed);
            }
        };

        let (mut response, outcome) = match self.decide(request.clone()).await {
            Ok(mut claims) => match self.signer.sign_user_claims(&mut claims) {
                Ok(jwt) => {
                    info!(
                        user = %request.user_nkey(),
                        account = %claims.aud,
                        "authorization granted"
                    );
                    (AuthorizationResponse::success(&request, jwt), Outcome::Allowed)
                }
                Err(err) => {
                    let err = DecisionError::from(err);
                    warn!(account = %claims.aud, error = %err, "authorization failed");
                    (
                        AuthorizationResponse::failure(&request, err.wire_message()),
                        Outcome::Denied,
                    )
                }
            },
            Err(err) => {
                info!(user = %request.user_nkey(), reason = %err, "authorization refused");
                (
                    AuthorizationResponse::failure(&request, err.wire_message()),
                    Outcome::Denied,
                )
            }
        };

        match self.signer.sign_response(&mut response) {
            Ok(token) => Disposition::Reply { token, outcome },
            Err(err) => {
                error!(
                    auth_account = self.signer.auth_account().unwrap_or_default(),
                    error = %err,
                    "unable to sign authorization response; request dropped"
                );
                Disposition::Drop(Outcome::Dropped)
            }
        }
    }

    async fn decide(
        &self,
        request: Arc<AuthorizationRequest>,
    ) -> Result<UserClaims, DecisionError> {
        if let Some((account, template)) = self.pinned.lookup(&request.connect_opts().token) {
            debug!(account, "pinned token presented");
            let mut claims = UserClaims::new(request.user_nkey());
            claims.name = template.name;
            claims.nats = template.nats;
            claims.aud = account;
            return Ok(claims);
        }
        let mut ctx = DecisionContext::new(request);
        self.policies.authorize(&mut ctx).await
    }
}

struct RunningLoop {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct CalloutService {
    subject: String,
    queue_group: String,
    handler: Arc<RequestHandler>,
    state: Arc<watch::Sender<ServiceState>>,
    running: Mutex<Option<RunningLoop>>,
}

impl fmt::Debug for CalloutService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalloutService")
            .field("subject", &self.subject)
            .field("queue_group", &self.queue_group)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CalloutService {
    pub fn new(
        subject: impl Into<String>,
        queue_group: impl Into<String>,
        handler: RequestHandler,
    ) -> Self {
        let (state, _) = watch::channel(ServiceState::Created);
        Self {
            subject: subject.into(),
            queue_group: queue_group.into(),
            handler: Arc::new(handler),
            state: Arc::new(state),
            running: Mutex::new(None),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Watch state transitions, e.g. for readiness probes.
    pub fn state_receiver(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    /// Subscribe and start dispatching requests.
    ///
    /// Only valid from `Created`; a stopped service is not restarted.
    pub async fn start(&self, bus: Arc<dyn BusConnection>) -> Result<()> {
        let mut running = self.running.lock().await;
        let state = self.state();
        if state != ServiceState::Created {
            bail!("callout service cannot start from {state:?}");
        }

        let queue_group = (!self.queue_group.is_empty()).then_some(self.queue_group.as_str());
        let mut subscription = bus
            .subscribe(&self.subject, queue_group)
            .await
            .with_context(|| format!("subscribe to {}", self.subject))?;

        // The loop may publish Stopped as soon as it runs.
        self.state.send_replace(ServiceState::Listening);
        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let handler = self.handler.clone();
        let state_tx = self.state.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    message = subscription.next() => {
                        let Some(message) = message else {
                            warn!("callout subscription closed");
                            state_tx.send_replace(ServiceState::Stopped);
                            break;
                        };
                        let handler = handler.clone();
                        let bus = bus.clone();
                        tokio::spawn(async move {
                            handler.handle(bus.as_ref(), message).await;
                        });
                    }
                }
            }
            subscription.unsubscribe();
        });

        *running = Some(RunningLoop { shutdown, task });
        info!(
            subject = %self.subject,
            queue_group = %self.queue_group,
            "callout service listening"
        );
        Ok(())
    }

    /// Unsubscribe and wait for the dispatch loop to exit. Idempotent.
    ///
    /// Requests already dispatched finish on their own tasks.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if let Some(RunningLoop { shutdown, task }) = running.take() {
            let _ = shutdown.send(());
            if let Err(err) = task.await {
                warn!(error = %err, "callout loop ended abnormally");
            }
            info!(subject = %self.subject, "callout service stopped");
        }
        self.state.send_replace(ServiceState::Stopped);
    }
}

//! Connection protocol handling.
//!
//! [`CoordinatorContext`] holds the process-wide state shared by every
//! connection. [`ConnectionHandler`] is the per-connection state machine:
//! it turns inbound text frames into replies and owns the session guard.

use crate::auth::{Credential, SecretValidator, TokenIssuer};
use crate::config::Config;
use crate::error::ServerError;
use crate::metrics::Metrics;
use crate::session::{ConnectionHandle, SessionGuard, SessionRegistry};
use chrono::{DateTime, Utc};
use dronelink_core::{CommandDispatcher, DispatchOutcome};
use dronelink_protocol::{Inbound, Outbound};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shared coordinator state, built once at startup.
pub struct CoordinatorContext {
    issuer: TokenIssuer,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<CommandDispatcher>,
    /// Present only when login secrets are checked.
    secret_validator: Option<SecretValidator>,
    /// Close sessions once their credential lapses.
    enforce_expiry: bool,
    metrics: Option<Arc<Metrics>>,
}

impl CoordinatorContext {
    /// Creates a context that accepts any login secret and enforces expiry.
    pub fn new(issuer: TokenIssuer) -> Self {
        Self {
            issuer,
            registry: Arc::new(SessionRegistry::new()),
            dispatcher: Arc::new(CommandDispatcher::new()),
            secret_validator: None,
            enforce_expiry: true,
            metrics: None,
        }
    }

    /// Creates a context from loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        let issuer = TokenIssuer::from_config(&config.auth)?;
        let mut ctx = Self::new(issuer).with_enforce_expiry(config.session.enforce_expiry);
        if config.auth.required {
            ctx = ctx.with_secret_validator(SecretValidator::new(config.auth.drones.clone()));
        }
        Ok(ctx)
    }

    /// Requires login secrets to match the validator's hashes.
    pub fn with_secret_validator(mut self, validator: SecretValidator) -> Self {
        self.secret_validator = Some(validator);
        self
    }

    pub fn with_enforce_expiry(mut self, enforce: bool) -> Self {
        self.enforce_expiry = enforce;
        self
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    /// Returns a reference to the metrics, if set.
    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    pub fn enforces_expiry(&self) -> bool {
        self.enforce_expiry
    }

    pub fn auth_required(&self) -> bool {
        self.secret_validator.is_some()
    }

    fn record_handshake(&self, result: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.handshakes_total.with_label_values(&[result]).inc();
            metrics.sessions_active.set(self.registry.count() as f64);
        }
    }

    fn record_error(&self, kind: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.errors_total.with_label_values(&[kind]).inc();
        }
    }

    fn update_session_gauge(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.sessions_active.set(self.registry.count() as f64);
        }
    }
}

impl std::fmt::Debug for CoordinatorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorContext")
            .field("sessions", &self.registry.count())
            .field("history_len", &self.dispatcher.history_len())
            .field("auth_required", &self.auth_required())
            .field("enforce_expiry", &self.enforce_expiry)
            .finish()
    }
}

/// Connection protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for LOGIN.
    Unauthenticated,
    /// Holding a session; accepting COMMAND frames.
    Authenticated,
    /// Terminal.
    Closed,
}

/// Frames to write back, and whether the connection ends after them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reply {
    pub frames: Vec<Outbound>,
    pub close: bool,
}

impl Reply {
    fn send(frame: Outbound) -> Self {
        Self {
            frames: vec![frame],
            close: false,
        }
    }

    fn terminal(frame: Outbound) -> Self {
        Self {
            frames: vec![frame],
            close: true,
        }
    }

    fn closed() -> Self {
        Self {
            frames: Vec::new(),
            close: true,
        }
    }
}

/// Per-connection protocol state machine.
///
/// Messages are handled strictly one at a time. Dropping the handler closes
/// it, which releases any held identity.
pub struct ConnectionHandler {
    ctx: Arc<CoordinatorContext>,
    connection: ConnectionHandle,
    state: ConnectionState,
    guard: Option<SessionGuard>,
}

impl ConnectionHandler {
    pub fn new(ctx: Arc<CoordinatorContext>, connection: ConnectionHandle) -> Self {
        Self {
            ctx,
            connection,
            state: ConnectionState::Unauthenticated,
            guard: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection.id
    }

    /// Returns the authenticated identity, if any.
    pub fn identity(&self) -> Option<&str> {
        self.guard.as_ref().map(|g| g.identity())
    }

    /// Returns the credential bound to this connection, if any.
    pub fn credential(&self) -> Option<&Credential> {
        self.guard.as_ref().map(|g| &g.session().credential)
    }

    /// Instant at which the session must be expired, when expiry is enforced.
    pub fn session_deadline(&self) -> Option<DateTime<Utc>> {
        if !self.ctx.enforce_expiry {
            return None;
        }
        self.credential().map(|c| c.expires_at)
    }

    /// Time left until [`Self::session_deadline`].
    pub fn time_to_expiry(&self) -> Option<Duration> {
        if !self.ctx.enforce_expiry {
            return None;
        }
        self.credential().map(|c| c.remaining_at(Utc::now()))
    }

    /// Handles one inbound text frame using the system clock.
    pub fn handle_text(&mut self, text: &str) -> Reply {
        self.handle_text_at(text, Utc::now())
    }

    /// Handles one inbound text frame at `now`.
    pub fn handle_text_at(&mut self, text: &str, now: DateTime<Utc>) -> Reply {
        let frame = Inbound::parse(text);
        let label = match (&frame, self.state) {
            (_, ConnectionState::Closed) => "closed",
            (Ok(Inbound::Login { .. }), _) => "login",
            (Ok(Inbound::Command { .. }), _) => "command",
            (Err(_), _) => "malformed",
        };
        let _timer = self
            .ctx
            .metrics
            .as_ref()
            .map(|m| m.frame_duration.with_label_values(&[label]).start_timer());

        match self.state {
            ConnectionState::Closed => Reply::closed(),
            ConnectionState::Unauthenticated => match frame {
                Ok(Inbound::Login { identity, secret }) => self.handshake(&identity, &secret, now),
                Ok(Inbound::Command { name }) => {
                    tracing::debug!(
                        "[{}] command '{}' before login",
                        self.connection.remote_addr,
                        name
                    );
                    self.unknown_request()
                }
                Err(e) => {
                    tracing::debug!("[{}] {}", self.connection.remote_addr, e);
                    self.unknown_request()
                }
            },
            ConnectionState::Authenticated => {
                if self.is_expired_at(now) {
                    return self.expire();
                }
                match frame {
                    Ok(Inbound::Command { name }) => self.command(&name),
                    Ok(Inbound::Login { identity, .. }) => {
                        tracing::debug!(
                            "[{}] repeated login as '{}' ignored",
                            self.identity().unwrap_or_default(),
                            identity
                        );
                        self.unknown_request()
                    }
                    Err(e) => {
                        tracing::debug!("[{}] {}", self.identity().unwrap_or_default(), e);
                        self.unknown_request()
                    }
                }
            }
        }
    }

    /// Handles a binary frame, which is never part of the protocol.
    pub fn handle_binary(&mut self) -> Reply {
        if self.state == ConnectionState::Closed {
            return Reply::closed();
        }
        tracing::debug!("[{}] binary frame rejected", self.connection.remote_addr);
        self.unknown_request()
    }

    /// Ends an authenticated session whose credential has lapsed.
    pub fn expire(&mut self) -> Reply {
        if self.state != ConnectionState::Authenticated {
            return Reply::closed();
        }
        tracing::warn!(
            "[{}] Session expired",
            self.identity().unwrap_or_default()
        );
        self.ctx.record_error("session_expired");
        self.close();
        Reply::terminal(Outbound::SessionExpired)
    }

    /// Moves to `Closed` and releases the identity. Idempotent.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        if let Some(mut guard) = self.guard.take() {
            if guard.release() {
                tracing::info!("[{}] Drone disconnected", guard.identity());
            }
            self.ctx.update_session_gauge();
        }
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if !self.ctx.enforce_expiry {
            return false;
        }
        match self.credential() {
            Some(credential) => match self.ctx.issuer.verify_at(credential.token(), now) {
                Ok(_) => false,
                Err(e) => {
                    tracing::debug!("[{}] credential rejected: {}", credential.subject, e);
                    true
                }
            },
            None => false,
        }
    }

    fn handshake(&mut self, identity: &str, secret: &str, now: DateTime<Utc>) -> Reply {
        if let Some(ref validator) = self.ctx.secret_validator {
            if !validator.validate(identity, secret) {
                tracing::warn!(
                    "[{}] Authentication failed from {}",
                    identity,
                    self.connection.remote_addr
                );
                self.ctx.record_handshake("auth_failed");
                self.close();
                return Reply::terminal(Outbound::AuthenticationFailed);
            }
        }

        let credential = self.ctx.issuer.issue_at(identity, now);
        let token = credential.token().to_string();

        match self
            .ctx
            .registry
            .register(identity, self.connection.clone(), credential)
        {
            Ok(guard) => {
                tracing::info!(
                    "[{}] Drone connected from {}",
                    identity,
                    self.connection.remote_addr
                );
                self.guard = Some(guard);
                self.state = ConnectionState::Authenticated;
                self.ctx.record_handshake("accepted");
                Reply::send(Outbound::Credential(token))
            }
            Err(conflict) => {
                tracing::warn!(
                    "[{}] Rejected login from {}: {}",
                    identity,
                    self.connection.remote_addr,
                    conflict
                );
                self.ctx.record_handshake("already_connected");
                self.close();
                Reply::terminal(Outbound::AlreadyConnected)
            }
        }
    }

    fn command(&mut self, name: &str) -> Reply {
        let identity = match self.guard {
            Some(ref guard) => guard.identity().to_string(),
            None => return self.unknown_request(),
        };

        let outcome = self.ctx.dispatcher.dispatch(&identity, name);
        if let Some(ref metrics) = self.ctx.metrics {
            let label = match &outcome {
                DispatchOutcome::Executed { command, .. } => command.name(),
                DispatchOutcome::Unknown { .. } => "unknown",
            };
            metrics.commands_total.with_label_values(&[label]).inc();
        }

        Reply::send(Outbound::status(identity, outcome.description()))
    }

    fn unknown_request(&self) -> Reply {
        self.ctx.record_error("unknown_request");
        Reply::send(Outbound::UnknownRequest)
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.close();
    }
}

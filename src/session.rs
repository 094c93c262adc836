//! Match session controller.
//!
//! [`MatchSession`] owns the predicted [`MatchState`], the [`Transport`] to
//! the authority and one [`CancellationToken`] scoping every suspending
//! operation. Changes are pushed to the view layer as [`SessionEvent`]s on a
//! bounded channel returned from [`MatchSession::new`].
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = WebSocketTransport::connect("ws://localhost:3030/client").await?;
//! let (mut session, mut events) = MatchSession::new(transport, SessionConfig::new());
//!
//! session.start_with(load_tile_faces()).await?;
//!
//! match session.discard(Wind::East, tile).await {
//!     Ok(ActionOutcome::Dropped(reason)) => { /* not our turn, ignore the click */ }
//!     Ok(_) => { /* prediction confirmed */ }
//!     Err(e) if e.is_recoverable() => { /* rolled back; tell the player */ }
//!     Err(e) => return Err(e),
//! }
//! ```
//!
//! # Action protocol
//!
//! An action goes through a turn/legality gate, is applied locally and shown
//! immediately, then sent to the authority. The prediction stands if the
//! authority accepts it and is replaced by the pre-action snapshot if the
//! authority refuses it or the exchange fails. Only one exchange is ever in
//! flight: every suspending method takes `&mut self`.
//!
//! Each action request carries a `request_id`. A request whose exchange was
//! abandoned (timeout, unreadable reply) stays on record, and its verdict is
//! folded into the state whenever it turns up later instead of being taken
//! for the answer to a newer request.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{MatchError, Result};
use crate::error_codes::ErrorCode;
use crate::protocol::{
    decode_action_reply, decode_start_response, encode_request, ActionReply, ActionVerdict,
    ClientRequest, Credentials, MatchEvent, StartMatchResponse,
};
use crate::rules::{Action, RejectReason, Rules, StandardRules};
use crate::state::MatchState;
use crate::tile::{TileId, Wind};
use crate::transport::Transport;
use crate::view::MatchView;

/// Default capacity of the bounded event channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default time allowed for closing the transport on teardown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`MatchSession`].
///
/// # Example
///
/// ```
/// use mahjong_match_client::session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new()
///     .with_event_channel_capacity(64)
///     .with_response_timeout(Duration::from_secs(10));
/// assert_eq!(config.event_channel_capacity, 64);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Version sent in the start request.
    /// Defaults to the crate version at compile time.
    pub client_version: String,
    /// Saved credentials sent in the start request.
    pub credentials: Option<Credentials>,
    /// Capacity of the bounded event channel.
    ///
    /// When the view layer falls behind, state updates are dropped (with a
    /// warning logged). `Terminated` waits up to `shutdown_timeout` for room
    /// in the channel before it is dropped too.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time allowed for closing the transport on teardown.
    ///
    /// Defaults to **1 second**. A zero timeout drops the transport without
    /// a close handshake.
    pub shutdown_timeout: Duration,
    /// How long to wait for a reply before giving up on an exchange.
    ///
    /// Defaults to `None` (wait until the session is cancelled).
    pub response_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            credentials: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            response_timeout: None,
        }
    }

    /// Log in with saved credentials instead of asking for new ones.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the capacity of the bounded event channel (clamped to at least 1).
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the time allowed for closing the transport on teardown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Give up on an exchange when no reply arrives within `timeout`.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }
}

// ── Phases, events, outcomes ────────────────────────────────────────

/// Lifecycle of a [`MatchSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created; `start` not yet called.
    Uninitialized,
    /// Waiting for the start handshake and side-loads.
    AwaitingStart,
    /// Match state received; actions are accepted.
    Active,
    /// Torn down. Every operation fails with [`MatchError::Terminated`].
    Terminated,
}

/// Notifications for the view layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The match state changed (prediction, rollback, correction or event).
    StateChanged(MatchView),
    /// The authority refused an action; the table shows the rolled-back state.
    ActionRejected {
        seat: Wind,
        action: Action,
        code: Option<ErrorCode>,
        reason: Option<String>,
    },
    /// The session was torn down. Always the last event, and dropped only
    /// if the channel stays full for the whole shutdown timeout.
    Terminated,
}

/// Result of a successfully handled action intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Illegal locally; nothing was sent and nothing changed.
    Dropped(RejectReason),
    /// The authority accepted the prediction as is.
    Confirmed,
    /// The authority accepted and sent a state that replaced the prediction.
    Corrected,
}

// ── Session ─────────────────────────────────────────────────────────

/// Client-side controller for one match.
pub struct MatchSession<T, R = StandardRules> {
    transport: Option<T>,
    rules: R,
    config: SessionConfig,
    phase: SessionPhase,
    state: Option<MatchState>,
    credentials: Option<Credentials>,
    /// Events that arrived while an action awaited its verdict.
    pending_events: VecDeque<MatchEvent>,
    /// Action requests sent but not yet answered, oldest first.
    unanswered: VecDeque<SentAction>,
    last_request_id: u64,
    cancel: CancellationToken,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl<T: Transport> MatchSession<T, StandardRules> {
    /// Create a session over a connected transport.
    ///
    /// Returns the session and the receiver the view layer reads
    /// [`SessionEvent`]s from.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn new(transport: T, config: SessionConfig) -> (Self, mpsc::Receiver<SessionEvent>) {
        Self::with_rules(transport, StandardRules, config)
    }
}

impl<T: Transport, R: Rules> MatchSession<T, R> {
    /// Create a session that validates actions with a custom rules engine.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn with_rules(
        transport: T,
        rules: R,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let session = Self {
            transport: Some(transport),
            rules,
            credentials: config.credentials.clone(),
            config,
            phase: SessionPhase::Uninitialized,
            state: None,
            pending_events: VecDeque::new(),
            unanswered: VecDeque::new(),
            last_request_id: 0,
            cancel: CancellationToken::new(),
            event_tx,
        };
        (session, event_rx)
    }

    // ── Startup ─────────────────────────────────────────────────────

    /// Perform the start handshake with no side-loads.
    ///
    /// # Errors
    ///
    /// See [`start_with`](Self::start_with).
    pub async fn start(&mut self) -> Result<&MatchState> {
        self.start_with(async { Ok(()) }).await
    }

    /// Perform the start handshake while `side_loads` runs alongside it.
    ///
    /// Both must succeed for the session to become [`SessionPhase::Active`].
    /// A failure of either is fatal: the session is torn down and the error
    /// returned. Cancelling the session scope aborts both.
    ///
    /// # Errors
    ///
    /// [`MatchError::Terminated`] or [`MatchError::WrongPhase`] if the session
    /// was already started; otherwise the first error of the handshake or the
    /// side-loads.
    pub async fn start_with<F>(&mut self, side_loads: F) -> Result<&MatchState>
    where
        F: Future<Output = Result<()>>,
    {
        self.ensure_live().await?;
        if self.phase != SessionPhase::Uninitialized {
            return Err(MatchError::WrongPhase(self.phase));
        }
        self.phase = SessionPhase::AwaitingStart;
        info!(client_version = %self.config.client_version, "starting match session");

        let request = ClientRequest::StartMatch {
            client_version: self.config.client_version.clone(),
            credentials: self.config.credentials.clone(),
        };
        let scope = ExchangeScope::new(&self.cancel, self.config.response_timeout);
        let cancel = self.cancel.clone();
        let result = match self.transport.as_mut() {
            Some(transport) => {
                let side_loads = async {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(MatchError::Cancelled),
                        loaded = side_loads => loaded,
                    }
                };
                tokio::try_join!(handshake(transport, &request, scope.token()), side_loads)
            }
            None => Err(MatchError::Terminated),
        };
        let result = result.map_err(|err| self.scope_error(err, &scope));
        drop(scope);

        let response = match result {
            Ok((response, ())) => response,
            Err(err) => {
                if err.is_cancellation() {
                    debug!("match start cancelled");
                } else {
                    error!("match start failed: {err}");
                }
                self.shutdown().await;
                return Err(err);
            }
        };

        if response.credentials.is_some() {
            self.credentials = response.credentials;
        }
        info!(
            match_id = %response.state.id,
            current_turn = %response.state.current_turn,
            "match started"
        );
        self.phase = SessionPhase::Active;
        let state = self.commit(response.state);
        Ok(state)
    }

    // ── Actions ─────────────────────────────────────────────────────

    /// Discard `tile` from `seat`'s hand or draw slot.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub async fn discard(&mut self, seat: Wind, tile: TileId) -> Result<ActionOutcome> {
        self.submit(seat, Action::Discard(tile)).await
    }

    /// Handle a player's action intent.
    ///
    /// Illegal intents are dropped without contacting the authority. Legal
    /// ones are applied optimistically, sent, and reconciled with the verdict.
    ///
    /// # Errors
    ///
    /// - [`MatchError::ActionRejected`] when the authority refuses the action.
    /// - Transport, protocol and timeout errors abort the exchange.
    ///
    /// In all of these cases the state is restored to what it was before the
    /// action and the session stays active. If the authority answers an
    /// abandoned request later, that verdict is applied when it arrives.
    /// [`MatchError::Cancelled`] means the session was torn down while
    /// waiting.
    pub async fn submit(&mut self, seat: Wind, action: Action) -> Result<ActionOutcome> {
        self.ensure_active().await?;
        let mut before = self.state.take().ok_or(MatchError::Terminated)?;

        let predicted = match self.rules.apply(&before, seat, &action) {
            Ok(predicted) => predicted,
            Err(reason) => {
                debug!(%seat, %action, %reason, "dropping illegal action");
                self.state = Some(before);
                return Ok(ActionOutcome::Dropped(reason));
            }
        };

        debug!(%seat, %action, revision = predicted.revision, "applying action optimistically");
        self.commit(predicted);

        self.last_request_id += 1;
        let sent = SentAction {
            request_id: self.last_request_id,
            seat,
            action,
        };
        let scope = ExchangeScope::new(&self.cancel, self.config.response_timeout);
        let result = self.exchange(sent, &mut before, scope.token()).await;
        let result = result.map_err(|err| self.scope_error(err, &scope));
        drop(scope);

        let verdict = match result {
            Ok(verdict) => verdict,
            Err(err) => {
                self.commit(before);
                if err.is_cancellation() {
                    debug!(%seat, %action, "action cancelled");
                    self.shutdown().await;
                } else {
                    warn!(
                        %seat,
                        %action,
                        request_id = sent.request_id,
                        "action exchange failed, rolled back: {err}"
                    );
                }
                return Err(err);
            }
        };

        self.reconcile(seat, action, before, verdict)
    }

    /// Wait for the next authoritative event and apply it.
    ///
    /// Events that arrived while an action awaited its verdict are returned
    /// first, in arrival order.
    ///
    /// # Errors
    ///
    /// [`MatchError::InvalidEvent`] if the event contradicts the local state,
    /// transport and protocol errors for a failed receive, and
    /// [`MatchError::Cancelled`] if the session was torn down while waiting.
    pub async fn next_event(&mut self) -> Result<MatchEvent> {
        self.ensure_active().await?;

        let event = match self.pending_events.pop_front() {
            Some(event) => event,
            None => match self.recv_event().await {
                Ok(event) => event,
                Err(err) => {
                    if err.is_cancellation() {
                        self.shutdown().await;
                    }
                    return Err(err);
                }
            },
        };

        let state = self.state.as_ref().ok_or(MatchError::Terminated)?;
        let next = self.rules.apply_event(state, &event).map_err(|reason| {
            warn!(?event, %reason, "authority event contradicts local state");
            MatchError::InvalidEvent(reason)
        })?;
        debug!(?event, revision = next.revision, "applied authority event");
        self.commit(next);
        Ok(event)
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Tear the session down: cancel in-flight work, close the transport and
    /// drop the match state. Calling it again is a no-op.
    pub async fn terminate(&mut self) {
        debug!("MatchSession: terminate requested");
        self.shutdown().await;
    }

    // ── State accessors ─────────────────────────────────────────────

    /// The current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Returns `true` while the session accepts actions.
    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active && !self.cancel.is_cancelled()
    }

    /// The current (possibly predicted) match state.
    pub fn state(&self) -> Option<&MatchState> {
        self.state.as_ref()
    }

    /// A view-layer snapshot of the current state.
    pub fn view(&self) -> Option<MatchView> {
        self.state.as_ref().map(MatchView::from)
    }

    /// Credentials issued by the authority, or the ones configured.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// A handle to the session's cancellation scope.
    ///
    /// Cancelling it releases any pending receive and makes every later
    /// operation fail with [`MatchError::Terminated`]. Cancelling twice is
    /// harmless.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Tear down if the scope was cancelled from outside; fail if terminated.
    async fn ensure_live(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Terminated && self.cancel.is_cancelled() {
            debug!("session scope cancelled, tearing down");
            self.shutdown().await;
        }
        if self.phase == SessionPhase::Terminated {
            return Err(MatchError::Terminated);
        }
        Ok(())
    }

    async fn ensure_active(&mut self) -> Result<()> {
        self.ensure_live().await?;
        if self.phase != SessionPhase::Active {
            return Err(MatchError::WrongPhase(self.phase));
        }
        Ok(())
    }

    /// Send one request and wait for its verdict, queueing events on the way.
    ///
    /// Verdicts for earlier, abandoned requests are folded into `before` and
    /// the prediction is replayed on top of it.
    async fn exchange(
        &mut self,
        sent: SentAction,
        before: &mut MatchState,
        scope: &CancellationToken,
    ) -> Result<ActionVerdict> {
        let request = ClientRequest::for_action(sent.request_id, sent.seat, &sent.action);
        let transport = self.transport.as_mut().ok_or(MatchError::Terminated)?;
        send_frame(transport, encode_request(&request)?, scope).await?;
        self.unanswered.push_back(sent);

        loop {
            let transport = self.transport.as_mut().ok_or(MatchError::Terminated)?;
            let text = recv_frame(transport, scope).await?;
            let reply = match decode_action_reply(&text) {
                Ok(reply) => reply,
                Err(err @ MatchError::ServerError { .. }) => match self.unanswered.pop_front() {
                    Some(earlier) if earlier.request_id != sent.request_id => {
                        debug!(
                            request_id = earlier.request_id,
                            "abandoned request failed: {err}"
                        );
                        continue;
                    }
                    _ => return Err(err),
                },
                Err(err) => return Err(err),
            };

            let verdict = match reply {
                ActionReply::Verdict(verdict) => verdict,
                ActionReply::Event(event) => {
                    debug!(?event, "queueing event received before verdict");
                    self.pending_events.push_back(event);
                    continue;
                }
            };
            match self.acknowledge(verdict.request_id) {
                Some(answered) if answered.request_id == sent.request_id => return Ok(verdict),
                Some(late) => {
                    if let Some(rebased) = self.settle_late(before, late, verdict) {
                        let predicted = match self.rules.apply(&rebased, sent.seat, &sent.action) {
                            Ok(predicted) => predicted,
                            Err(reason) => {
                                debug!(%reason, "prediction no longer applies");
                                rebased.clone()
                            }
                        };
                        *before = rebased;
                        self.commit(predicted);
                    }
                }
                None => {
                    debug!(
                        request_id = ?verdict.request_id,
                        "dropping verdict for no pending request"
                    );
                }
            }
        }
    }

    async fn recv_event(&mut self) -> Result<MatchEvent> {
        loop {
            let transport = self.transport.as_mut().ok_or(MatchError::Terminated)?;
            let text = recv_frame(transport, &self.cancel).await?;
            let reply = match decode_action_reply(&text) {
                Ok(reply) => reply,
                Err(err @ MatchError::ServerError { .. }) => match self.unanswered.pop_front() {
                    Some(earlier) => {
                        debug!(
                            request_id = earlier.request_id,
                            "abandoned request failed: {err}"
                        );
                        continue;
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            };

            let verdict = match reply {
                ActionReply::Event(event) => return Ok(event),
                ActionReply::Verdict(verdict) => verdict,
            };
            let Some(late) = self.acknowledge(verdict.request_id) else {
                return Err(MatchError::UnexpectedMessage { raw: text });
            };
            let state = self.state.as_ref().ok_or(MatchError::Terminated)?;
            let settled = self.settle_late(state, late, verdict);
            if let Some(next) = settled {
                self.commit(next);
            }
        }
    }

    /// Take the request a verdict answers off the unanswered list.
    ///
    /// A tagged verdict also retires every older request, whose replies can
    /// no longer arrive in order. An untagged verdict answers the oldest one.
    fn acknowledge(&mut self, request_id: Option<u64>) -> Option<SentAction> {
        match request_id {
            Some(id) => {
                let position = self.unanswered.iter().position(|sent| sent.request_id == id)?;
                self.unanswered.drain(..=position).last()
            }
            None => self.unanswered.pop_front(),
        }
    }

    /// Fold the verdict on an abandoned request into `base`.
    ///
    /// Returns the new state, or `None` when `base` already matches the
    /// authority (the action was refused and had been rolled back).
    fn settle_late(
        &self,
        base: &MatchState,
        late: SentAction,
        verdict: ActionVerdict,
    ) -> Option<MatchState> {
        let SentAction {
            request_id,
            seat,
            action,
        } = late;
        if !verdict.accepted {
            info!(request_id, %seat, %action, "abandoned action was rejected");
            emit_event(
                &self.event_tx,
                SessionEvent::ActionRejected {
                    seat,
                    action,
                    code: verdict.error_code,
                    reason: verdict.reason,
                },
            );
            return verdict.corrected;
        }
        if let Some(corrected) = verdict.corrected {
            info!(request_id, %seat, %action, "abandoned action accepted with a state");
            return Some(corrected);
        }
        match self.rules.apply(base, seat, &action) {
            Ok(next) => {
                info!(request_id, %seat, %action, "replaying accepted abandoned action");
                Some(next)
            }
            Err(reason) => {
                warn!(
                    request_id,
                    %seat,
                    %action,
                    %reason,
                    "accepted abandoned action no longer applies"
                );
                None
            }
        }
    }

    fn reconcile(
        &mut self,
        seat: Wind,
        action: Action,
        before: MatchState,
        verdict: ActionVerdict,
    ) -> Result<ActionOutcome> {
        if verdict.accepted {
            return match verdict.corrected {
                Some(corrected) if self.state.as_ref() != Some(&corrected) => {
                    info!(%seat, %action, "authority corrected the prediction");
                    self.commit(corrected);
                    Ok(ActionOutcome::Corrected)
                }
                _ => {
                    debug!(%seat, %action, "prediction confirmed");
                    Ok(ActionOutcome::Confirmed)
                }
            };
        }

        warn!(
            %seat,
            %action,
            code = ?verdict.error_code,
            reason = verdict.reason.as_deref().unwrap_or(""),
            "authority rejected action, rolling back"
        );
        // An authoritative state sent with the refusal beats our snapshot.
        self.commit(verdict.corrected.unwrap_or(before));
        emit_event(
            &self.event_tx,
            SessionEvent::ActionRejected {
                seat,
                action,
                code: verdict.error_code,
                reason: verdict.reason.clone(),
            },
        );
        Err(MatchError::ActionRejected {
            code: verdict.error_code,
            reason: verdict.reason,
        })
    }

    /// Replace the state and tell the view layer.
    fn commit(&mut self, state: MatchState) -> &MatchState {
        emit_event(&self.event_tx, SessionEvent::StateChanged(MatchView::from(&state)));
        self.state.insert(state)
    }

    /// Report a scope cancelled by its response timeout as a timeout.
    fn scope_error(&self, err: MatchError, scope: &ExchangeScope) -> MatchError {
        match err {
            MatchError::Cancelled if scope.timed_out() && !self.cancel.is_cancelled() => {
                MatchError::Timeout
            }
            other => other,
        }
    }

    async fn shutdown(&mut self) {
        if self.phase == SessionPhase::Terminated {
            return;
        }
        self.cancel.cancel();
        self.phase = SessionPhase::Terminated;
        self.state = None;
        self.pending_events.clear();
        self.unanswered.clear();

        if let Some(mut transport) = self.transport.take() {
            let timeout = self.config.shutdown_timeout;
            if !timeout.is_zero() {
                match tokio::time::timeout(timeout, transport.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("transport close failed: {e}"),
                    Err(_) => warn!("transport did not close within timeout; dropping it"),
                }
            }
        }

        info!("match session terminated");
        match self.event_tx.try_send(SessionEvent::Terminated) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                let timeout = self.config.shutdown_timeout;
                match tokio::time::timeout(timeout, self.event_tx.send(event)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => debug!("event channel closed, receiver dropped"),
                    Err(_) => warn!("event channel full, dropping Terminated"),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
}

impl<T, R> std::fmt::Debug for MatchSession<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchSession")
            .field("phase", &self.phase)
            .field("match_id", &self.state.as_ref().map(|s| s.id))
            .field("pending_events", &self.pending_events.len())
            .field("unanswered", &self.unanswered.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl<T, R> Drop for MatchSession<T, R> {
    fn drop(&mut self) {
        // `Drop` cannot await the close handshake; cancelling releases
        // anything still observing the scope and the transport is dropped.
        self.cancel.cancel();
        if self.phase != SessionPhase::Terminated {
            self.phase = SessionPhase::Terminated;
            emit_event(&self.event_tx, SessionEvent::Terminated);
        }
    }
}

// ── Exchange plumbing ───────────────────────────────────────────────

/// An action request on the wire, kept until its verdict arrives.
#[derive(Debug, Clone, Copy)]
struct SentAction {
    request_id: u64,
    seat: Wind,
    action: Action,
}

/// Cancellation scope for one exchange: a child of the session token that is
/// also cancelled when the response timeout elapses.
struct ExchangeScope {
    token: CancellationToken,
    timer: Option<JoinHandle<()>>,
}

impl ExchangeScope {
    fn new(session: &CancellationToken, timeout: Option<Duration>) -> Self {
        let token = session.child_token();
        let timer = timeout.map(|timeout| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        });
        Self { token, timer }
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the response timer fired (or the parent scope was cancelled).
    fn timed_out(&self) -> bool {
        self.timer.is_some() && self.token.is_cancelled()
    }
}

impl Drop for ExchangeScope {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

async fn handshake<T: Transport>(
    transport: &mut T,
    request: &ClientRequest,
    scope: &CancellationToken,
) -> Result<StartMatchResponse> {
    send_frame(transport, encode_request(request)?, scope).await?;
    let text = recv_frame(transport, scope).await?;
    decode_start_response(&text)
}

async fn send_frame<T: Transport>(
    transport: &mut T,
    text: String,
    scope: &CancellationToken,
) -> Result<()> {
    debug!(len = text.len(), "sending frame");
    tokio::select! {
        biased;
        _ = scope.cancelled() => Err(MatchError::Cancelled),
        sent = transport.send(text) => sent,
    }
}

async fn recv_frame<T: Transport>(transport: &mut T, scope: &CancellationToken) -> Result<String> {
    tokio::select! {
        biased;
        _ = scope.cancelled() => Err(MatchError::Cancelled),
        incoming = transport.recv() => match incoming {
            Some(Ok(text)) => {
                debug!(len = text.len(), "received frame");
                Ok(text)
            }
            Some(Err(e)) => Err(e),
            None => Err(MatchError::TransportClosed),
        },
    }
}

/// Emit an event to the view layer. If the channel is full, log a warning and
/// drop the event rather than stall the session.
fn emit_event(event_tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::{encode_server_message, ServerMessage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};
    use uuid::Uuid;

    /// Records sent frames and replays scripted replies, then hangs.
    struct MockTransport {
        incoming: VecDeque<Option<Result<String>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn new(
            incoming: Vec<Option<Result<String>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            };
            (transport, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            match self.incoming.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn initial_state() -> MatchState {
        let mut state = MatchState::new(Uuid::from_u128(7), Wind::East);
        state.players[Wind::East].hand = vec![TileId(0), TileId(4)];
        state.players[Wind::East].current_draw = Some(TileId(8));
        state
    }

    fn started_json() -> String {
        encode_server_message(&ServerMessage::match_started(initial_state())).unwrap()
    }

    #[tokio::test]
    async fn new_session_is_uninitialized() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (session, _events) = MatchSession::new(transport, SessionConfig::new());
        assert_eq!(session.phase(), SessionPhase::Uninitialized);
        assert!(session.state().is_none());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_sends_start_request_and_activates() {
        let (transport, sent, _closed) = MockTransport::new(vec![Some(Ok(started_json()))]);
        let (mut session, mut events) = MatchSession::new(transport, SessionConfig::new());

        let state = session.start().await.unwrap();
        assert_eq!(state, &initial_state());
        assert_eq!(session.phase(), SessionPhase::Active);

        let first: ClientRequest = serde_json::from_str(&sent.lock().unwrap()[0]).unwrap();
        assert!(matches!(first, ClientRequest::StartMatch { .. }));

        let event = events.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::StateChanged(_)));
    }

    #[tokio::test]
    async fn start_twice_is_a_phase_error() {
        let (transport, _sent, _closed) = MockTransport::new(vec![Some(Ok(started_json()))]);
        let (mut session, _events) = MatchSession::new(transport, SessionConfig::new());
        session.start().await.unwrap();
        let err = session.start().await.unwrap_err();
        assert!(matches!(
            err,
            MatchError::WrongPhase(SessionPhase::Active)
        ));
    }

    #[tokio::test]
    async fn action_before_start_is_a_phase_error() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (mut session, _events) = MatchSession::new(transport, SessionConfig::new());
        let err = session.discard(Wind::East, TileId(0)).await.unwrap_err();
        assert!(matches!(
            err,
            MatchError::WrongPhase(SessionPhase::Uninitialized)
        ));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_side_load_is_fatal() {
        let (transport, _sent, closed) = MockTransport::new(vec![Some(Ok(started_json()))]);
        let (mut session, _events) = MatchSession::new(transport, SessionConfig::new());

        let err = session
            .start_with(async { Err(MatchError::SideLoad("missing tile faces".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::SideLoad(_)));
        assert_eq!(session.phase(), SessionPhase::Terminated);
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn response_timeout_rolls_back_and_keeps_session() {
        let (transport, sent, _closed) = MockTransport::new(vec![Some(Ok(started_json()))]);
        let config = SessionConfig::new().with_response_timeout(Duration::from_millis(20));
        let (mut session, _events) = MatchSession::new(transport, config);
        session.start().await.unwrap();

        let err = session.discard(Wind::East, TileId(4)).await.unwrap_err();
        assert!(matches!(err, MatchError::Timeout));
        assert!(err.is_recoverable());
        assert_eq!(session.state(), Some(&initial_state()));
        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(sent.lock().unwrap().len(), 2);
        // Still waiting for the authority's word on it.
        assert_eq!(session.unanswered.len(), 1);
    }

    #[tokio::test]
    async fn side_load_cancellation_is_not_a_timeout() {
        for config in [
            SessionConfig::new(),
            SessionConfig::new().with_response_timeout(Duration::from_secs(60)),
        ] {
            let (transport, _sent, _closed) = MockTransport::new(vec![]);
            let (mut session, _events) = MatchSession::new(transport, config);
            let err = session
                .start_with(async { Err(MatchError::Cancelled) })
                .await
                .unwrap_err();
            assert!(matches!(err, MatchError::Cancelled), "got {err:?}");
            assert_eq!(session.phase(), SessionPhase::Terminated);
        }
    }

    #[tokio::test]
    async fn abandoned_request_is_answered_by_a_later_tagged_verdict() {
        let late = encode_server_message(&ServerMessage::accepted().answering(1)).unwrap();
        let current = encode_server_message(
            &ServerMessage::rejected(ErrorCode::NotYourTurn, "south to act").answering(2),
        )
        .unwrap();
        let (transport, sent, _closed) = MockTransport::new(vec![
            Some(Ok(started_json())),
            Some(Ok("{garbage".into())),
            Some(Ok(late)),
            Some(Ok(current)),
        ]);
        let (mut session, _events) = MatchSession::new(transport, SessionConfig::new());
        session.start().await.unwrap();

        assert!(session.discard(Wind::East, TileId(4)).await.is_err());
        assert_eq!(session.unanswered.len(), 1);

        // The authority took the first discard, so the second is refused.
        let err = session.discard(Wind::East, TileId(8)).await.unwrap_err();
        assert!(
            matches!(
                err,
                MatchError::ActionRejected {
                    code: Some(ErrorCode::NotYourTurn),
                    ..
                }
            ),
            "got {err:?}"
        );
        assert!(session.unanswered.is_empty());
        assert_eq!(session.state().unwrap().current_turn, Wind::South);
        let east = session.state().unwrap().player(Wind::East).clone();
        assert_eq!(east.discards, vec![TileId(4)]);

        let ids: Vec<u64> = sent.lock().unwrap()[1..]
            .iter()
            .map(|text| match serde_json::from_str(text).unwrap() {
                ClientRequest::DiscardTile(request) => request.request_id,
                other => panic!("expected DiscardTile, got {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn config_defaults() {
        let config = SessionConfig::new();
        assert_eq!(config.client_version, env!("CARGO_PKG_VERSION"));
        assert!(config.credentials.is_none());
        assert_eq!(config.event_channel_capacity, DEFAULT_EVENT_CHANNEL_CAPACITY);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert!(config.response_timeout.is_none());
    }

    #[tokio::test]
    async fn event_channel_capacity_is_clamped_to_one() {
        let config = SessionConfig::new().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[tokio::test]
    async fn double_terminate_does_not_panic() {
        let (transport, _sent, closed) = MockTransport::new(vec![Some(Ok(started_json()))]);
        let (mut session, mut events) = MatchSession::new(transport, SessionConfig::new());
        session.start().await.unwrap();

        session.terminate().await;
        session.terminate().await;

        assert!(closed.load(Ordering::Relaxed));
        assert!(session.state().is_none());
        let mut terminated = 0;
        while let Ok(event) = events.try_recv() {
            if event == SessionEvent::Terminated {
                terminated += 1;
            }
        }
        assert_eq!(terminated, 1);
    }

    #[tokio::test]
    async fn zero_shutdown_timeout_skips_close() {
        let (transport, _sent, closed) = MockTransport::new(vec![]);
        let config = SessionConfig::new().with_shutdown_timeout(Duration::ZERO);
        let (mut session, _events) = MatchSession::new(transport, config);
        session.terminate().await;
        assert!(!closed.load(Ordering::Relaxed));
        assert_eq!(session.phase(), SessionPhase::Terminated);
    }

    #[tokio::test]
    async fn drop_cancels_the_scope() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (session, _events) = MatchSession::new(transport, SessionConfig::new());
        let token = session.cancel_token();
        drop(session);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn drop_emits_terminated() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (session, mut events) = MatchSession::new(transport, SessionConfig::new());
        drop(session);
        assert_eq!(events.recv().await, Some(SessionEvent::Terminated));
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn debug_impl_for_session() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (session, _events) = MatchSession::new(transport, SessionConfig::new());
        let debug_str = format!("{session:?}");
        assert!(debug_str.contains("MatchSession"));
        assert!(debug_str.contains("Uninitialized"));
    }
}

//! The session manager.
//!
//! Owns the connection state machine, orchestrates the handshake (credential
//! -> media -> peer connection -> offer/answer -> control channel -> session
//! configuration -> opening content), supervises transport failures with
//! bounded linear-backoff reconnects, and exposes the public operation and
//! event surface.
//!
//! # Concurrency
//!
//! All mutable state lives behind the inner `Arc`; transport callbacks hold
//! a `Weak` reference and carry the epoch they were created under, so
//! events from a torn-down transport are ignored. `connect()` and
//! `disconnect()` are guarded by state checks; the guard is advisory and
//! callers serialize their own invocations.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::auth::{ProvisionClient, SessionEndpoints};
use crate::config::{SessionConfig, SessionConfigPatch, ToolDefinition};
use crate::core::media::{CaptureConfig, CaptureSource, SilenceSource, SourceHandle};
use crate::core::protocol::ProtocolEngine;
use crate::core::session::events::{NoticeCallback, ObserverRegistry, Subscription};
use crate::core::session::metrics::{DiagnosticsSnapshot, Metrics};
use crate::core::session::state::ConnectionState;
use crate::core::session::supervisor::{FailureKind, ReconnectPolicy};
use crate::core::transport::{
    self, ControlChannel, DataChannelTransport, TransportHooks,
};
use crate::errors::{SessionError, SessionResult};

/// One-time notice raised when the microphone is unavailable.
const MIC_UNAVAILABLE_NOTICE: &str =
    "Microphone unavailable. Continuing without audio input; you can still send text and hear responses.";

/// Mid-session configuration replacement (persona handoff without tearing
/// down transport).
#[derive(Debug, Clone)]
pub struct AiConfigUpdate {
    /// Replacement instructions.
    pub instructions: String,
    /// Replacement tool set, or `None` to keep the current tools.
    pub tools: Option<Vec<ToolDefinition>>,
}

/// Real-time voice session manager.
///
/// Constructed with a [`SessionConfig`]; may be connected and disconnected
/// repeatedly (not concurrently). See the crate docs for the event surface.
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct ActiveTransport {
    peer: Arc<RTCPeerConnection>,
    channel: Arc<DataChannelTransport>,
    engine: Arc<ProtocolEngine>,
    local_track: Arc<TrackLocalStaticSample>,
    source: SourceHandle,
    pump: tokio::task::JoinHandle<()>,
}

struct SessionInner {
    /// Stable per-instance id carried in log lines.
    client_id: String,
    config: Mutex<SessionConfig>,
    endpoints: SessionEndpoints,
    http: reqwest::Client,

    state: RwLock<ConnectionState>,
    metrics: Arc<Metrics>,
    transport: Mutex<Option<ActiveTransport>>,

    /// Bumped on every establish/disconnect; transport callbacks from older
    /// epochs are ignored.
    epoch: AtomicU64,
    muted: Arc<AtomicBool>,
    capture_denied: AtomicBool,
    notice_sent: AtomicBool,
    reconnecting: AtomicBool,

    notice: Mutex<Option<NoticeCallback>>,
    state_observers: ObserverRegistry<ConnectionState>,
    message_observers: ObserverRegistry<Value>,
    error_observers: ObserverRegistry<SessionError>,
    audio_observers: ObserverRegistry<Arc<TrackRemote>>,
}

impl SessionManager {
    /// Create a manager with the default provider endpoints.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_endpoints(config, SessionEndpoints::default())
    }

    /// Create a manager with explicit collaborator endpoints.
    pub fn with_endpoints(config: SessionConfig, endpoints: SessionEndpoints) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                client_id: uuid::Uuid::new_v4().to_string(),
                config: Mutex::new(config),
                endpoints,
                http: reqwest::Client::new(),
                state: RwLock::new(ConnectionState::Disconnected),
                metrics: Arc::new(Metrics::new()),
                transport: Mutex::new(None),
                epoch: AtomicU64::new(0),
                muted: Arc::new(AtomicBool::new(true)),
                capture_denied: AtomicBool::new(false),
                notice_sent: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                notice: Mutex::new(None),
                state_observers: ObserverRegistry::new("state"),
                message_observers: ObserverRegistry::new("message"),
                error_observers: ObserverRegistry::new("error"),
                audio_observers: ObserverRegistry::new("audio-stream"),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Establish the session. No-op when already connecting or connected.
    ///
    /// Resolves once connected; a handshake failure moves the state to
    /// `Failed` and is returned to the caller (not retried automatically).
    pub async fn connect(&self) -> SessionResult<()> {
        let inner = self.inner.clone();

        {
            let state = *inner.state.read();
            if matches!(
                state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                debug!(%state, "connect ignored");
                return Ok(());
            }
        }

        // Fatal configuration errors surface before any network activity.
        inner.config.lock().validate()?;

        inner.metrics.reset();
        inner.metrics.mark_started();
        inner.notice_sent.store(false, Ordering::SeqCst);
        inner.capture_denied.store(false, Ordering::SeqCst);
        inner.set_state(ConnectionState::Connecting);

        let result = SessionInner::establish(&inner).await;

        // disconnect() during the handshake abandons this attempt; whatever
        // resolved into the torn-down manager is a no-op.
        if inner.state() != ConnectionState::Connecting {
            debug!("connect attempt abandoned by disconnect");
            inner.teardown().await;
            return Ok(());
        }

        match result {
            Ok(()) => {
                inner.set_state(ConnectionState::Connected);
                info!(client_id = %inner.client_id, "session connected");
                Ok(())
            }
            Err(e) => {
                error!("connect failed: {e}");
                inner.metrics.record_error(e.to_string());
                inner.metrics.mark_ended();
                inner.teardown().await;
                inner.set_state(ConnectionState::Failed);
                inner.error_observers.notify(&e);
                Err(e)
            }
        }
    }

    /// Tear down the session. No-op when already disconnected; otherwise
    /// unconditional, even mid-handshake.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        if inner.state() == ConnectionState::Disconnected {
            debug!("disconnect ignored; already disconnected");
            return;
        }

        // Invalidate in-flight callbacks and any pending reconnect.
        inner.epoch.fetch_add(1, Ordering::SeqCst);
        inner.teardown().await;
        inner.metrics.mark_ended();
        inner.set_state(ConnectionState::Disconnected);
        inner.clear_observers();
        info!(client_id = %inner.client_id, "session disconnected");
    }

    // -------------------------------------------------------------------------
    // Outbound intents
    // -------------------------------------------------------------------------

    /// Send a user text message. Returns `false` when the channel is not
    /// open or a frame fails to send.
    pub async fn send_message(&self, text: &str) -> bool {
        let Some(engine) = self.inner.engine() else {
            debug!("send_message with no active transport");
            return false;
        };
        let ok = engine.send_user_message(text).await;
        if !ok {
            self.inner.note_send_failure("send_message");
        }
        ok
    }

    /// Submit a function-call result for the given call id.
    pub async fn send_function_result(&self, call_id: &str, result: &str) -> bool {
        let Some(engine) = self.inner.engine() else {
            debug!("send_function_result with no active transport");
            return false;
        };
        let ok = engine.send_function_result(call_id, result).await;
        if !ok {
            self.inner.note_send_failure("send_function_result");
        }
        ok
    }

    /// Replace instructions/tools mid-session and wait for the provider's
    /// acknowledgement. Timeout resolves to `false`; not retried.
    pub async fn replace_ai_configuration(&self, update: AiConfigUpdate) -> bool {
        let mut candidate = self.inner.config.lock().clone();
        candidate.instructions = update.instructions;
        if let Some(tools) = update.tools {
            candidate.tools = tools;
        }
        if candidate.validate().is_err() {
            warn!("replace_ai_configuration rejected: empty instructions");
            return false;
        }

        let Some(engine) = self.inner.engine() else {
            debug!("replace_ai_configuration with no active transport");
            return false;
        };

        // Commit first so a reconnect carries the new persona even if the
        // acknowledgement below times out.
        *self.inner.config.lock() = candidate.clone();
        engine.replace_configuration(&candidate).await
    }

    /// Commit the input audio buffer (push-to-talk).
    pub async fn commit_input_audio_buffer(&self) -> bool {
        let Some(engine) = self.inner.engine() else {
            return false;
        };
        let ok = engine.commit_input_audio_buffer().await;
        if !ok {
            self.inner.note_send_failure("commit_input_audio_buffer");
        }
        ok
    }

    /// Discard the uncommitted input audio buffer (push-to-talk).
    pub async fn clear_input_audio_buffer(&self) -> bool {
        let Some(engine) = self.inner.engine() else {
            return false;
        };
        let ok = engine.clear_input_audio_buffer().await;
        if !ok {
            self.inner.note_send_failure("clear_input_audio_buffer");
        }
        ok
    }

    /// Manually request a model response (push-to-talk; commit first).
    pub async fn create_response(&self) -> bool {
        let Some(engine) = self.inner.engine() else {
            return false;
        };
        let ok = engine.create_response().await;
        if !ok {
            self.inner.note_send_failure("create_response");
        }
        ok
    }

    /// Cancel the in-flight response (barge-in).
    pub async fn cancel_response(&self) -> bool {
        let Some(engine) = self.inner.engine() else {
            return false;
        };
        let ok = engine.cancel_response().await;
        if !ok {
            self.inner.note_send_failure("cancel_response");
        }
        ok
    }

    // -------------------------------------------------------------------------
    // Local controls and accessors
    // -------------------------------------------------------------------------

    /// Toggle the microphone mute state; returns the resulting state
    /// (`true` = muted). Always muted while capture is denied.
    pub fn toggle_mute(&self) -> bool {
        if self.inner.capture_denied.load(Ordering::SeqCst) {
            debug!("mute toggle ignored; capture denied");
            return true;
        }
        let muted = !self.inner.muted.load(Ordering::SeqCst);
        self.inner.muted.store(muted, Ordering::SeqCst);
        debug!(muted, "mute toggled");
        muted
    }

    /// Merge a partial configuration update. Never emits protocol frames.
    pub fn update_config(&self, patch: SessionConfigPatch) {
        patch.apply(&mut self.inner.config.lock());
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Read-only diagnostics snapshot.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        let (peer, channel) = {
            let transport = self.inner.transport.lock();
            match transport.as_ref() {
                Some(active) => (
                    active.peer.connection_state().to_string(),
                    active.channel.ready_state(),
                ),
                None => ("none".to_string(), "none".to_string()),
            }
        };
        DiagnosticsSnapshot {
            state: self.inner.state().to_string(),
            metrics: self.inner.metrics.snapshot(),
            peer_connection: peer,
            control_channel: channel,
        }
    }

    /// Whether the control channel is open.
    pub fn is_data_channel_ready(&self) -> bool {
        self.inner
            .transport
            .lock()
            .as_ref()
            .map(|active| active.channel.is_open())
            .unwrap_or(false)
    }

    /// Whether all transport handles have been released.
    pub fn is_cleaned_up(&self) -> bool {
        self.inner.transport.lock().is_none()
    }

    /// The local audio track, while a transport exists.
    pub fn audio_input_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.inner
            .transport
            .lock()
            .as_ref()
            .map(|active| active.local_track.clone())
    }

    /// Whether local capture was denied and the silent fallback is active.
    pub fn is_capture_denied(&self) -> bool {
        self.inner.capture_denied.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Event surface
    // -------------------------------------------------------------------------

    /// Subscribe to state changes.
    pub fn on_state_change(
        &self,
        listener: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.state_observers.subscribe(listener)
    }

    /// Subscribe to inbound control-channel frames (verbatim).
    pub fn on_message(&self, listener: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        self.inner.message_observers.subscribe(listener)
    }

    /// Subscribe to errors.
    pub fn on_error(
        &self,
        listener: impl Fn(&SessionError) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.error_observers.subscribe(listener)
    }

    /// Subscribe to inbound remote audio tracks.
    pub fn on_audio_stream(
        &self,
        listener: impl Fn(&Arc<TrackRemote>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.audio_observers.subscribe(listener)
    }

    /// Register the one-time user-facing notice callback.
    pub fn on_notice(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.inner.notice.lock() = Some(Arc::new(callback));
    }
}

// =============================================================================
// Inner implementation
// =============================================================================

impl SessionInner {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn epoch_now(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn engine(&self) -> Option<Arc<ProtocolEngine>> {
        self.transport.lock().as_ref().map(|t| t.engine.clone())
    }

    /// Transition to `next`, notifying state observers. Same-state
    /// transitions are no-ops and fire no notification.
    fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.state.write();
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        };
        if changed {
            debug!(state = %next, "state changed");
            self.state_observers.notify(&next);
        }
    }

    /// Run the full handshake: credential, media, peer connection,
    /// offer/answer, channel bring-up, session configuration.
    async fn establish(inner: &Arc<Self>) -> SessionResult<()> {
        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let config = inner.config.lock().clone();

        // (1) Ephemeral credential, gated on the full session config.
        let provision =
            ProvisionClient::new(inner.http.clone(), &inner.endpoints.session_endpoint);
        let credential = provision.mint_credential(&config).await?;
        info!(session_id = ?credential.session_id, "ephemeral credential minted");

        // (2) Local audio, with silent fallback on capture denial.
        let capture_config = CaptureConfig::default();
        let opened = tokio::task::spawn_blocking({
            let capture_config = capture_config.clone();
            move || CaptureSource::open(capture_config)
        })
        .await
        .map_err(|e| SessionError::Media(format!("capture task failed: {e}")))?;

        let source = match opened {
            Ok(running) => {
                inner
                    .muted
                    .store(!config.start_unmuted, Ordering::SeqCst);
                running
            }
            Err(e) => {
                warn!("audio capture unavailable, using silent source: {e}");
                inner.capture_denied.store(true, Ordering::SeqCst);
                inner.muted.store(true, Ordering::SeqCst);
                inner.raise_capture_notice();
                SilenceSource::start(capture_config)
            }
        };

        // (3) Peer connection, local track, ordered control channel.
        let setup = transport::create_peer(inner.transport_hooks(epoch)).await?;
        let engine = Arc::new(ProtocolEngine::new(
            setup.channel.clone() as Arc<dyn ControlChannel>,
            inner.metrics.clone(),
        ));

        let pump = transport::spawn_audio_pump(
            source.frames,
            setup.local_track.clone(),
            inner.muted.clone(),
        );

        // Handles are stored before negotiation so inbound routing and
        // diagnostics see the transport as soon as it exists.
        *inner.transport.lock() = Some(ActiveTransport {
            peer: setup.peer.clone(),
            channel: setup.channel.clone(),
            engine: engine.clone(),
            local_track: setup.local_track,
            source: source.handle,
            pump,
        });

        // (4-5) Offer/answer against the negotiation endpoint.
        transport::negotiate(
            &setup.peer,
            &inner.http,
            &inner.endpoints.negotiation_endpoint,
            &credential,
            config.voice.as_deref(),
        )
        .await?;

        // Control-channel bring-up, then the session configuration
        // handshake and opening content.
        setup.channel.wait_open(config.timeout()).await?;
        engine.run_session_handshake(&config).await?;

        Ok(())
    }

    fn transport_hooks(self: &Arc<Self>, epoch: u64) -> TransportHooks {
        let weak = Arc::downgrade(self);

        let on_peer_state = {
            let weak = weak.clone();
            Box::new(move |state: RTCPeerConnectionState| {
                if let Some(inner) = weak.upgrade() {
                    debug!(%state, "peer connection state changed");
                    if matches!(
                        state,
                        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected
                    ) {
                        inner.transport_failure(
                            epoch,
                            FailureKind::PeerDegraded(state.to_string()),
                        );
                    }
                }
            }) as Box<dyn Fn(RTCPeerConnectionState) + Send + Sync>
        };

        let on_remote_track = {
            let weak = weak.clone();
            Box::new(move |track: Arc<TrackRemote>| {
                if let Some(inner) = weak.upgrade() {
                    if inner.epoch_now() == epoch {
                        inner.audio_observers.notify(&track);
                    }
                }
            }) as Box<dyn Fn(Arc<TrackRemote>) + Send + Sync>
        };

        let on_channel_message = {
            let weak = weak.clone();
            Box::new(move |text: String| {
                if let Some(inner) = weak.upgrade() {
                    inner.route_inbound(epoch, &text);
                }
            }) as Box<dyn Fn(String) + Send + Sync>
        };

        let on_channel_error = {
            let weak = weak.clone();
            Box::new(move |message: String| {
                if let Some(inner) = weak.upgrade() {
                    inner.transport_failure(epoch, FailureKind::ChannelError(message));
                }
            }) as Box<dyn Fn(String) + Send + Sync>
        };

        let on_channel_close = {
            let weak = weak.clone();
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.transport_failure(epoch, FailureKind::ChannelClosed);
                }
            }) as Box<dyn Fn() + Send + Sync>
        };

        TransportHooks {
            on_peer_state,
            on_remote_track,
            on_channel_message,
            on_channel_error,
            on_channel_close,
        }
    }

    fn route_inbound(&self, epoch: u64, raw: &str) {
        if self.epoch_now() != epoch {
            trace!("inbound frame from stale transport ignored");
            return;
        }
        let Some(engine) = self.engine() else {
            trace!("inbound frame with no active transport");
            return;
        };
        if let Some(value) = engine.handle_inbound(raw) {
            self.message_observers.notify(&value);
        }
    }

    /// Entry point of the failure supervisor. Only acts on current-epoch
    /// events while the session believes itself connected.
    fn transport_failure(self: &Arc<Self>, epoch: u64, kind: FailureKind) {
        if self.epoch_now() != epoch {
            trace!("stale transport failure ignored");
            return;
        }
        if self.state() != ConnectionState::Connected {
            trace!(%kind, "transport event outside connected state ignored");
            return;
        }
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            trace!("reconnect already in progress");
            return;
        }

        warn!(%kind, "transport failure detected");
        let inner = self.clone();
        tokio::spawn(async move {
            inner.supervise_reconnect(kind).await;
            inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    /// Bounded linear-backoff reconnect loop. The attempt counter is only
    /// reset by a fresh connect cycle, so a mid-cycle success keeps the
    /// count it reached.
    async fn supervise_reconnect(self: &Arc<Self>, kind: FailureKind) {
        self.metrics.record_error(kind.to_string());
        self.set_state(ConnectionState::Connecting);
        self.teardown().await;

        loop {
            let policy = {
                let config = self.config.lock();
                ReconnectPolicy::with_max_attempts(config.retry_attempts)
            };
            let attempts = self.metrics.reconnect_attempts();
            if !policy.should_retry(attempts) {
                let err = SessionError::Transport(format!(
                    "connection lost after {attempts} reconnection attempts: {kind}"
                ));
                error!("{err}");
                self.metrics.record_error(err.to_string());
                self.metrics.mark_ended();
                self.set_state(ConnectionState::Failed);
                self.error_observers.notify(&err);
                return;
            }

            let attempt = attempts + 1;
            self.metrics.set_reconnect_attempts(attempt);
            let delay = policy.delay_for(attempt);
            info!(attempt, ?delay, "scheduling reconnect");
            sleep(delay).await;

            if self.state() != ConnectionState::Connecting {
                debug!("reconnect abandoned");
                return;
            }

            match SessionInner::establish(self).await {
                Ok(()) => {
                    if self.state() != ConnectionState::Connecting {
                        debug!("reconnect completed into a torn-down manager");
                        self.teardown().await;
                        return;
                    }
                    self.set_state(ConnectionState::Connected);
                    info!(attempt, "reconnected");
                    return;
                }
                Err(e) => {
                    warn!(attempt, "reconnect attempt failed: {e}");
                    self.metrics.record_error(e.to_string());
                    self.teardown().await;
                }
            }
        }
    }

    /// A send operation failed while the session claimed to be connected;
    /// self-correct through the transport failure path.
    fn note_send_failure(self: &Arc<Self>, operation: &str) {
        if self.state() == ConnectionState::Connected {
            self.transport_failure(
                self.epoch_now(),
                FailureKind::SendFailed(operation.to_string()),
            );
        }
    }

    /// Release every transport handle. Idempotent.
    async fn teardown(&self) {
        let active = self.transport.lock().take();
        if let Some(mut active) = active {
            active.pump.abort();
            active.source.stop();
            if let Err(e) = active.peer.close().await {
                warn!("error closing peer connection: {e}");
            }
            debug!("transport torn down");
        }
    }

    fn clear_observers(&self) {
        self.state_observers.clear();
        self.message_observers.clear();
        self.error_observers.clear();
        self.audio_observers.clear();
    }

    fn raise_capture_notice(&self) {
        if self.notice_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        let callback = self.notice.lock().clone();
        if let Some(callback) = callback {
            callback(MIC_UNAVAILABLE_NOTICE);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn valid_config() -> SessionConfig {
        SessionConfig {
            instructions: "You are a helpful assistant.".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fresh_manager_state() {
        let manager = SessionManager::new(valid_config());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.is_cleaned_up());
        assert!(!manager.is_data_channel_ready());
        assert!(!manager.is_capture_denied());
        assert!(manager.audio_input_track().is_none());

        let diag = manager.diagnostics();
        assert_eq!(diag.state, "disconnected");
        assert_eq!(diag.peer_connection, "none");
        assert_eq!(diag.control_channel, "none");
        assert!(diag.metrics.duration_ms.is_none());
        assert_eq!(diag.metrics.messages_sent, 0);
        assert_eq!(diag.metrics.messages_received, 0);
    }

    #[tokio::test]
    async fn test_connect_rejects_missing_instructions() {
        let manager = SessionManager::new(SessionConfig::default());
        match manager.connect().await {
            Err(SessionError::Configuration(msg)) => {
                assert!(msg.contains("instructions"));
            }
            other => panic!("expected Configuration error, got {other:?}"),
        }
        // No transition happened: the error is pre-network and pre-state.
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.is_cleaned_up());
    }

    #[tokio::test]
    async fn test_disconnect_when_disconnected_is_noop() {
        let manager = SessionManager::new(valid_config());
        let notified = Arc::new(AtomicUsize::new(0));
        let n = notified.clone();
        let _sub = manager.on_state_change(move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        });

        manager.disconnect().await;

        assert_eq!(notified.load(Ordering::SeqCst), 0);
        // The no-op must not clear listener sets either.
        assert_eq!(manager.inner.state_observers.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_noop_when_connecting_or_connected() {
        let manager = SessionManager::new(valid_config());
        manager.inner.set_state(ConnectionState::Connecting);
        manager.inner.metrics.record_sent();

        assert!(manager.connect().await.is_ok());
        // Metrics untouched by the no-op.
        assert_eq!(manager.diagnostics().metrics.messages_sent, 1);

        manager.inner.set_state(ConnectionState::Connected);
        assert!(manager.connect().await.is_ok());
        assert_eq!(manager.diagnostics().metrics.messages_sent, 1);
    }

    #[tokio::test]
    async fn test_same_state_transition_fires_no_notification() {
        let manager = SessionManager::new(valid_config());
        let notified = Arc::new(AtomicUsize::new(0));
        let n = notified.clone();
        let _sub = manager.on_state_change(move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        });

        manager.inner.set_state(ConnectionState::Connecting);
        manager.inner.set_state(ConnectionState::Connecting);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_state_notifications_in_registration_order() {
        let manager = SessionManager::new(valid_config());
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        let _s1 = manager.on_state_change(move |s| o1.lock().push(format!("a:{s}")));
        let o2 = order.clone();
        let _s2 = manager.on_state_change(move |s| o2.lock().push(format!("b:{s}")));

        manager.inner.set_state(ConnectionState::Connecting);
        assert_eq!(
            order.lock().clone(),
            vec!["a:connecting".to_string(), "b:connecting".to_string()]
        );
    }

    #[tokio::test]
    async fn test_toggle_mute_flips_and_denial_pins_muted() {
        let manager = SessionManager::new(valid_config());
        // Default idle state is muted; first toggle unmutes.
        assert!(!manager.toggle_mute());
        assert!(manager.toggle_mute());

        manager
            .inner
            .capture_denied
            .store(true, Ordering::SeqCst);
        assert!(manager.toggle_mute());
        assert!(manager.toggle_mute());
    }

    #[tokio::test]
    async fn test_update_config_merges_patch() {
        let manager = SessionManager::new(valid_config());
        manager.update_config(SessionConfigPatch {
            voice: Some("cedar".to_string()),
            retry_attempts: Some(9),
            ..Default::default()
        });
        let config = manager.inner.config.lock().clone();
        assert_eq!(config.voice.as_deref(), Some("cedar"));
        assert_eq!(config.retry_attempts, 9);
        assert_eq!(config.instructions, "You are a helpful assistant.");
    }

    #[tokio::test]
    async fn test_send_operations_without_transport_return_false() {
        let manager = SessionManager::new(valid_config());
        assert!(!manager.send_message("hello").await);
        assert!(!manager.send_function_result("call_1", "{}").await);
        assert!(!manager.commit_input_audio_buffer().await);
        assert!(!manager.create_response().await);
        assert!(!manager.cancel_response().await);
        assert!(!manager.clear_input_audio_buffer().await);
        assert!(
            !manager
                .replace_ai_configuration(AiConfigUpdate {
                    instructions: "new persona".to_string(),
                    tools: None,
                })
                .await
        );
    }

    #[tokio::test]
    async fn test_replace_ai_configuration_rejects_empty_instructions() {
        let manager = SessionManager::new(valid_config());
        assert!(
            !manager
                .replace_ai_configuration(AiConfigUpdate {
                    instructions: "  ".to_string(),
                    tools: None,
                })
                .await
        );
    }

    #[tokio::test]
    async fn test_message_subscription_cancel() {
        let manager = SessionManager::new(valid_config());
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let sub = manager.on_message(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        manager
            .inner
            .message_observers
            .notify(&serde_json::json!({"type": "response.done"}));
        sub.cancel();
        manager
            .inner
            .message_observers
            .notify(&serde_json::json!({"type": "response.done"}));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_epoch_failure_is_ignored() {
        let manager = SessionManager::new(valid_config());
        manager.inner.set_state(ConnectionState::Connected);
        let old_epoch = manager.inner.epoch_now();
        manager.inner.epoch.fetch_add(1, Ordering::SeqCst);

        manager
            .inner
            .transport_failure(old_epoch, FailureKind::ChannelClosed);
        // Still connected: the stale event must not start a reconnect.
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(!manager.inner.reconnecting.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_reaches_failed() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = SessionConfig {
            retry_attempts: 2,
            ..valid_config()
        };
        let manager = SessionManager::with_endpoints(
            config,
            SessionEndpoints {
                session_endpoint: format!("{}/session", server.uri()),
                negotiation_endpoint: format!("{}/sdp", server.uri()),
            },
        );

        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        let _sub = manager.on_error(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        // Simulate an established session losing its channel.
        manager.inner.set_state(ConnectionState::Connected);
        manager
            .inner
            .transport_failure(manager.inner.epoch_now(), FailureKind::ChannelClosed);

        // Both scheduled attempts fail against the 500ing endpoint, then the
        // supervisor escalates to Failed.
        let mut settled = false;
        for _ in 0..1000 {
            if manager.state() == ConnectionState::Failed
                && !manager.inner.reconnecting.load(Ordering::SeqCst)
            {
                settled = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(settled, "supervisor never escalated to Failed");

        let metrics = manager.diagnostics().metrics;
        assert_eq!(metrics.reconnect_attempts, 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capture_notice_fires_once() {
        let manager = SessionManager::new(valid_config());
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        manager.on_notice(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        manager.inner.raise_capture_notice();
        manager.inner.raise_capture_notice();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

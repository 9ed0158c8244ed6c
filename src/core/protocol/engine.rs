//! Control-channel protocol engine.
//!
//! Translates application intents into wire frames and demultiplexes
//! inbound frames. The engine owns the session-configuration handshake,
//! the opening content, and the one-shot `session.updated` acknowledgement
//! bookkeeping; it talks to the transport only through the
//! [`ControlChannel`] seam.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

use super::frames::{
    ClientFrame, ConversationItem, ResponseConfig, SessionUpdatePayload, inbound,
};
use crate::config::SessionConfig;
use crate::core::session::metrics::Metrics;
use crate::core::transport::ControlChannel;
use crate::errors::{SessionError, SessionResult};

/// Delay between a conversation-item frame and the response frame that
/// requests a reply to it. The pairing relies on this fixed delay rather
/// than an acknowledgement; the remote side's ordering guarantees for the
/// two frames are unspecified, so this is a soft-ordering assumption.
pub const RESPONSE_CREATE_DELAY: Duration = Duration::from_millis(100);

/// Settle delay after the initial session.update when no acknowledgement
/// wait is required.
pub const SESSION_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Bounded wait for a `session.updated` acknowledgement.
pub const SESSION_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Synthetic user turn injected when resuming an earlier conversation.
const RESUME_PROMPT: &str =
    "I'm back. Please welcome me back briefly and continue where we left off.";

/// Minimal placeholder user turn that seeds the opening response.
const OPENING_PLACEHOLDER: &str = "Hello.";

/// Protocol engine bound to one control channel.
pub struct ProtocolEngine {
    channel: Arc<dyn ControlChannel>,
    metrics: Arc<Metrics>,
    pending_session_ack: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProtocolEngine {
    /// Create an engine for an open (or opening) control channel.
    pub fn new(channel: Arc<dyn ControlChannel>, metrics: Arc<Metrics>) -> Self {
        Self {
            channel,
            metrics,
            pending_session_ack: Mutex::new(None),
        }
    }

    /// Whether the underlying channel is open.
    pub fn is_channel_open(&self) -> bool {
        self.channel.is_open()
    }

    // -------------------------------------------------------------------------
    // Session configuration handshake
    // -------------------------------------------------------------------------

    /// Run the initial configuration handshake: send the session
    /// configuration, wait for the acknowledgement (or a settle delay),
    /// then inject the opening content.
    ///
    /// Missing instructions fail here, before any frame is sent.
    pub async fn run_session_handshake(&self, config: &SessionConfig) -> SessionResult<()> {
        config.validate()?;

        let frame = ClientFrame::SessionUpdate {
            session: SessionUpdatePayload::from_config(config),
        };

        if config.turn_detection.requires_manual_response() {
            // Manual response control: opening content must not race the
            // configuration, so wait for the acknowledgement.
            let ack = self.register_session_ack();
            if let Err(e) = self.send_frame(&frame).await {
                self.pending_session_ack.lock().take();
                return Err(e);
            }
            match timeout(SESSION_ACK_TIMEOUT, ack).await {
                Ok(Ok(())) => debug!("session configuration acknowledged"),
                _ => {
                    self.pending_session_ack.lock().take();
                    warn!("no session.updated acknowledgement; proceeding with opening content");
                }
            }
        } else {
            self.send_frame(&frame).await?;
            sleep(SESSION_SETTLE_DELAY).await;
        }

        self.send_opening_content(config).await
    }

    async fn send_opening_content(&self, config: &SessionConfig) -> SessionResult<()> {
        let (item, response) = if config.is_resume {
            // History is already folded into the instructions; ask for a
            // welcome-back turn with no special response instructions.
            (ConversationItem::user_text(RESUME_PROMPT), None)
        } else {
            (
                ConversationItem::user_text(OPENING_PLACEHOLDER),
                config
                    .greeting_instructions
                    .clone()
                    .map(|instructions| ResponseConfig {
                        instructions: Some(instructions),
                        ..Default::default()
                    }),
            )
        };

        self.send_frame(&ClientFrame::ConversationItemCreate { item })
            .await?;
        sleep(RESPONSE_CREATE_DELAY).await;
        if !self.channel.is_open() {
            return Err(SessionError::ChannelNotOpen);
        }
        self.send_frame(&ClientFrame::ResponseCreate { response })
            .await
    }

    // -------------------------------------------------------------------------
    // Outbound intents
    // -------------------------------------------------------------------------

    /// Send a user text message: item create, then (after the fixed delay)
    /// a response request. The second frame re-checks channel readiness
    /// and is skipped if the channel closed in the interim.
    pub async fn send_user_message(&self, text: &str) -> bool {
        let item_frame = ClientFrame::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        };
        if self.send_frame(&item_frame).await.is_err() {
            return false;
        }

        sleep(RESPONSE_CREATE_DELAY).await;
        if !self.channel.is_open() {
            warn!("channel closed between item create and response create");
            return false;
        }
        self.send_frame(&ClientFrame::ResponseCreate { response: None })
            .await
            .is_ok()
    }

    /// Submit a function-call result and immediately request a response to
    /// keep the turn moving.
    pub async fn send_function_result(&self, call_id: &str, output: &str) -> bool {
        let item_frame = ClientFrame::ConversationItemCreate {
            item: ConversationItem::function_output(call_id, output),
        };
        if self.send_frame(&item_frame).await.is_err() {
            return false;
        }
        self.send_frame(&ClientFrame::ResponseCreate { response: None })
            .await
            .is_ok()
    }

    /// Replace the session configuration mid-session and wait for the
    /// `session.updated` acknowledgement. Timeout is reported as failure
    /// and is not retried.
    pub async fn replace_configuration(&self, config: &SessionConfig) -> bool {
        let frame = ClientFrame::SessionUpdate {
            session: SessionUpdatePayload::from_config(config),
        };

        let ack = self.register_session_ack();
        if self.send_frame(&frame).await.is_err() {
            self.pending_session_ack.lock().take();
            return false;
        }

        match timeout(SESSION_ACK_TIMEOUT, ack).await {
            Ok(Ok(())) => true,
            _ => {
                self.pending_session_ack.lock().take();
                let err = SessionError::AckTimeout("session.updated".to_string());
                self.metrics.record_error(err.to_string());
                warn!("session.updated acknowledgement never arrived");
                false
            }
        }
    }

    /// Commit the input audio buffer (manual turn detection).
    pub async fn commit_input_audio_buffer(&self) -> bool {
        self.send_frame(&ClientFrame::InputAudioBufferCommit)
            .await
            .is_ok()
    }

    /// Discard the uncommitted input audio buffer.
    pub async fn clear_input_audio_buffer(&self) -> bool {
        self.send_frame(&ClientFrame::InputAudioBufferClear)
            .await
            .is_ok()
    }

    /// Request a model response (manual turn detection).
    pub async fn create_response(&self) -> bool {
        self.send_frame(&ClientFrame::ResponseCreate { response: None })
            .await
            .is_ok()
    }

    /// Cancel the in-flight response.
    pub async fn cancel_response(&self) -> bool {
        self.send_frame(&ClientFrame::ResponseCancel).await.is_ok()
    }

    // -------------------------------------------------------------------------
    // Inbound demultiplexing
    // -------------------------------------------------------------------------

    /// Handle one inbound frame: count it, match any pending
    /// acknowledgement, and hand the parsed value back for fan-out.
    /// Returns `None` only for malformed payloads.
    pub fn handle_inbound(&self, raw: &str) -> Option<Value> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("discarding malformed control frame: {e}");
                return None;
            }
        };

        self.metrics.record_received();

        match value.get("type").and_then(Value::as_str) {
            Some(inbound::SESSION_UPDATED) => {
                if let Some(ack) = self.pending_session_ack.lock().take() {
                    let _ = ack.send(());
                }
            }
            Some(inbound::ERROR) => {
                warn!(frame = %value, "provider reported an error frame");
            }
            Some(inbound::SESSION_CREATED)
            | Some(inbound::RESPONSE_CREATED)
            | Some(inbound::RESPONSE_DONE)
            | Some(inbound::FUNCTION_CALL_ARGUMENTS_DONE) => {
                trace!(frame_type = value["type"].as_str(), "recognized frame");
            }
            _ => {}
        }

        Some(value)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn register_session_ack(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.pending_session_ack.lock() = Some(tx);
        rx
    }

    async fn send_frame(&self, frame: &ClientFrame) -> SessionResult<()> {
        if !self.channel.is_open() {
            return Err(SessionError::ChannelNotOpen);
        }
        let payload = serde_json::to_string(frame)
            .map_err(|e| SessionError::Send(format!("serialization failed: {e}")))?;
        self.channel.send(payload).await?;
        self.metrics.record_sent();
        trace!(frame_type = frame.frame_type(), "sent control frame");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

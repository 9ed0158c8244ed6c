//! Control-channel wire frames.
//!
//! One JSON object per data-channel message. Outbound frames are typed and
//! serialized with serde; inbound frames are parsed to `serde_json::Value`
//! and passed through to subscribers unmodified, with the engine reading
//! only the `type` field for its own bookkeeping.
//!
//! Outbound frame types:
//! - session.update - full session configuration
//! - conversation.item.create - user text or function-call output item
//! - response.create - request a model response
//! - response.cancel - cancel the in-flight response
//! - input_audio_buffer.commit - commit the audio buffer (manual turns)
//! - input_audio_buffer.clear - discard the uncommitted audio buffer

use serde::{Deserialize, Serialize};

use crate::config::{SessionConfig, ToolDefinition, TurnDetectionPolicy};

/// Inbound frame types the engine recognizes for bookkeeping. Every inbound
/// frame, recognized or not, is forwarded verbatim to subscribers.
pub mod inbound {
    /// Session created by the provider.
    pub const SESSION_CREATED: &str = "session.created";
    /// Acknowledgement of a session.update frame.
    pub const SESSION_UPDATED: &str = "session.updated";
    /// Response generation started.
    pub const RESPONSE_CREATED: &str = "response.created";
    /// Response generation finished.
    pub const RESPONSE_DONE: &str = "response.done";
    /// Function-call arguments complete.
    pub const FUNCTION_CALL_ARGUMENTS_DONE: &str = "response.function_call_arguments.done";
    /// Provider-reported error.
    pub const ERROR: &str = "error";
}

// =============================================================================
// Session Configuration Payload
// =============================================================================

/// Session configuration payload carried by a `session.update` frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionUpdatePayload {
    /// Response modalities (text, audio).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Input audio transcription configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    /// Tool definitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Tool choice strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

impl SessionUpdatePayload {
    /// Build the wire payload from a session configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: Some(config.instructions.clone()),
            voice: config.voice.clone(),
            input_audio_format: Some("pcm16".to_string()),
            output_audio_format: Some("pcm16".to_string()),
            input_audio_transcription: config
                .input_transcription_model
                .as_ref()
                .map(|model| InputAudioTranscription {
                    model: model.clone(),
                }),
            turn_detection: TurnDetection::from_policy(&config.turn_detection),
            tools: if config.tools.is_empty() {
                None
            } else {
                Some(config.tools.clone())
            },
            tool_choice: config.tool_choice.clone(),
        }
    }
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g. "whisper-1").
    pub model: String,
}

/// Turn detection configuration on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD.
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold.
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio prefix padding in ms.
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration in ms.
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
        /// Whether to create a response on turn end.
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        /// Whether to interrupt on speech.
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
    /// No automatic turn detection.
    #[serde(rename = "none")]
    None {},
}

impl TurnDetection {
    /// Map the configured policy to the wire form. `ProviderDefault` omits
    /// the field entirely so the provider applies its own default.
    pub fn from_policy(policy: &TurnDetectionPolicy) -> Option<Self> {
        match policy {
            TurnDetectionPolicy::ProviderDefault => None,
            TurnDetectionPolicy::ServerVad {
                threshold,
                prefix_padding_ms,
                silence_duration_ms,
                create_response,
                interrupt_response,
            } => Some(TurnDetection::ServerVad {
                threshold: *threshold,
                prefix_padding_ms: *prefix_padding_ms,
                silence_duration_ms: *silence_duration_ms,
                create_response: *create_response,
                interrupt_response: *interrupt_response,
            }),
            TurnDetectionPolicy::Disabled => Some(TurnDetection::None {}),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item carried by a `conversation.item.create` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item type ("message" or "function_call_output").
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item role (user, assistant, system).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for a function-call output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Stringified function output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// A user message item carrying plain text.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.into()),
            }]),
            call_id: None,
            output: None,
        }
    }

    /// A function-call output item keyed by the original call id.
    pub fn function_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            role: None,
            content: None,
            call_id: Some(call_id.into()),
            output: Some(output.into()),
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text).
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// =============================================================================
// Response Configuration
// =============================================================================

/// Optional payload for a `response.create` frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Response modalities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    /// Response-level instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Maximum output tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

// =============================================================================
// Client Frames
// =============================================================================

/// Outbound control-channel frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Update the session configuration.
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration payload.
        session: SessionUpdatePayload,
    },

    /// Create a conversation item.
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create.
        item: ConversationItem,
    },

    /// Request a model response.
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response configuration.
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    /// Cancel the in-flight response.
    #[serde(rename = "response.cancel")]
    ResponseCancel,

    /// Commit the input audio buffer.
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Clear the input audio buffer.
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,
}

impl ClientFrame {
    /// The frame's wire `type` string, for logging.
    pub fn frame_type(&self) -> &'static str {
        match self {
            ClientFrame::SessionUpdate { .. } => "session.update",
            ClientFrame::ConversationItemCreate { .. } => "conversation.item.create",
            ClientFrame::ResponseCreate { .. } => "response.create",
            ClientFrame::ResponseCancel => "response.cancel",
            ClientFrame::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientFrame::InputAudioBufferClear => "input_audio_buffer.clear",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

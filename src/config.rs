//! Session configuration types.
//!
//! A [`SessionConfig`] is supplied at construction and describes everything
//! the provider needs to run a voice session: instructions, tools, voice,
//! turn detection, and the connection-level knobs (timeout, retry budget).
//! The caller is responsible for folding any prior conversation history into
//! `instructions`; the manager only carries the raw turns through to the
//! provisioning endpoint.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{SessionError, SessionResult};

/// Default handshake timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Default number of reconnection attempts per connect cycle.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default input-transcription model sent in the session configuration.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

// =============================================================================
// Session Configuration
// =============================================================================

/// Configuration for a voice session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// System instructions for the assistant. Required: an empty value is a
    /// fatal configuration error, never a silent default.
    pub instructions: String,

    /// Callable-function descriptors exposed to the assistant.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,

    /// Tool choice strategy (e.g. "auto", "none", "required").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Voice identifier for audio output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Response-level instructions for the opening greeting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting_instructions: Option<String>,

    /// Prior conversation turns. The caller pre-merges these into
    /// `instructions`; they are carried here for the provisioning endpoint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation_history: Vec<HistoryTurn>,

    /// Turn detection policy.
    #[serde(default)]
    pub turn_detection: TurnDetectionPolicy,

    /// Input transcription model, or `None` to disable transcription.
    #[serde(default = "default_transcription_model")]
    pub input_transcription_model: Option<String>,

    /// Start with the microphone unmuted. Default is muted to match the
    /// idle visual state; push-to-talk flows opt in.
    #[serde(default)]
    pub start_unmuted: bool,

    /// Whether this session resumes an earlier conversation.
    #[serde(default)]
    pub is_resume: bool,

    /// Handshake timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum reconnection attempts per connect cycle.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_transcription_model() -> Option<String> {
    Some(DEFAULT_TRANSCRIPTION_MODEL.to_string())
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instructions: String::new(),
            tools: Vec::new(),
            tool_choice: None,
            voice: None,
            greeting_instructions: None,
            conversation_history: Vec::new(),
            turn_detection: TurnDetectionPolicy::default(),
            input_transcription_model: default_transcription_model(),
            start_unmuted: false,
            is_resume: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }
}

impl SessionConfig {
    /// Validate the configuration before any network activity.
    pub fn validate(&self) -> SessionResult<()> {
        if self.instructions.trim().is_empty() {
            return Err(SessionError::Configuration(
                "instructions are required and must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Handshake timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A single prior conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    /// Speaker role ("user" or "assistant").
    pub role: String,
    /// Turn text.
    pub text: String,
}

// =============================================================================
// Turn Detection
// =============================================================================

/// Turn detection policy for the session.
///
/// `ProviderDefault` leaves the field out of the session configuration so
/// the provider applies its default automatic voice-activity detection.
/// `ServerVad` selects automatic detection with explicit knobs; setting
/// `create_response` to `false` keeps detection automatic but hands response
/// triggering to the caller. `Disabled` is fully manual push-to-talk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetectionPolicy {
    /// Provider default (automatic server VAD).
    #[default]
    ProviderDefault,
    /// Server-side VAD with explicit parameters.
    ServerVad {
        /// Activation threshold (0.0 to 1.0).
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio included before detected speech (ms).
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration ending a turn (ms).
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
        /// Whether the provider auto-creates a response at end of turn.
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        /// Whether detected speech interrupts an in-flight response.
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
    /// No automatic turn detection (push-to-talk).
    Disabled,
}

impl TurnDetectionPolicy {
    /// Whether this policy requires the caller to trigger responses
    /// manually (commit/response frames).
    pub fn requires_manual_response(&self) -> bool {
        match self {
            TurnDetectionPolicy::ProviderDefault => false,
            TurnDetectionPolicy::ServerVad {
                create_response, ..
            } => *create_response == Some(false),
            TurnDetectionPolicy::Disabled => true,
        }
    }
}

// =============================================================================
// Tools
// =============================================================================

/// Callable-function descriptor, in the provider's flattened tool shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool type (always "function").
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name.
    pub name: String,
    /// Function description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ToolDefinition {
    /// Convenience constructor for a function tool.
    pub fn function(
        name: impl Into<String>,
        description: Option<String>,
        parameters: Option<serde_json::Value>,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: name.into(),
            description,
            parameters,
        }
    }
}

// =============================================================================
// Partial Updates
// =============================================================================

/// Partial configuration update applied via `update_config`.
///
/// Only the populated fields are merged; everything else is left untouched.
/// Updating the stored config never emits protocol frames - mid-session
/// reconfiguration goes through `replace_ai_configuration`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfigPatch {
    /// New instructions.
    pub instructions: Option<String>,
    /// New tool set.
    pub tools: Option<Vec<ToolDefinition>>,
    /// New tool choice strategy.
    pub tool_choice: Option<String>,
    /// New voice identifier.
    pub voice: Option<String>,
    /// New greeting instructions.
    pub greeting_instructions: Option<String>,
    /// New turn detection policy.
    pub turn_detection: Option<TurnDetectionPolicy>,
    /// New start-unmuted flag.
    pub start_unmuted: Option<bool>,
    /// New resume flag.
    pub is_resume: Option<bool>,
    /// New handshake timeout (ms).
    pub timeout_ms: Option<u64>,
    /// New retry budget.
    pub retry_attempts: Option<u32>,
}

impl SessionConfigPatch {
    /// Merge this patch into a configuration.
    pub fn apply(self, config: &mut SessionConfig) {
        if let Some(v) = self.instructions {
            config.instructions = v;
        }
        if let Some(v) = self.tools {
            config.tools = v;
        }
        if let Some(v) = self.tool_choice {
            config.tool_choice = Some(v);
        }
        if let Some(v) = self.voice {
            config.voice = Some(v);
        }
        if let Some(v) = self.greeting_instructions {
            config.greeting_instructions = Some(v);
        }
        if let Some(v) = self.turn_detection {
            config.turn_detection = v;
        }
        if let Some(v) = self.start_unmuted {
            config.start_unmuted = v;
        }
        if let Some(v) = self.is_resume {
            config.is_resume = v;
        }
        if let Some(v) = self.timeout_ms {
            config.timeout_ms = v;
        }
        if let Some(v) = self.retry_attempts {
            config.retry_attempts = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert!(config.instructions.is_empty());
        assert!(!config.start_unmuted);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(
            config.input_transcription_model.as_deref(),
            Some(DEFAULT_TRANSCRIPTION_MODEL)
        );
    }

    #[test]
    fn test_validate_requires_instructions() {
        let config = SessionConfig::default();
        match config.validate() {
            Err(SessionError::Configuration(msg)) => {
                assert!(msg.contains("instructions"));
            }
            other => panic!("Expected Configuration error, got {other:?}"),
        }

        let config = SessionConfig {
            instructions: "   ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            instructions: "You are a helpful assistant.".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_manual_response_policies() {
        assert!(!TurnDetectionPolicy::ProviderDefault.requires_manual_response());
        assert!(TurnDetectionPolicy::Disabled.requires_manual_response());

        let vad_auto = TurnDetectionPolicy::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: None,
            silence_duration_ms: None,
            create_response: Some(true),
            interrupt_response: None,
        };
        assert!(!vad_auto.requires_manual_response());

        let vad_manual = TurnDetectionPolicy::ServerVad {
            threshold: None,
            prefix_padding_ms: None,
            silence_duration_ms: Some(700),
            create_response: Some(false),
            interrupt_response: None,
        };
        assert!(vad_manual.requires_manual_response());
    }

    #[test]
    fn test_patch_apply() {
        let mut config = SessionConfig {
            instructions: "old".to_string(),
            ..Default::default()
        };
        let patch = SessionConfigPatch {
            instructions: Some("new".to_string()),
            retry_attempts: Some(7),
            ..Default::default()
        };
        patch.apply(&mut config);
        assert_eq!(config.instructions, "new");
        assert_eq!(config.retry_attempts, 7);
        // Untouched fields keep their values
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_turn_detection_serialization() {
        let policy = TurnDetectionPolicy::ServerVad {
            threshold: Some(0.6),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
            create_response: Some(false),
            interrupt_response: Some(true),
        };
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("server_vad"));
        assert!(json.contains("0.6"));

        let json = serde_json::to_string(&TurnDetectionPolicy::Disabled).unwrap();
        assert!(json.contains("disabled"));
    }
}

//! voicelink - real-time voice session client.
//!
//! Establishes and supervises a bidirectional audio-plus-control-channel
//! session between a client and a remote real-time speech AI provider:
//! a WebRTC peer connection carries the audio, and an ordered data channel
//! carries the provider's JSON control protocol (session configuration,
//! conversation items, response control).
//!
//! # Example
//!
//! ```rust,ignore
//! use voicelink::{SessionConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig {
//!         instructions: "You are a helpful assistant.".to_string(),
//!         voice: Some("marin".to_string()),
//!         ..Default::default()
//!     };
//!
//!     let session = SessionManager::new(config);
//!     let _messages = session.on_message(|frame| println!("frame: {frame}"));
//!     session.connect().await?;
//!     session.send_message("What's the weather like?").await;
//!     session.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod core;
pub mod errors;
pub mod init;

// Re-export commonly used items for convenience
pub use auth::{EphemeralCredential, ProvisionClient, SessionEndpoints};
pub use config::{
    HistoryTurn, SessionConfig, SessionConfigPatch, ToolDefinition, TurnDetectionPolicy,
};
pub use core::*;
pub use errors::{SessionError, SessionResult};

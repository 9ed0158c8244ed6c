//! Control-channel protocol: wire frames and the engine that speaks them.

pub mod engine;
pub mod frames;

pub use engine::{
    ProtocolEngine, RESPONSE_CREATE_DELAY, SESSION_ACK_TIMEOUT, SESSION_SETTLE_DELAY,
};
pub use frames::{
    ClientFrame, ContentPart, ConversationItem, InputAudioTranscription, ResponseConfig,
    SessionUpdatePayload, TurnDetection, inbound,
};

//! Transport layer: the control-channel contract and its WebRTC
//! implementation.
//!
//! The protocol engine only ever talks to the [`ControlChannel`] trait. The
//! one production implementation is the ordered WebRTC data channel in
//! [`webrtc`]; tests substitute their own.

use async_trait::async_trait;

use crate::errors::SessionResult;

pub mod webrtc;

pub use webrtc::{
    DATA_CHANNEL_LABEL, DEFAULT_STUN_SERVER, DataChannelTransport, PeerSetup, TransportHooks,
    create_peer, negotiate, spawn_audio_pump,
};

/// The ordered, reliable side channel carrying protocol frames.
///
/// This is the single seam between the protocol engine and the transport:
/// implementations must deliver payloads in send order and report readiness
/// truthfully, since the engine re-checks `is_open` between dependent
/// frames.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Whether the channel is currently open for sending.
    fn is_open(&self) -> bool;

    /// Send one serialized frame. Fails if the channel is not open or the
    /// underlying transport rejects the payload.
    async fn send(&self, payload: String) -> SessionResult<()>;

    /// Channel label, for logging.
    fn label(&self) -> String;

    /// Human-readable readiness state, for diagnostics.
    fn ready_state(&self) -> String;
}

pub mod client;
pub mod roster;

use std::fmt;
use std::future::Future;

use thiserror::Error;

pub use client::MumbleClient;

/// Session id of a connected participant. Unique for the lifetime of one
/// server connection and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u32);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session {}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to resolve server address {address}: {reason}")]
    Resolve { address: String, reason: String },
    #[error("failed to connect TCP {address}: {source}")]
    Tcp {
        address: String,
        source: std::io::Error,
    },
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("failed to load client certificate {path}: {reason}")]
    Certificate { path: String, reason: String },
    #[error("server rejected the connection: {0}")]
    Rejected(String),
    #[error("connection lost: {0}")]
    Lost(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnforcementError {
    #[error("{0} is no longer connected")]
    UnknownParticipant(ParticipantId),
    #[error("voice connection is not running")]
    Disconnected,
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Everything the arbitration engine needs from a live voice-chat connection.
///
/// Lookups always answer from the connection's current view of the server;
/// callers must not cache the results across decisions. `mute` and `unmute`
/// are idempotent: asking for the state a participant is already in succeeds
/// without side effects.
pub trait VoiceConnection: Send + Sync + 'static {
    fn channel_by_name(&self, name: &str) -> impl Future<Output = Option<Channel>> + Send;

    fn channel_by_id(&self, id: ChannelId) -> impl Future<Output = Option<Channel>> + Send;

    fn participants_in(&self, channel: ChannelId) -> impl Future<Output = Vec<Participant>> + Send;

    fn move_self_into(
        &self,
        channel: &Channel,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn mute(
        &self,
        participant: &Participant,
    ) -> impl Future<Output = Result<(), EnforcementError>> + Send;

    fn unmute(
        &self,
        participant: &Participant,
    ) -> impl Future<Output = Result<(), EnforcementError>> + Send;
}

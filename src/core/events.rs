use super::voice::{ChannelId, Participant, ParticipantId};

/// Raw activity notification as delivered by the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    /// One voice packet. `resumed` is set on the first packet after a gap.
    AudioChunk {
        participant: Participant,
        resumed: bool,
    },
    /// Discrete talk-state report. `talking && !changed` refreshes an ongoing
    /// talk spurt.
    TalkState {
        participant: Participant,
        talking: bool,
        changed: bool,
    },
}

impl ActivityEvent {
    pub fn participant(&self) -> &Participant {
        match self {
            Self::AudioChunk { participant, .. } | Self::TalkState { participant, .. } => {
                participant
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Initial server state has been received; `self_id` is the bot's session.
    Ready { self_id: ParticipantId },
    Activity(ActivityEvent),
    ChannelRemoved(ChannelId),
    Disconnected { reason: String },
}

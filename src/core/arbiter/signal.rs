use std::collections::HashSet;

use crate::core::events::ActivityEvent;
use crate::core::voice::{Channel, ChannelId, ParticipantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Start,
    Keepalive,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySignal {
    pub channel: ChannelId,
    pub participant: ParticipantId,
    pub kind: SignalKind,
}

/// Maps raw activity notifications onto normalized per-participant signals,
/// dropping the bot's own activity and anything outside the controlled
/// channels.
///
/// Only channels resolved when the session started are controlled. A channel
/// created later under a configured name is not.
#[derive(Debug, Clone)]
pub struct SignalAdapter {
    channels: HashSet<ChannelId>,
    bot: ParticipantId,
}

impl SignalAdapter {
    pub fn new<I>(channels: I, bot: ParticipantId) -> Self
    where
        I: IntoIterator<Item = ChannelId>,
    {
        Self {
            channels: channels.into_iter().collect(),
            bot,
        }
    }

    pub fn forget_channel(&mut self, channel: ChannelId) -> bool {
        self.channels.remove(&channel)
    }

    /// `channel` is the participant's current channel as seen by the
    /// connection, or `None` if it is unknown.
    pub fn normalize(
        &self,
        event: &ActivityEvent,
        channel: Option<&Channel>,
    ) -> Option<ActivitySignal> {
        let participant = event.participant();
        if participant.id == self.bot {
            return None;
        }

        let channel = channel?;
        if channel.id != participant.channel_id || !self.channels.contains(&channel.id) {
            return None;
        }

        let kind = match *event {
            ActivityEvent::AudioChunk { resumed: true, .. } => SignalKind::Start,
            ActivityEvent::AudioChunk { resumed: false, .. } => SignalKind::Keepalive,
            ActivityEvent::TalkState { talking: false, .. } => SignalKind::Stop,
            ActivityEvent::TalkState { changed: true, .. } => SignalKind::Start,
            ActivityEvent::TalkState { changed: false, .. } => SignalKind::Keepalive,
        };

        Some(ActivitySignal {
            channel: channel.id,
            participant: participant.id,
            kind,
        })
    }
}

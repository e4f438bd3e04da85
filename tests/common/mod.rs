#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use halfduplex_bot_lib::core::events::{ActivityEvent, ClientEvent};
use halfduplex_bot_lib::core::voice::{
    Channel, ChannelId, ConnectionError, EnforcementError, Participant, ParticipantId,
    VoiceConnection,
};

pub const LOBBY: ChannelId = ChannelId(0);
pub const HALL: ChannelId = ChannelId(4);
pub const BOT: ParticipantId = ParticipantId(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Mute(ParticipantId),
    Unmute(ParticipantId),
}

#[derive(Default)]
struct FakeState {
    channels: Vec<Channel>,
    participants: Vec<Participant>,
    muted: HashSet<ParticipantId>,
    failing: HashSet<ParticipantId>,
    calls: Vec<Call>,
    joined: Option<ChannelId>,
}

/// In-memory server view that records every permission request.
#[derive(Default)]
pub struct FakeConnection {
    state: Mutex<FakeState>,
}

impl FakeConnection {
    /// Lobby plus "Half-Duplex Channel" holding the bot and sessions 11-14.
    pub fn standard() -> Self {
        let fake = Self::default();
        fake.add_channel(LOBBY, "Lobby");
        fake.add_channel(HALL, "Half-Duplex Channel");
        fake.add_participant(BOT, "HalfDuplexBot", HALL);
        for id in 11..=14 {
            fake.add_participant(ParticipantId(id), &format!("user{id}"), HALL);
        }
        fake.add_participant(ParticipantId(20), "lurker", LOBBY);
        fake
    }

    pub fn add_channel(&self, id: ChannelId, name: &str) {
        self.state.lock().expect("fake state").channels.push(Channel {
            id,
            name: name.to_string(),
        });
    }

    pub fn add_participant(&self, id: ParticipantId, name: &str, channel: ChannelId) {
        self.state
            .lock()
            .expect("fake state")
            .participants
            .push(Participant {
                id,
                name: name.to_string(),
                channel_id: channel,
            });
    }

    pub fn remove_participant(&self, id: ParticipantId) {
        self.state
            .lock()
            .expect("fake state")
            .participants
            .retain(|participant| participant.id != id);
    }

    pub fn fail_for(&self, id: ParticipantId) {
        self.state.lock().expect("fake state").failing.insert(id);
    }

    pub fn participant(&self, id: u32) -> Participant {
        self.state
            .lock()
            .expect("fake state")
            .participants
            .iter()
            .find(|participant| participant.id == ParticipantId(id))
            .cloned()
            .expect("participant exists")
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().expect("fake state").calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().expect("fake state").calls.clear();
    }

    pub fn muted(&self) -> Vec<u32> {
        let state = self.state.lock().expect("fake state");
        let mut muted = state.muted.iter().map(|id| id.0).collect::<Vec<_>>();
        muted.sort_unstable();
        muted
    }

    pub fn joined(&self) -> Option<ChannelId> {
        self.state.lock().expect("fake state").joined
    }

    fn set_muted(&self, participant: &Participant, muted: bool) -> Result<(), EnforcementError> {
        let mut state = self.state.lock().expect("fake state");
        state.calls.push(if muted {
            Call::Mute(participant.id)
        } else {
            Call::Unmute(participant.id)
        });
        if state.failing.contains(&participant.id) {
            return Err(EnforcementError::Rejected("permission denied".to_string()));
        }
        if !state.participants.iter().any(|p| p.id == participant.id) {
            return Err(EnforcementError::UnknownParticipant(participant.id));
        }
        if muted {
            state.muted.insert(participant.id);
        } else {
            state.muted.remove(&participant.id);
        }
        Ok(())
    }
}

impl VoiceConnection for FakeConnection {
    async fn channel_by_name(&self, name: &str) -> Option<Channel> {
        let state = self.state.lock().expect("fake state");
        state.channels.iter().find(|c| c.name == name).cloned()
    }

    async fn channel_by_id(&self, id: ChannelId) -> Option<Channel> {
        let state = self.state.lock().expect("fake state");
        state.channels.iter().find(|c| c.id == id).cloned()
    }

    async fn participants_in(&self, channel: ChannelId) -> Vec<Participant> {
        let state = self.state.lock().expect("fake state");
        state
            .participants
            .iter()
            .filter(|p| p.channel_id == channel)
            .cloned()
            .collect()
    }

    async fn move_self_into(&self, channel: &Channel) -> Result<(), ConnectionError> {
        self.state.lock().expect("fake state").joined = Some(channel.id);
        Ok(())
    }

    async fn mute(&self, participant: &Participant) -> Result<(), EnforcementError> {
        self.set_muted(participant, true)
    }

    async fn unmute(&self, participant: &Participant) -> Result<(), EnforcementError> {
        self.set_muted(participant, false)
    }
}

pub fn mutes(calls: &[Call]) -> Vec<u32> {
    let mut ids = calls
        .iter()
        .filter_map(|call| match call {
            Call::Mute(id) => Some(id.0),
            Call::Unmute(_) => None,
        })
        .collect::<Vec<_>>();
    ids.sort_unstable();
    ids
}

pub fn unmutes(calls: &[Call]) -> Vec<u32> {
    let mut ids = calls
        .iter()
        .filter_map(|call| match call {
            Call::Unmute(id) => Some(id.0),
            Call::Mute(_) => None,
        })
        .collect::<Vec<_>>();
    ids.sort_unstable();
    ids
}

pub fn chunk(participant: Participant, resumed: bool) -> ClientEvent {
    ClientEvent::Activity(ActivityEvent::AudioChunk {
        participant,
        resumed,
    })
}

pub fn talk(participant: Participant, talking: bool, changed: bool) -> ClientEvent {
    ClientEvent::Activity(ActivityEvent::TalkState {
        participant,
        talking,
        changed,
    })
}

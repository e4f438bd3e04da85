use std::collections::HashMap;
use std::time::{Duration, Instant};

use mumble_protocol::control::msgs;

use super::{Channel, ChannelId, Participant, ParticipantId};

struct ProtocolUser {
    session: u32,
    name: String,
    channel_id: u32,
    /// Last server-mute state the server confirmed.
    server_muted: bool,
    /// Requested change the server has not echoed yet.
    pending_mute: Option<bool>,
    speaking: bool,
    speaking_at: Option<Instant>,
}

impl ProtocolUser {
    fn new(session: u32) -> Self {
        Self {
            session,
            name: format!("User {}", session),
            channel_id: 0,
            server_muted: false,
            pending_mute: None,
            speaking: false,
            speaking_at: None,
        }
    }

    fn snapshot(&self) -> Participant {
        Participant {
            id: ParticipantId(self.session),
            name: self.name.clone(),
            channel_id: ChannelId(self.channel_id),
        }
    }
}

/// The connection's view of the server: channels, users and who is
/// transmitting. Rebuilt from scratch on every connect.
#[derive(Default)]
pub struct ProtocolRoster {
    channels: HashMap<u32, String>,
    users: HashMap<u32, ProtocolUser>,
}

impl ProtocolRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_channel_state(&mut self, msg: &msgs::ChannelState) -> bool {
        if !msg.has_channel_id() {
            return false;
        }

        let channel_id = msg.get_channel_id();
        let new_name = if msg.has_name() {
            msg.get_name().to_string()
        } else {
            self.channels
                .get(&channel_id)
                .cloned()
                .unwrap_or_else(|| format!("Channel {}", channel_id))
        };

        if self.channels.get(&channel_id) == Some(&new_name) {
            return false;
        }

        self.channels.insert(channel_id, new_name);
        true
    }

    pub fn remove_channel(&mut self, channel_id: u32) -> bool {
        self.channels.remove(&channel_id).is_some()
    }

    /// Applies a user state update. Returns the participant snapshot when the
    /// update moved the user to a different channel.
    pub fn apply_user_state(&mut self, msg: &msgs::UserState) -> Option<Participant> {
        if !msg.has_session() {
            return None;
        }

        let session = msg.get_session();
        let is_new = !self.users.contains_key(&session);
        let user = self
            .users
            .entry(session)
            .or_insert_with(|| ProtocolUser::new(session));

        if msg.has_name() {
            user.name = msg.get_name().to_string();
        }

        let mut moved = is_new;
        if msg.has_channel_id() {
            let next_channel = msg.get_channel_id();
            if user.channel_id != next_channel {
                user.channel_id = next_channel;
                moved = true;
            }
        }

        // Only the server-side mute is ours to manage; self-mute is the user's.
        if msg.has_mute() {
            user.server_muted = msg.get_mute();
            user.pending_mute = None;
        }

        moved.then(|| user.snapshot())
    }

    pub fn remove_user(&mut self, session: u32) -> bool {
        self.users.remove(&session).is_some()
    }

    /// Records a voice packet from `session`. Returns the participant and
    /// whether this packet starts a new talk spurt.
    pub fn mark_speaking(&mut self, session: u32) -> Option<(Participant, bool)> {
        let user = self.users.get_mut(&session)?;
        user.speaking_at = Some(Instant::now());
        let started = !user.speaking;
        user.speaking = true;
        Some((user.snapshot(), started))
    }

    /// Ends the talk spurt of every user silent for longer than `max_age`.
    pub fn expire_speaking(&mut self, max_age: Duration) -> Vec<Participant> {
        let now = Instant::now();
        let mut expired = Vec::new();
        for user in self.users.values_mut() {
            if !user.speaking {
                continue;
            }
            let Some(last_tick) = user.speaking_at else {
                continue;
            };
            if now.duration_since(last_tick) <= max_age {
                continue;
            }
            user.speaking = false;
            user.speaking_at = None;
            expired.push(user.snapshot());
        }
        expired
    }

    pub fn speaking_participants(&self) -> Vec<Participant> {
        self.users
            .values()
            .filter(|user| user.speaking)
            .map(ProtocolUser::snapshot)
            .collect()
    }

    /// Server-mute state including any request still awaiting the server.
    pub fn is_server_muted(&self, session: u32) -> Option<bool> {
        self.users
            .get(&session)
            .map(|user| user.pending_mute.unwrap_or(user.server_muted))
    }

    /// Records a requested server-mute change ahead of the server's echo.
    pub fn request_server_mute(&mut self, session: u32, muted: bool) -> bool {
        match self.users.get_mut(&session) {
            Some(user) => {
                user.pending_mute = Some(muted);
                true
            }
            None => false,
        }
    }

    /// Drops an unconfirmed request after the server refused it, falling back
    /// to the last confirmed state. Returns whether a request was pending.
    pub fn reject_pending_mute(&mut self, session: u32) -> bool {
        self.users
            .get_mut(&session)
            .and_then(|user| user.pending_mute.take())
            .is_some()
    }

    pub fn channel(&self, channel_id: u32) -> Option<Channel> {
        self.channels.get(&channel_id).map(|name| Channel {
            id: ChannelId(channel_id),
            name: name.clone(),
        })
    }

    pub fn channel_by_name(&self, name: &str) -> Option<Channel> {
        self.channels
            .iter()
            .filter(|(_, channel_name)| channel_name.as_str() == name)
            .map(|(channel_id, channel_name)| Channel {
                id: ChannelId(*channel_id),
                name: channel_name.clone(),
            })
            .min_by_key(|channel| channel.id)
    }

    pub fn participants_in(&self, channel_id: u32) -> Vec<Participant> {
        let mut users = self
            .users
            .values()
            .filter(|user| user.channel_id == channel_id)
            .map(ProtocolUser::snapshot)
            .collect::<Vec<_>>();
        users.sort_by_key(|user| user.id);
        users
    }

    pub fn user_name_for_session(&self, session: u32) -> String {
        self.users
            .get(&session)
            .map(|user| user.name.clone())
            .unwrap_or_else(|| format!("User {}", session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_state(id: u32, name: &str) -> msgs::ChannelState {
        let mut msg = msgs::ChannelState::new();
        msg.set_channel_id(id);
        msg.set_name(name.to_string());
        msg
    }

    fn user_state(session: u32, name: &str, channel_id: u32) -> msgs::UserState {
        let mut msg = msgs::UserState::new();
        msg.set_session(session);
        msg.set_name(name.to_string());
        msg.set_channel_id(channel_id);
        msg
    }

    #[test]
    fn channel_lookup_by_name_and_id() {
        let mut roster = ProtocolRoster::new();
        assert!(roster.apply_channel_state(&channel_state(0, "Root")));
        assert!(roster.apply_channel_state(&channel_state(4, "Half-Duplex Channel")));
        assert!(!roster.apply_channel_state(&channel_state(4, "Half-Duplex Channel")));

        let channel = roster
            .channel_by_name("Half-Duplex Channel")
            .expect("channel exists");
        assert_eq!(channel.id, ChannelId(4));
        assert_eq!(roster.channel(0).map(|c| c.name), Some("Root".to_string()));

        assert!(roster.remove_channel(4));
        assert!(roster.channel_by_name("Half-Duplex Channel").is_none());
    }

    #[test]
    fn participants_are_filtered_by_channel_and_sorted() {
        let mut roster = ProtocolRoster::new();
        roster.apply_user_state(&user_state(9, "carol", 4));
        roster.apply_user_state(&user_state(3, "alice", 4));
        roster.apply_user_state(&user_state(5, "bob", 0));

        let members = roster.participants_in(4);
        let ids: Vec<_> = members.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![ParticipantId(3), ParticipantId(9)]);
        assert!(members.iter().all(|p| p.channel_id == ChannelId(4)));
    }

    #[test]
    fn user_state_tracks_server_mute_but_not_self_mute() {
        let mut roster = ProtocolRoster::new();
        roster.apply_user_state(&user_state(3, "alice", 4));
        assert_eq!(roster.is_server_muted(3), Some(false));

        let mut self_mute = msgs::UserState::new();
        self_mute.set_session(3);
        self_mute.set_self_mute(true);
        roster.apply_user_state(&self_mute);
        assert_eq!(roster.is_server_muted(3), Some(false));

        let mut server_mute = msgs::UserState::new();
        server_mute.set_session(3);
        server_mute.set_mute(true);
        roster.apply_user_state(&server_mute);
        assert_eq!(roster.is_server_muted(3), Some(true));
        assert_eq!(roster.is_server_muted(42), None);
    }

    #[test]
    fn requested_mute_is_recorded_for_known_users_only() {
        let mut roster = ProtocolRoster::new();
        roster.apply_user_state(&user_state(3, "alice", 4));

        assert!(roster.request_server_mute(3, true));
        assert_eq!(roster.is_server_muted(3), Some(true));
        assert!(!roster.request_server_mute(42, true));
        assert_eq!(roster.is_server_muted(42), None);
    }

    #[test]
    fn rejected_request_falls_back_to_confirmed_state() {
        let mut roster = ProtocolRoster::new();
        roster.apply_user_state(&user_state(3, "alice", 4));

        roster.request_server_mute(3, true);
        assert!(roster.reject_pending_mute(3));
        assert_eq!(roster.is_server_muted(3), Some(false));
        assert!(!roster.reject_pending_mute(3));
    }

    #[test]
    fn server_echo_confirms_request() {
        let mut roster = ProtocolRoster::new();
        roster.apply_user_state(&user_state(3, "alice", 4));
        roster.request_server_mute(3, true);

        let mut echo = msgs::UserState::new();
        echo.set_session(3);
        echo.set_mute(true);
        roster.apply_user_state(&echo);

        assert!(!roster.reject_pending_mute(3));
        assert_eq!(roster.is_server_muted(3), Some(true));
    }

    #[test]
    fn user_state_reports_channel_moves_only() {
        let mut roster = ProtocolRoster::new();
        assert!(roster.apply_user_state(&user_state(3, "alice", 4)).is_some());

        let mut rename = msgs::UserState::new();
        rename.set_session(3);
        rename.set_name("alice2".to_string());
        assert!(roster.apply_user_state(&rename).is_none());

        let moved = roster
            .apply_user_state(&user_state(3, "alice2", 7))
            .expect("move is reported");
        assert_eq!(moved.channel_id, ChannelId(7));
        assert_eq!(moved.name, "alice2");
    }

    #[test]
    fn speaking_marks_spurt_start_once_and_expires() {
        let mut roster = ProtocolRoster::new();
        roster.apply_user_state(&user_state(3, "alice", 4));

        let (participant, started) = roster.mark_speaking(3).expect("known user");
        assert!(started);
        assert_eq!(participant.id, ParticipantId(3));
        let (_, started_again) = roster.mark_speaking(3).expect("known user");
        assert!(!started_again);
        assert!(roster.mark_speaking(77).is_none());

        assert!(roster.expire_speaking(Duration::from_secs(60)).is_empty());
        assert_eq!(roster.speaking_participants().len(), 1);

        std::thread::sleep(Duration::from_millis(5));
        let expired = roster.expire_speaking(Duration::from_millis(1));
        assert_eq!(expired.len(), 1);
        assert!(roster.speaking_participants().is_empty());

        let (_, restarted) = roster.mark_speaking(3).expect("known user");
        assert!(restarted);
    }

    #[test]
    fn removed_users_disappear_from_lookups() {
        let mut roster = ProtocolRoster::new();
        roster.apply_user_state(&user_state(3, "alice", 4));
        assert!(roster.remove_user(3));
        assert_eq!(roster.is_server_muted(3), None);
        assert!(roster.participants_in(4).is_empty());
        assert_eq!(roster.user_name_for_session(3), "User 3");
    }
}

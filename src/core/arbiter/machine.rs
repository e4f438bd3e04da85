//! Per-channel floor control.
//!
//! Each in-scope channel is either idle or held by exactly one speaker. All
//! state, including the timer registry, sits behind one mutex; timer actions
//! re-validate against the current state when they fire, so a revoke or
//! restore armed for an earlier speaker can never act on a newer one.
//! Decisions are queued as [`EnforcementCommand`]s while the lock is held and
//! executed elsewhere.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use super::scheduler::{DebounceScheduler, TimerId};
use super::signal::{ActivitySignal, SignalKind};
use crate::core::voice::{ChannelId, ParticipantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// How long a new speaker holds the floor before everyone else is muted.
    pub speak_delay: Duration,
    /// How long the floor stays claimed after the last activity.
    pub restore_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    Revoke,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub channel: ChannelId,
    pub participant: ParticipantId,
    pub purpose: TimerPurpose,
}

impl TimerKey {
    fn new(channel: ChannelId, participant: ParticipantId, purpose: TimerPurpose) -> Self {
        Self {
            channel,
            participant,
            purpose,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementCommand {
    RevokeOthers {
        channel: ChannelId,
        speaker: ParticipantId,
    },
    RestoreAll {
        channel: ChannelId,
    },
}

#[derive(Debug, Default)]
struct ChannelFloor {
    current_speaker: Option<ParticipantId>,
}

struct ArbiterState {
    floors: HashMap<ChannelId, ChannelFloor>,
    timers: DebounceScheduler<TimerKey>,
    accepting: bool,
}

impl ArbiterState {
    fn current_speaker(&self, channel: ChannelId) -> Option<ParticipantId> {
        self.floors
            .get(&channel)
            .and_then(|floor| floor.current_speaker)
    }
}

struct Shared {
    state: Mutex<ArbiterState>,
    timing: Timing,
    commands: mpsc::UnboundedSender<EnforcementCommand>,
}

impl Shared {
    fn enqueue(&self, command: EnforcementCommand) {
        if self.commands.send(command).is_err() {
            log::debug!("enforcement queue closed; dropping {command:?}");
        }
    }

    async fn fire_revoke(&self, key: TimerKey, id: TimerId) {
        let mut state = self.state.lock().await;
        if !state.timers.fire(&key, id) {
            return;
        }

        if state.current_speaker(key.channel) != Some(key.participant) {
            log::debug!(
                "dropping stale revoke for {} in {}; floor has moved on",
                key.participant,
                key.channel
            );
            return;
        }

        self.enqueue(EnforcementCommand::RevokeOthers {
            channel: key.channel,
            speaker: key.participant,
        });
    }

    async fn fire_restore(&self, key: TimerKey, id: TimerId) {
        let mut state = self.state.lock().await;
        if !state.timers.fire(&key, id) {
            return;
        }

        let Some(floor) = state.floors.get_mut(&key.channel) else {
            return;
        };
        if floor.current_speaker != Some(key.participant) {
            log::debug!(
                "dropping stale restore for {} in {}",
                key.participant,
                key.channel
            );
            return;
        }

        floor.current_speaker = None;
        log::debug!("{} went quiet; {} is open again", key.participant, key.channel);
        self.enqueue(EnforcementCommand::RestoreAll {
            channel: key.channel,
        });
    }
}

/// Handle to the arbitration state. Cloning shares the same state.
#[derive(Clone)]
pub struct SpeakerArbiter {
    shared: Arc<Shared>,
}

impl SpeakerArbiter {
    /// Creates an arbiter together with the receiving end of its enforcement
    /// queue. Commands arrive in the order they were decided.
    pub fn new(timing: Timing) -> (Self, mpsc::UnboundedReceiver<EnforcementCommand>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let state = ArbiterState {
            floors: HashMap::new(),
            timers: DebounceScheduler::new(),
            accepting: true,
        };
        let arbiter = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                timing,
                commands,
            }),
        };
        (arbiter, command_rx)
    }

    pub async fn handle_signal(&self, signal: ActivitySignal) {
        let ActivitySignal {
            channel,
            participant,
            kind,
        } = signal;

        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        if !state.accepting {
            return;
        }

        if kind == SignalKind::Stop {
            // The restore timer armed by the last activity decides when the
            // floor opens; reacting here would flicker on jitter.
            log::debug!("{participant} stopped talking in {channel}");
            return;
        }

        let restore_key = TimerKey::new(channel, participant, TimerPurpose::Restore);
        state.timers.cancel(&restore_key);

        let floor = state.floors.entry(channel).or_default();
        if floor.current_speaker != Some(participant) {
            let previous = floor.current_speaker.replace(participant);
            match previous {
                Some(previous) => {
                    log::debug!("{participant} took the floor in {channel} from {previous}")
                }
                None => log::debug!("{participant} started speaking in {channel}"),
            }

            let revoke_key = TimerKey::new(channel, participant, TimerPurpose::Revoke);
            let shared = Arc::clone(&self.shared);
            state
                .timers
                .arm(revoke_key, self.shared.timing.speak_delay, move |id| async move {
                    shared.fire_revoke(revoke_key, id).await;
                });
        }

        let shared = Arc::clone(&self.shared);
        state
            .timers
            .arm(restore_key, self.shared.timing.restore_delay, move |id| async move {
                shared.fire_restore(restore_key, id).await;
            });
    }

    pub async fn current_speaker(&self, channel: ChannelId) -> Option<ParticipantId> {
        self.shared.state.lock().await.current_speaker(channel)
    }

    pub async fn pending_timers(&self) -> usize {
        self.shared.state.lock().await.timers.len()
    }

    /// Drops all state and pending timers for a channel that left scope.
    pub async fn forget_channel(&self, channel: ChannelId) -> usize {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        state.floors.remove(&channel);
        state.timers.cancel_where(|key| key.channel == channel)
    }

    /// Stops accepting signals and cancels every pending timer. Once this
    /// returns no further enforcement command will be queued.
    pub async fn shutdown(&self) -> usize {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        state.accepting = false;
        state.floors.clear();
        state.timers.cancel_all()
    }
}

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::machine::EnforcementCommand;
use super::scope::ChannelScope;
use crate::core::voice::{
    ChannelId, EnforcementError, Participant, ParticipantId, VoiceConnection,
};

/// Outcome of one mute or unmute batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub issued: usize,
    /// Members left alone: the speaker and the bot itself.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permission {
    Revoke,
    Restore,
}

impl Permission {
    fn verb(self) -> &'static str {
        match self {
            Self::Revoke => "mute",
            Self::Restore => "unmute",
        }
    }
}

/// Applies mute/unmute batches to a channel's live roster. Every member is
/// handled independently; a failure is logged and the batch carries on.
pub struct PermissionEnforcer<C> {
    connection: Arc<C>,
    scope: ChannelScope,
    bot: ParticipantId,
}

impl<C: VoiceConnection> PermissionEnforcer<C> {
    pub fn new(connection: Arc<C>, scope: ChannelScope, bot: ParticipantId) -> Self {
        Self {
            connection,
            scope,
            bot,
        }
    }

    /// Mutes everyone in `channel` except `speaker` and the bot.
    pub async fn revoke_others(&self, channel: ChannelId, speaker: ParticipantId) -> BatchReport {
        self.apply_batch(channel, Some(speaker), Permission::Revoke, log::Level::Warn)
            .await
    }

    /// Unmutes everyone in `channel` except the bot.
    pub async fn restore_all(&self, channel: ChannelId) -> BatchReport {
        self.apply_batch(channel, None, Permission::Restore, log::Level::Warn)
            .await
    }

    /// Best-effort variant of [`Self::restore_all`] for shutdown, when the
    /// connection may already be gone. Failures are only logged at debug.
    pub async fn restore_all_quietly(&self, channel: ChannelId) -> BatchReport {
        self.apply_batch(channel, None, Permission::Restore, log::Level::Debug)
            .await
    }

    pub async fn apply(&self, command: EnforcementCommand) -> BatchReport {
        match command {
            EnforcementCommand::RevokeOthers { channel, speaker } => {
                self.revoke_others(channel, speaker).await
            }
            EnforcementCommand::RestoreAll { channel } => self.restore_all(channel).await,
        }
    }

    async fn apply_batch(
        &self,
        channel: ChannelId,
        speaker: Option<ParticipantId>,
        permission: Permission,
        failure_level: log::Level,
    ) -> BatchReport {
        let roster = self.scope.roster(self.connection.as_ref(), channel).await;
        let mut report = BatchReport::default();

        for participant in &roster {
            if participant.id == self.bot || Some(participant.id) == speaker {
                report.skipped += 1;
                continue;
            }

            match self.set_permission(participant, permission).await {
                Ok(()) => {
                    report.issued += 1;
                    log::debug!("{} {} ({})", permission.verb(), participant.name, participant.id);
                }
                Err(err) => {
                    report.failed += 1;
                    log::log!(
                        failure_level,
                        "failed to {} {} ({}): {err}",
                        permission.verb(),
                        participant.name,
                        participant.id
                    );
                }
            }
        }

        report
    }

    async fn set_permission(
        &self,
        participant: &Participant,
        permission: Permission,
    ) -> Result<(), EnforcementError> {
        match permission {
            Permission::Revoke => self.connection.mute(participant).await,
            Permission::Restore => self.connection.unmute(participant).await,
        }
    }
}

/// Runs queued enforcement commands one batch at a time, in decision order.
pub fn spawn_enforcer<C: VoiceConnection>(
    enforcer: Arc<PermissionEnforcer<C>>,
    mut commands: mpsc::UnboundedReceiver<EnforcementCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            let report = enforcer.apply(command).await;
            if report.failed > 0 {
                log::warn!(
                    "{command:?}: {} of {} requests failed",
                    report.failed,
                    report.issued + report.failed
                );
            }
        }
    })
}

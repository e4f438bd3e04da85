pub mod arbiter;
pub mod config;
pub mod events;
pub mod voice;

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use arbiter::{
    spawn_enforcer, ChannelScope, PermissionEnforcer, ScopeError, SignalAdapter, SpeakerArbiter,
    Timing,
};
use config::{BotConfig, ConfigError};
use events::{ActivityEvent, ClientEvent};
use voice::{Channel, ChannelId, ConnectionError, MumbleClient, ParticipantId, VoiceConnection};

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Scope(#[from] ScopeError),
}

/// Everything that only exists once the server has synced us in.
struct ActiveSession<C> {
    adapter: SignalAdapter,
    arbiter: SpeakerArbiter,
    enforcer: Arc<PermissionEnforcer<C>>,
    enforcer_worker: JoinHandle<()>,
    channels: Vec<Channel>,
}

/// Wires connection events through the signal adapter into the arbiter and
/// runs the enforcement worker for the resulting commands.
pub struct Engine<C> {
    connection: Arc<C>,
    scope: ChannelScope,
    timing: Timing,
    session: Option<ActiveSession<C>>,
}

impl<C: VoiceConnection> Engine<C> {
    pub fn new(connection: Arc<C>, scope: ChannelScope, timing: Timing) -> Self {
        Self {
            connection,
            scope,
            timing,
            session: None,
        }
    }

    pub fn from_config(connection: Arc<C>, config: &BotConfig) -> Self {
        let timing = Timing {
            speak_delay: config.speak_delay(),
            restore_delay: config.restore_delay(),
        };
        Self::new(connection, ChannelScope::new(config.channels.names()), timing)
    }

    /// `None` until the connection has reported ready.
    pub fn arbiter(&self) -> Option<&SpeakerArbiter> {
        self.session.as_ref().map(|session| &session.arbiter)
    }

    pub fn in_scope_channels(&self) -> &[Channel] {
        self.session
            .as_ref()
            .map(|session| session.channels.as_slice())
            .unwrap_or_default()
    }

    /// Processes events until `shutdown` completes or a fatal error occurs.
    /// Permissions are restored on the way out either way.
    pub async fn run<S>(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<ClientEvent>,
        shutdown: S,
    ) -> Result<(), BotError>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("shutdown requested");
                    break Ok(());
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        break Err(ConnectionError::Lost("event stream closed".to_string()).into());
                    };
                    if let Err(err) = self.handle_event(event).await {
                        break Err(err);
                    }
                }
            }
        };

        self.shutdown().await;
        result
    }

    pub async fn handle_event(&mut self, event: ClientEvent) -> Result<(), BotError> {
        match event {
            ClientEvent::Ready { self_id } => self.start_session(self_id).await,
            ClientEvent::Activity(event) => {
                self.handle_activity(event).await;
                Ok(())
            }
            ClientEvent::ChannelRemoved(channel) => {
                self.forget_channel(channel).await;
                Ok(())
            }
            ClientEvent::Disconnected { reason } => Err(ConnectionError::Lost(reason).into()),
        }
    }

    /// Cancels all pending timers, stops the enforcement worker and unmutes
    /// everyone in every controlled channel. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        let cancelled = session.arbiter.shutdown().await;
        session.enforcer_worker.abort();
        let _ = session.enforcer_worker.await;

        for channel in &session.channels {
            let report = session.enforcer.restore_all_quietly(channel.id).await;
            log::debug!(
                "restored '{}' on shutdown: {} unmuted, {} failed",
                channel.name,
                report.issued,
                report.failed
            );
        }
        log::info!("cancelled {cancelled} pending timers and restored speaking permissions");
    }

    async fn start_session(&mut self, self_id: ParticipantId) -> Result<(), BotError> {
        self.shutdown().await;

        let channels = self.scope.resolve(self.connection.as_ref()).await?;
        if let Some(home) = channels.first() {
            self.connection.move_self_into(home).await?;
            log::info!("joined '{}' as {self_id}", home.name);
        }
        for channel in &channels {
            log::info!("half-duplex control active in '{}' ({})", channel.name, channel.id);
        }

        let (arbiter, commands) = SpeakerArbiter::new(self.timing);
        let enforcer = Arc::new(PermissionEnforcer::new(
            Arc::clone(&self.connection),
            self.scope.clone(),
            self_id,
        ));
        let enforcer_worker = spawn_enforcer(Arc::clone(&enforcer), commands);

        self.session = Some(ActiveSession {
            adapter: SignalAdapter::new(channels.iter().map(|channel| channel.id), self_id),
            arbiter,
            enforcer,
            enforcer_worker,
            channels,
        });
        Ok(())
    }

    async fn handle_activity(&self, event: ActivityEvent) {
        let Some(session) = &self.session else {
            return;
        };

        let channel = self
            .connection
            .channel_by_id(event.participant().channel_id)
            .await;
        if let Some(signal) = session.adapter.normalize(&event, channel.as_ref()) {
            session.arbiter.handle_signal(signal).await;
        }
    }

    async fn forget_channel(&mut self, channel: ChannelId) {
        let Some(session) = &mut self.session else {
            return;
        };
        let Some(index) = session.channels.iter().position(|c| c.id == channel) else {
            return;
        };

        let removed = session.channels.remove(index);
        session.adapter.forget_channel(channel);
        let cancelled = session.arbiter.forget_channel(channel).await;
        log::error!(
            "channel '{}' was removed from the server; dropped it from half-duplex control ({cancelled} timers cancelled)",
            removed.name
        );
        if session.channels.is_empty() {
            log::warn!("no half-duplex channels remain under control");
        }
    }
}

/// Connects to the configured server and runs the bot until `shutdown`
/// completes or the connection fails.
pub async fn run_bot<S>(config: BotConfig, shutdown: S) -> Result<(), BotError>
where
    S: Future<Output = ()>,
{
    let (client, mut events) = MumbleClient::connect(&config).await?;
    let client = Arc::new(client);

    let mut engine = Engine::from_config(Arc::clone(&client), &config);
    let result = engine.run(&mut events, shutdown).await;

    client.disconnect().await;
    result
}

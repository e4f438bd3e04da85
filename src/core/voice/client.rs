use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mumble_protocol::control::{msgs, ClientControlCodec, ControlPacket};
use mumble_protocol::voice::VoicePacket;
use mumble_protocol::{Clientbound, Serverbound};
use native_tls::{Identity, TlsConnector as NativeTlsConnector};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_native_tls::{TlsConnector, TlsStream};
use tokio_util::codec::{Decoder, Framed};

use super::roster::ProtocolRoster;
use super::{
    Channel, ChannelId, ConnectionError, EnforcementError, Participant, ParticipantId,
    VoiceConnection,
};
use crate::core::config::{ActivityMode, BotConfig};
use crate::core::events::{ActivityEvent, ClientEvent};

type ControlFramed = Framed<TlsStream<TcpStream>, ClientControlCodec>;
type ControlSink = SplitSink<ControlFramed, ControlPacket<Serverbound>>;
type ControlStream = SplitStream<ControlFramed>;

const PING_INTERVAL_SECS: u64 = 10;
const TALK_STATE_TICK_MS: u64 = 100;
const TALK_STATE_HOLD_MS: u64 = 300;

/// Live connection to a Mumble server.
///
/// A background worker owns the TLS control stream; this handle shares the
/// worker's roster and forwards requests to it over a command queue.
pub struct MumbleClient {
    roster: Arc<RwLock<ProtocolRoster>>,
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MumbleClient {
    pub async fn connect(
        config: &BotConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ConnectionError> {
        log::info!(
            "connecting to {}:{} as {}",
            config.server.host,
            config.server.port,
            config.username
        );
        let connection = connect_mumble(config).await?;

        let roster = Arc::new(RwLock::new(ProtocolRoster::new()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_client_worker(
            connection,
            Arc::clone(&roster),
            config.activity_mode,
            command_rx,
            event_tx,
        ));

        let client = Self {
            roster,
            command_tx,
            worker: Mutex::new(Some(worker)),
        };
        Ok((client, event_rx))
    }

    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(ClientCommand::Disconnect);
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    async fn set_server_mute(
        &self,
        participant: &Participant,
        muted: bool,
    ) -> Result<(), EnforcementError> {
        let session = participant.id.0;
        // Held across the send so back-to-back requests see each other.
        let mut roster = self.roster.write().await;
        match roster.is_server_muted(session) {
            None => Err(EnforcementError::UnknownParticipant(participant.id)),
            Some(state) if state == muted => Ok(()),
            Some(_) => {
                self.command_tx
                    .send(ClientCommand::SetServerMute { session, muted })
                    .map_err(|_| EnforcementError::Disconnected)?;
                roster.request_server_mute(session, muted);
                Ok(())
            }
        }
    }
}

impl VoiceConnection for MumbleClient {
    async fn channel_by_name(&self, name: &str) -> Option<Channel> {
        self.roster.read().await.channel_by_name(name)
    }

    async fn channel_by_id(&self, id: ChannelId) -> Option<Channel> {
        self.roster.read().await.channel(id.0)
    }

    async fn participants_in(&self, channel: ChannelId) -> Vec<Participant> {
        self.roster.read().await.participants_in(channel.0)
    }

    async fn move_self_into(&self, channel: &Channel) -> Result<(), ConnectionError> {
        self.command_tx
            .send(ClientCommand::MoveSelf(channel.id.0))
            .map_err(|_| ConnectionError::Lost("voice worker is not running".to_string()))
    }

    async fn mute(&self, participant: &Participant) -> Result<(), EnforcementError> {
        self.set_server_mute(participant, true).await
    }

    async fn unmute(&self, participant: &Participant) -> Result<(), EnforcementError> {
        self.set_server_mute(participant, false).await
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ClientCommand {
    SetServerMute { session: u32, muted: bool },
    MoveSelf(u32),
    Disconnect,
}

struct LiveConnection {
    sink: ControlSink,
    stream: ControlStream,
}

async fn run_client_worker(
    mut connection: LiveConnection,
    roster: Arc<RwLock<ProtocolRoster>>,
    mode: ActivityMode,
    mut command_rx: mpsc::UnboundedReceiver<ClientCommand>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
) {
    match drive_connection(&mut connection, &roster, mode, &mut command_rx, &event_tx).await {
        Ok(()) => {
            let _ = connection.sink.close().await;
            log::info!("voice connection closed");
        }
        Err(reason) => {
            log::warn!("voice connection ended: {reason}");
            let _ = event_tx.send(ClientEvent::Disconnected { reason });
        }
    }
}

async fn drive_connection(
    connection: &mut LiveConnection,
    roster: &RwLock<ProtocolRoster>,
    mode: ActivityMode,
    command_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    event_tx: &mpsc::UnboundedSender<ClientEvent>,
) -> Result<(), String> {
    let mut ping_tick = interval(Duration::from_secs(PING_INTERVAL_SECS));
    ping_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut talk_tick = interval(Duration::from_millis(TALK_STATE_TICK_MS));
    talk_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tcp_packets_seen: u32 = 0;

    loop {
        tokio::select! {
            maybe_cmd = command_rx.recv() => {
                match maybe_cmd {
                    None | Some(ClientCommand::Disconnect) => return Ok(()),
                    Some(command) => handle_command(command, &mut connection.sink, roster).await?,
                }
            }
            _ = ping_tick.tick() => {
                send_ping(&mut connection.sink, tcp_packets_seen).await?;
            }
            _ = talk_tick.tick() => {
                let reports = {
                    let mut roster = roster.write().await;
                    let ended = roster.expire_speaking(Duration::from_millis(TALK_STATE_HOLD_MS));
                    talk_state_reports(mode, ended, roster.speaking_participants())
                };
                for report in reports {
                    let _ = event_tx.send(ClientEvent::Activity(report));
                }
            }
            packet = connection.stream.next() => {
                let Some(packet) = packet else {
                    return Err("server closed connection".to_string());
                };
                let packet = packet.map_err(|err| format!("control packet decode error: {err}"))?;
                tcp_packets_seen = tcp_packets_seen.saturating_add(1);
                handle_control_packet(packet, roster, mode, event_tx).await?;
            }
        }
    }
}

async fn handle_command(
    command: ClientCommand,
    sink: &mut ControlSink,
    roster: &RwLock<ProtocolRoster>,
) -> Result<(), String> {
    match command {
        ClientCommand::Disconnect => Ok(()),
        ClientCommand::SetServerMute { session, muted } => {
            let mut update = msgs::UserState::new();
            update.set_session(session);
            update.set_mute(muted);
            sink.send(ControlPacket::<Serverbound>::from(update))
                .await
                .map_err(|err| format!("failed to send mute request: {err}"))?;
            let name = roster.read().await.user_name_for_session(session);
            log::debug!(
                "requested {} for {name}",
                if muted { "mute" } else { "unmute" }
            );
            Ok(())
        }
        ClientCommand::MoveSelf(channel_id) => {
            let mut update = msgs::UserState::new();
            update.set_channel_id(channel_id);
            sink.send(ControlPacket::<Serverbound>::from(update))
                .await
                .map_err(|err| format!("failed to request channel switch: {err}"))
        }
    }
}

async fn handle_control_packet(
    packet: ControlPacket<Clientbound>,
    roster: &RwLock<ProtocolRoster>,
    mode: ActivityMode,
    event_tx: &mpsc::UnboundedSender<ClientEvent>,
) -> Result<(), String> {
    match packet {
        ControlPacket::Reject(msg) => {
            let reason = if msg.has_reason() {
                msg.get_reason().to_string()
            } else {
                "authentication rejected".to_string()
            };
            return Err(reason);
        }
        ControlPacket::ServerSync(msg) => {
            let session = msg.get_session();
            log::info!("connected to server as session {session}");
            let _ = event_tx.send(ClientEvent::Ready {
                self_id: ParticipantId(session),
            });
        }
        ControlPacket::ChannelState(msg) => {
            roster.write().await.apply_channel_state(&msg);
        }
        ControlPacket::ChannelRemove(msg) => {
            let channel_id = msg.get_channel_id();
            if roster.write().await.remove_channel(channel_id) {
                let _ = event_tx.send(ClientEvent::ChannelRemoved(ChannelId(channel_id)));
            }
        }
        ControlPacket::UserState(msg) => {
            if let Some(moved) = roster.write().await.apply_user_state(&msg) {
                log::debug!("{} is now in {}", moved.name, moved.channel_id);
            }
        }
        ControlPacket::UserRemove(msg) => {
            roster.write().await.remove_user(msg.get_session());
        }
        ControlPacket::UDPTunnel(packet) => {
            if let VoicePacket::Audio { session_id, .. } = *packet {
                let marked = roster.write().await.mark_speaking(session_id);
                if let Some((participant, started)) = marked {
                    if let Some(event) = activity_for_voice(mode, participant, started) {
                        let _ = event_tx.send(ClientEvent::Activity(event));
                    }
                }
            }
        }
        ControlPacket::PermissionDenied(msg) => {
            let target = if msg.has_session() {
                let mut roster = roster.write().await;
                // The next transition has to be able to re-issue the request.
                roster.reject_pending_mute(msg.get_session());
                roster.user_name_for_session(msg.get_session())
            } else {
                "unknown user".to_string()
            };
            let reason = if msg.has_reason() && !msg.get_reason().is_empty() {
                msg.get_reason().to_string()
            } else {
                "insufficient privileges".to_string()
            };
            log::warn!("server denied request affecting {target}: {reason}");
        }
        _ => {}
    }

    Ok(())
}

fn activity_for_voice(
    mode: ActivityMode,
    participant: Participant,
    started: bool,
) -> Option<ActivityEvent> {
    match mode {
        ActivityMode::Chunks => Some(ActivityEvent::AudioChunk {
            participant,
            resumed: started,
        }),
        ActivityMode::TalkState => started.then_some(ActivityEvent::TalkState {
            participant,
            talking: true,
            changed: true,
        }),
    }
}

fn talk_state_reports(
    mode: ActivityMode,
    ended: Vec<Participant>,
    still_talking: Vec<Participant>,
) -> Vec<ActivityEvent> {
    if mode != ActivityMode::TalkState {
        return Vec::new();
    }

    let stops = ended.into_iter().map(|participant| ActivityEvent::TalkState {
        participant,
        talking: false,
        changed: true,
    });
    let refreshes = still_talking
        .into_iter()
        .map(|participant| ActivityEvent::TalkState {
            participant,
            talking: true,
            changed: false,
        });
    stops.chain(refreshes).collect()
}

async fn connect_mumble(config: &BotConfig) -> Result<LiveConnection, ConnectionError> {
    let server = &config.server;
    let server_addr = resolve_server_addr(&server.host, server.port)?;
    let tcp = TcpStream::connect(server_addr)
        .await
        .map_err(|source| ConnectionError::Tcp {
            address: server_addr.to_string(),
            source,
        })?;

    let mut tls_builder = NativeTlsConnector::builder();
    tls_builder.danger_accept_invalid_certs(server.allow_insecure_tls);
    if let Some(path) = &server.certificate {
        tls_builder.identity(load_identity(path, &server.certificate_password)?);
    }
    let tls_connector: TlsConnector = tls_builder
        .build()
        .map_err(|err| ConnectionError::Tls(format!("failed to build TLS connector: {err}")))?
        .into();

    let tls = tls_connector
        .connect(&server.host, tcp)
        .await
        .map_err(|err| ConnectionError::Tls(format!("TLS handshake failed: {err}")))?;

    let framed = ClientControlCodec::new().framed(tls);
    let (mut sink, stream) = framed.split();

    let mut authenticate = msgs::Authenticate::new();
    authenticate.set_username(config.username.clone());
    if let Some(password) = &server.password {
        authenticate.set_password(password.clone());
    }
    authenticate.set_opus(true);

    sink.send(ControlPacket::<Serverbound>::from(authenticate))
        .await
        .map_err(|err| ConnectionError::Lost(format!("failed to send authenticate packet: {err}")))?;

    Ok(LiveConnection { sink, stream })
}

fn load_identity(path: &Path, password: &str) -> Result<Identity, ConnectionError> {
    let der = fs::read(path).map_err(|err| ConnectionError::Certificate {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    Identity::from_pkcs12(&der, password).map_err(|err| ConnectionError::Certificate {
        path: path.display().to_string(),
        reason: err.to_string(),
    })
}

fn resolve_server_addr(host: &str, port: u16) -> Result<SocketAddr, ConnectionError> {
    let address = format!("{host}:{port}");
    (host, port)
        .to_socket_addrs()
        .map_err(|err| ConnectionError::Resolve {
            address: address.clone(),
            reason: err.to_string(),
        })?
        .next()
        .ok_or_else(|| ConnectionError::Resolve {
            address,
            reason: "no socket address resolved".to_string(),
        })
}

async fn send_ping(sink: &mut ControlSink, tcp_packets_seen: u32) -> Result<(), String> {
    let mut ping = msgs::Ping::new();
    ping.set_timestamp(epoch_millis());
    ping.set_tcp_packets(tcp_packets_seen);

    sink.send(ControlPacket::<Serverbound>::from(ping))
        .await
        .map_err(|err| format!("failed to send ping: {err}"))
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}

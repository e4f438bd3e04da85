use std::collections::BTreeSet;

use thiserror::Error;

use crate::core::voice::{Channel, ChannelId, Participant, VoiceConnection};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("none of the configured channels exist on the server: {0:?}")]
    NoChannelsInScope(Vec<String>),
}

/// The set of channel names under half-duplex control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelScope {
    names: BTreeSet<String>,
}

impl ChannelScope {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_in_scope(&self, channel_name: &str) -> bool {
        self.names.contains(channel_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Looks up every configured channel on the server. Missing channels are
    /// logged and left out; it is only an error when nothing resolves.
    pub async fn resolve<C: VoiceConnection>(
        &self,
        connection: &C,
    ) -> Result<Vec<Channel>, ScopeError> {
        let mut resolved = Vec::with_capacity(self.names.len());
        for name in &self.names {
            match connection.channel_by_name(name).await {
                Some(channel) => resolved.push(channel),
                None => log::error!("channel '{name}' not found; excluding it from half-duplex control"),
            }
        }

        if resolved.is_empty() {
            return Err(ScopeError::NoChannelsInScope(
                self.names.iter().cloned().collect(),
            ));
        }
        Ok(resolved)
    }

    /// Current members of `channel`, fetched fresh from the connection.
    pub async fn roster<C: VoiceConnection>(
        &self,
        connection: &C,
        channel: ChannelId,
    ) -> Vec<Participant> {
        connection.participants_in(channel).await
    }
}

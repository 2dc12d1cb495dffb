//! Public handle for interacting with the Supabase Realtime connection.

use tokio::sync::mpsc;

use super::connection::connection_loop;
use super::types::{ChannelConfig, ChannelError, RealtimeCommand, RealtimeConfig, RealtimeEvent};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Handle for interacting with the Supabase Realtime connection.
///
/// All methods are non-blocking and send commands to the background
/// connection task. They only fail once that task has stopped.
pub struct RealtimeClient {
    command_tx: mpsc::Sender<RealtimeCommand>,
}

impl RealtimeClient {
    /// Create a new client and start the background connection.
    /// Returns `(client, event_receiver)`.
    pub fn connect(config: RealtimeConfig) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        tokio::spawn(connection_loop(config, event_tx, command_rx));
        (Self { command_tx }, event_rx)
    }

    /// Clone the command sender to create a lightweight handle
    /// that can send commands to the same connection.
    pub fn clone_sender(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
        }
    }

    async fn send(&self, command: RealtimeCommand) -> Result<(), ChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Join a Supabase Realtime channel.
    pub async fn join_channel(&self, topic: &str, config: ChannelConfig) -> Result<(), ChannelError> {
        self.send(RealtimeCommand::JoinChannel {
            topic: topic.to_string(),
            config,
        })
        .await
    }

    /// Leave a channel. The server drops our presence on it.
    pub async fn leave_channel(&self, topic: &str) -> Result<(), ChannelError> {
        self.send(RealtimeCommand::LeaveChannel {
            topic: topic.to_string(),
        })
        .await
    }

    /// Track (or replace) our presence payload on a channel.
    pub async fn presence_track(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<(), ChannelError> {
        self.send(RealtimeCommand::PresenceTrack {
            topic: topic.to_string(),
            payload,
        })
        .await
    }

    /// Disconnect from the server.
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(RealtimeCommand::Disconnect).await;
    }
}

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{ChatCommand, ChatEvent};

/// Broadcast event stream type used by frontend subscribers.
pub type EventStream = broadcast::Receiver<ChatEvent>;

/// Errors returned by sync channel operations.
#[derive(Debug, Error)]
pub enum SyncChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Command/event channel pair used by the runtime and frontend bridges.
#[derive(Clone, Debug)]
pub struct SyncChannels {
    command_tx: mpsc::Sender<ChatCommand>,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl SyncChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(command_buffer: usize, event_buffer: usize) -> (Self, mpsc::Receiver<ChatCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Clone the command sender.
    pub fn command_sender(&self) -> mpsc::Sender<ChatCommand> {
        self.command_tx.clone()
    }

    /// Clone the event sender.
    pub fn event_sender(&self) -> broadcast::Sender<ChatEvent> {
        self.event_tx.clone()
    }

    /// Subscribe to emitted engine events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Send one command to the runtime.
    pub async fn send_command(&self, command: ChatCommand) -> Result<(), SyncChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SyncChannelError::CommandChannelClosed)
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: ChatEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AppLifecycle, ChatCommand, ChatEvent};

    #[tokio::test]
    async fn sends_commands_to_receiver() {
        let (channels, mut rx) = SyncChannels::new(8, 8);
        channels
            .send_command(ChatCommand::OpenRoom {
                room_id: "room-1".into(),
            })
            .await
            .expect("command send should work");

        let cmd = rx.recv().await.expect("receiver should have a command");
        match cmd {
            ChatCommand::OpenRoom { room_id } => assert_eq!(room_id, "room-1"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let (channels, _) = SyncChannels::new(4, 16);
        let mut a = channels.subscribe();
        let mut b = channels.subscribe();

        channels.emit(ChatEvent::SessionExpired);

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }

    #[tokio::test]
    async fn lifecycle_commands_round_trip() {
        let (channels, mut rx) = SyncChannels::new(2, 2);
        channels
            .send_command(ChatCommand::AppStateChanged {
                state: AppLifecycle::Background,
            })
            .await
            .expect("command send should work");

        let cmd = rx.recv().await.expect("receiver should have a command");
        assert_eq!(
            cmd,
            ChatCommand::AppStateChanged {
                state: AppLifecycle::Background,
            }
        );
    }
}

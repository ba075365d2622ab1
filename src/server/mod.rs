//! Event dispatch.
//!
//! One task owns the [`EventHandler`] and drains every source through a
//! single `select!` loop: navigations, alarms, user commands and the store's
//! change feed. Handlers never run concurrently with each other, and ready
//! sources are polled in that fixed order, so a navigation queued before a
//! command is always handled first.

pub mod handler;
pub mod types;

pub use self::handler::EventHandler;
pub use self::types::{
    Command, CommandEnvelope, NavigationEvent, NavigationKind, NewSite, Reply, SitePatch,
};

use crate::error::CommandError;
use crate::store::StorageChange;
use std::future::Future;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Cloneable sending side of the dispatcher's channels.
#[derive(Clone)]
pub struct DispatcherHandle {
    navigations: mpsc::Sender<NavigationEvent>,
    commands: mpsc::Sender<CommandEnvelope>,
}

impl DispatcherHandle {
    pub async fn navigate(&self, event: NavigationEvent) -> Result<(), CommandError> {
        self.navigations
            .send(event)
            .await
            .map_err(|_| CommandError::ChannelClosed)
    }

    /// Sends a command and waits for the dispatcher to finish it.
    pub async fn send(&self, command: Command) -> Result<Reply, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(CommandEnvelope { command, reply })
            .await
            .map_err(|_| CommandError::ChannelClosed)?;
        rx.await.map_err(|_| CommandError::ChannelClosed)?
    }
}

pub struct Dispatcher {
    handler: EventHandler,
    navigations: mpsc::Receiver<NavigationEvent>,
    commands: mpsc::Receiver<CommandEnvelope>,
    alarms: mpsc::Receiver<String>,
    changes: broadcast::Receiver<StorageChange>,
}

impl Dispatcher {
    pub fn new(
        handler: EventHandler,
        alarms: mpsc::Receiver<String>,
        capacity: usize,
    ) -> (Self, DispatcherHandle) {
        let (nav_tx, nav_rx) = mpsc::channel(capacity);
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        let changes = handler.repo().store().subscribe();

        let dispatcher = Self {
            handler,
            navigations: nav_rx,
            commands: cmd_rx,
            alarms,
            changes,
        };
        let handle = DispatcherHandle {
            navigations: nav_tx,
            commands: cmd_tx,
        };
        (dispatcher, handle)
    }

    /// Runs startup, then processes events until `shutdown` resolves or every
    /// source is closed.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        if let Err(e) = self.handler.on_startup().await {
            error!("Startup pass failed: {}", e);
        }
        info!("Dispatcher running");

        tokio::pin!(shutdown);
        let mut changes_open = true;

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Dispatcher shutting down");
                    break;
                }
                Some(event) = self.navigations.recv() => {
                    if let Err(e) = self.handler.on_navigation(&event).await {
                        error!(url = %event.url, "Failed to record navigation: {}", e);
                    }
                }
                Some(name) = self.alarms.recv() => {
                    if let Err(e) = self.handler.on_alarm(&name).await {
                        error!(alarm = %name, "Alarm handling failed: {}", e);
                    }
                }
                Some(envelope) = self.commands.recv() => {
                    let name = envelope.command.name();
                    let result = self.handler.execute(envelope.command).await;
                    if let Err(e) = &result {
                        warn!(command = name, "Command failed: {}", e);
                    }
                    if envelope.reply.send(result).is_err() {
                        debug!(command = name, "Caller dropped before reply");
                    }
                }
                change = self.changes.recv(), if changes_open => match change {
                    Ok(change) => {
                        if let Err(e) = self.handler.on_storage_change(&change).await {
                            error!(keys = ?change.keys, "Storage change handling failed: {}", e);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Change feed lagged, resynchronizing");
                        if let Err(e) = self.handler.resync().await {
                            error!("Resync failed: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => {
                        warn!("Change feed closed");
                        changes_open = false;
                    }
                },
                else => break,
            }
        }
    }
}

//! Lifecycle signalling between the core and the networking service.
//!
//! The core only ever *sends*: [`ServiceControl`] pushes a payload-free
//! [`ServiceCommand`] into an unbounded channel and returns. Whoever owns
//! the receiving end is the networking service and must tolerate
//! redundant commands (`Stop` while stopped, `Start` while running).
//! [`ServiceRunner`] is a receiver that honours that contract on behalf of
//! a [`ServiceHandler`].

use async_trait::async_trait;
use log::{debug, error, info};
use std::fmt;
use tokio::sync::{mpsc, watch};

use super::errors::ServiceError;

/// The fixed command alphabet understood by the networking service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceCommand {
    Start,
    Stop,
    Reload,
}

impl ServiceCommand {
    /// Wire name of the signal.
    pub fn action(&self) -> &'static str {
        match self {
            ServiceCommand::Start => "START",
            ServiceCommand::Stop => "CLOSE",
            ServiceCommand::Reload => "RELOAD",
        }
    }
}

impl fmt::Display for ServiceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

/// Create a connected sender / receiver pair.
pub fn channel() -> (ServiceControl, mpsc::UnboundedReceiver<ServiceCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ServiceControl { tx }, rx)
}

/// Fire-and-forget sender. Cloning is cheap; every clone feeds the same
/// service. Commands from different clones are not ordered relative to
/// each other.
#[derive(Debug, Clone)]
pub struct ServiceControl {
    tx: mpsc::UnboundedSender<ServiceCommand>,
}

impl ServiceControl {
    pub fn start(&self) {
        self.send(ServiceCommand::Start);
    }

    pub fn stop(&self) {
        self.send(ServiceCommand::Stop);
    }

    pub fn reload(&self) {
        self.send(ServiceCommand::Reload);
    }

    fn send(&self, command: ServiceCommand) {
        debug!("Sending {command} to networking service");
        if self.tx.send(command).is_err() {
            debug!("Networking service is not listening; dropped {command}");
        }
    }
}

/// Transitions a networking service implements.
#[async_trait]
pub trait ServiceHandler: Send {
    async fn start(&mut self) -> Result<(), ServiceError>;
    async fn stop(&mut self);
    async fn reload(&mut self) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Running,
}

/// Drives a [`ServiceHandler`] from the command channel.
///
/// 1. The runner owns a task that receives commands in arrival order.
/// 2. Commands that would not change the state are dropped, so the
///    handler never sees `start` twice in a row or `stop` while stopped.
/// 3. When every [`ServiceControl`] is gone the task stops a running
///    handler and exits.
pub struct ServiceRunner {
    task: tokio::task::JoinHandle<()>,
    state: watch::Receiver<ServiceState>,
}

impl ServiceRunner {
    pub fn spawn<H>(mut commands: mpsc::UnboundedReceiver<ServiceCommand>, mut handler: H) -> Self
    where
        H: ServiceHandler + 'static,
    {
        let (state_tx, state_rx) = watch::channel(ServiceState::Stopped);
        let task = tokio::spawn(async move {
            info!("Networking service loop started.");
            while let Some(command) = commands.recv().await {
                let current = *state_tx.borrow();
                match (command, current) {
                    (ServiceCommand::Start, ServiceState::Stopped) => match handler.start().await {
                        Ok(()) => {
                            info!("Networking service running.");
                            state_tx.send_replace(ServiceState::Running);
                        }
                        Err(e) => error!("{e}"),
                    },
                    (ServiceCommand::Stop, ServiceState::Running) => {
                        handler.stop().await;
                        info!("Networking service stopped.");
                        state_tx.send_replace(ServiceState::Stopped);
                    }
                    (ServiceCommand::Reload, ServiceState::Running) => {
                        if let Err(e) = handler.reload().await {
                            error!("{e}");
                        }
                    }
                    (command, state) => debug!("Ignoring {command} while {state:?}"),
                }
            }
            if *state_tx.borrow() == ServiceState::Running {
                handler.stop().await;
                state_tx.send_replace(ServiceState::Stopped);
            }
            info!("Networking service loop ended.");
        });
        Self {
            task,
            state: state_rx,
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state.clone()
    }

    /// Wait for the loop to end (after all senders are dropped).
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

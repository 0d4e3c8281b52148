//! Command channel between the coordinator and connected browser-extension agents.
//!
//! The bridge owns one outbound queue per open connection. The transport layer (a
//! websocket writer, or an in-process simulator) drains the receiving half and pushes
//! frames to the agent; everything else talks to agents through [`ExtensionsBridge::send`]
//! or the [`CommandChannel`] seam.

pub mod config;
pub mod protocol;

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use taskpilot_core_types::{ExecutionId, StepId, WorkerId};

pub use config::BridgeConfig;
pub use protocol::{
    parse_inbound, Command, Correlation, InboundEvent, InboundKind, OutboundFrame, OutboundKind,
    ProtocolError,
};

/// Errors surfaced by the bridge.
#[derive(Clone, Debug, Error)]
pub enum BridgeError {
    #[error("channel closed for worker {0}")]
    ChannelClosed(WorkerId),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Channel event bus.
pub type BridgeEventBus = broadcast::Sender<BridgeEvent>;

/// Events emitted by the bridge to observers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum BridgeEvent {
    ChannelOpen {
        worker: WorkerId,
    },
    ChannelClosed {
        worker: WorkerId,
    },
    CommandSent {
        worker: WorkerId,
        execution_id: ExecutionId,
        step_id: StepId,
    },
    SendFailed {
        worker: WorkerId,
        error: String,
    },
}

/// Fire-and-forget delivery of a command to one worker.
///
/// Sending only enqueues the frame; replies arrive later as inbound events.
pub trait CommandChannel: Send + Sync {
    fn send_command(&self, worker: &WorkerId, command: &Command) -> Result<(), BridgeError>;
}

impl<T> CommandChannel for Arc<T>
where
    T: CommandChannel + ?Sized,
{
    fn send_command(&self, worker: &WorkerId, command: &Command) -> Result<(), BridgeError> {
        (**self).send_command(worker, command)
    }
}

pub struct ExtensionsBridge {
    pub events: BridgeEventBus,
    config: BridgeConfig,
    channels: DashMap<WorkerId, mpsc::UnboundedSender<OutboundFrame>>,
}

impl ExtensionsBridge {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self::with_events(events, config)
    }

    pub fn with_events(events: BridgeEventBus, config: BridgeConfig) -> Arc<Self> {
        Arc::new(Self {
            events,
            config,
            channels: DashMap::new(),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Opens the outbound queue for a connection; an existing queue for the same id is replaced.
    pub fn open(&self, worker: WorkerId) -> mpsc::UnboundedReceiver<OutboundFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.channels.insert(worker.clone(), tx).is_some() {
            warn!(%worker, "replacing outbound channel for reconnecting worker");
        }
        let _ = self.events.send(BridgeEvent::ChannelOpen { worker });
        rx
    }

    pub fn close(&self, worker: &WorkerId) -> bool {
        let removed = self.channels.remove(worker).is_some();
        if removed {
            let _ = self.events.send(BridgeEvent::ChannelClosed {
                worker: worker.clone(),
            });
        }
        removed
    }

    pub fn is_open(&self, worker: &WorkerId) -> bool {
        self.channels
            .get(worker)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    pub fn send(&self, worker: &WorkerId, frame: OutboundFrame) -> Result<(), BridgeError> {
        let result = match self.channels.get(worker) {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| BridgeError::ChannelClosed(worker.clone())),
            None => Err(BridgeError::ChannelClosed(worker.clone())),
        };
        if let Err(err) = &result {
            debug!(%worker, %err, "outbound frame not delivered");
            let _ = self.events.send(BridgeEvent::SendFailed {
                worker: worker.clone(),
                error: err.to_string(),
            });
        }
        result
    }
}

impl CommandChannel for ExtensionsBridge {
    fn send_command(&self, worker: &WorkerId, command: &Command) -> Result<(), BridgeError> {
        self.send(worker, OutboundFrame::execute_command(command))?;
        let _ = self.events.send(BridgeEvent::CommandSent {
            worker: worker.clone(),
            execution_id: command.execution_id.clone(),
            step_id: command.step_id,
        });
        Ok(())
    }
}

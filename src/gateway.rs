//! Connection-level handling of browser-extension agents.
//!
//! The gateway is transport agnostic: whatever owns the socket calls [`AgentGateway::connect`]
//! once, feeds every text frame to [`AgentGateway::handle_text`], forwards the frames from the
//! returned receiver, and calls [`AgentGateway::disconnect`] when the socket goes away.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use extensions_bridge::{
    parse_inbound, BridgeError, Correlation, ExtensionsBridge, InboundEvent, InboundKind,
    OutboundFrame, ProtocolError,
};
use taskpilot_core_types::{UserId, WorkerId};
use taskpilot_registry::{WorkerRegistry, WorkerSession};
use taskpilot_scheduler::TaskScheduler;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub struct AgentGateway {
    bridge: Arc<ExtensionsBridge>,
    registry: Arc<dyn WorkerRegistry>,
    scheduler: TaskScheduler,
}

impl AgentGateway {
    pub fn new(
        bridge: Arc<ExtensionsBridge>,
        registry: Arc<dyn WorkerRegistry>,
        scheduler: TaskScheduler,
    ) -> Self {
        Self {
            bridge,
            registry,
            scheduler,
        }
    }

    /// Opens the outbound queue for a new connection and greets the agent.
    pub fn connect(&self, worker: WorkerId) -> mpsc::UnboundedReceiver<OutboundFrame> {
        let outbound = self.bridge.open(worker.clone());
        if let Err(err) = self.bridge.send(&worker, OutboundFrame::connected(&worker.0)) {
            warn!(%worker, %err, "failed to greet agent");
        }
        info!(%worker, "agent connected");
        outbound
    }

    pub fn disconnect(&self, worker: &WorkerId) {
        self.bridge.close(worker);
        let removed = self.registry.unregister(worker);
        info!(%worker, registered = removed.is_some(), "agent disconnected");
    }

    /// Parses one inbound text frame and routes it.
    ///
    /// Malformed frames are answered with an `ERROR` frame; unknown kinds are only logged.
    pub fn handle_text(&self, worker: &WorkerId, text: &str) -> Result<InboundKind, GatewayError> {
        let event = match parse_inbound(text, self.bridge.config().max_frame_bytes) {
            Ok(event) => event,
            Err(err @ ProtocolError::UnknownKind(_)) => {
                warn!(%worker, %err, "ignoring frame");
                return Err(err.into());
            }
            Err(err) => {
                warn!(%worker, %err, "rejecting frame");
                self.reply(worker, OutboundFrame::error(err.to_string()));
                return Err(err.into());
            }
        };
        self.registry.touch(worker);
        let kind = event.kind();
        self.route(worker, event);
        Ok(kind)
    }

    fn route(&self, worker: &WorkerId, event: InboundEvent) {
        match event {
            InboundEvent::Register {
                user_id,
                fingerprint,
            } => {
                let user = user_id.map(UserId::from).unwrap_or_else(UserId::anonymous);
                let session = WorkerSession::new(worker.clone(), user.clone());
                self.registry.register(match fingerprint {
                    Some(fingerprint) => session.with_fingerprint(fingerprint),
                    None => session,
                });
                self.reply(worker, OutboundFrame::registered("success"));
                info!(%worker, %user, "agent registered");
                self.scheduler.dispatch_tick();
            }
            InboundEvent::PageInfo { url, title } => {
                if let Some(url) = &url {
                    self.scheduler.on_page_changed(worker, url);
                }
                self.registry.update_page_info(worker, url, title);
            }
            InboundEvent::ElementFound {
                correlation,
                found,
                data,
            } => {
                if let Some(correlation) = self.correlated(worker, correlation, "ELEMENT_FOUND") {
                    self.scheduler
                        .on_element_located(worker, &correlation, found, data);
                }
            }
            InboundEvent::ActionResult {
                correlation,
                success,
                message,
                error,
                data,
            } => {
                if let Some(correlation) = self.correlated(worker, correlation, "ACTION_RESULT") {
                    self.scheduler
                        .on_step_completed(worker, &correlation, success, message, error, data);
                }
            }
            InboundEvent::Error {
                correlation,
                error,
                data,
            } => match correlation {
                Some(correlation) => {
                    self.scheduler.on_step_error(worker, &correlation, error, data);
                }
                None => warn!(%worker, %error, "agent reported an uncorrelated error"),
            },
            InboundEvent::Heartbeat => {
                self.registry.update_heartbeat(worker, Utc::now());
                self.reply(worker, OutboundFrame::heartbeat_ack());
            }
        }
    }

    fn correlated(
        &self,
        worker: &WorkerId,
        correlation: Option<Correlation>,
        kind: &str,
    ) -> Option<Correlation> {
        if correlation.is_none() {
            debug!(%worker, kind, "reply without correlation ids dropped");
        }
        correlation
    }

    fn reply(&self, worker: &WorkerId, frame: OutboundFrame) {
        if let Err(err) = self.bridge.send(worker, frame) {
            debug!(%worker, %err, "reply not delivered");
        }
    }
}

//! Cross-thread access to a running graph.

use std::any::Any;

use conduit_component::{Key, Payload};
use tokio::sync::mpsc;

use crate::error::RuntimeStopped;

/// Messages handed to the dispatch loop from outside.
#[derive(Debug)]
pub(crate) enum Inbound {
    Event { key: Key, payload: Payload },
    Shutdown,
}

/// A cloneable, `Send` handle to a scheduler.
///
/// Events published through the handle are queued and routed by the
/// dispatch loop at the start of its next cycle, in the order they were
/// published. The handle works from any thread, with or without a tokio
/// runtime.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl RuntimeHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { tx }
    }

    /// Publish `value` on `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeStopped`] if the scheduler has been dropped.
    pub fn publish<T: Any + Send + Sync>(
        &self,
        key: impl Into<Key>,
        value: T,
    ) -> Result<(), RuntimeStopped> {
        self.publish_payload(key, Payload::new(value))
    }

    /// Publish an already wrapped payload on `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeStopped`] if the scheduler has been dropped.
    pub fn publish_payload(
        &self,
        key: impl Into<Key>,
        payload: Payload,
    ) -> Result<(), RuntimeStopped> {
        self.tx
            .send(Inbound::Event {
                key: key.into(),
                payload,
            })
            .map_err(|_| RuntimeStopped)
    }

    /// Ask the dispatch loop to begin its shutdown sequence.
    ///
    /// Requesting shutdown of a scheduler that is already gone is a no-op.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Inbound::Shutdown);
    }
}

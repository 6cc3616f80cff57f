//! Output fields.

use std::any::Any;

use crate::event::Payload;
use crate::id::Key;

/// A named emitter bound to one event key.
///
/// Payloads pushed during a processing step are held until the step hands
/// control back to the scheduler, which takes them in push order and
/// publishes each as an event.
#[derive(Debug)]
pub struct OutputField {
    name: String,
    key: Key,
    pending: Vec<Payload>,
}

impl OutputField {
    /// Create an empty output field.
    #[must_use]
    pub fn new(name: impl Into<String>, key: impl Into<Key>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            pending: Vec::new(),
        }
    }

    /// The field name within its component.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The key every pushed payload is published on.
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Queue a value for publication.
    pub fn push<T: Any + Send + Sync>(&mut self, value: T) {
        self.pending.push(Payload::new(value));
    }

    /// Queue an already wrapped payload.
    pub fn push_payload(&mut self, payload: Payload) {
        self.pending.push(payload);
    }

    /// Number of payloads waiting for publication.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Remove and return all pending payloads, leaving the field empty.
    pub fn take(&mut self) -> Vec<Payload> {
        std::mem::take(&mut self.pending)
    }
}

//! The [`Event`] envelope and its type-erased [`Payload`].
//!
//! Events are immutable once emitted. A single event is delivered to every
//! input field bound to its key, so both the envelope and the payload are
//! cheap to clone: the payload value lives behind an `Arc` and is only ever
//! read.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::id::{ComponentId, Key};

/// A type-erased event value.
///
/// Any `Send + Sync + 'static` value can be carried. Consumers recover the
/// concrete type with [`Payload::downcast_ref`]; the original type name is
/// kept for diagnostics.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Payload {
    /// Wrap a value.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Borrow the value as `T`, or `None` if it has a different type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Returns `true` if the value is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// The Rust type name of the wrapped value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload<{}>", self.type_name)
    }
}

/// Envelope for all data passed between components.
///
/// The key is the address: the router delivers the event to every input
/// field listening on it. Events are built by the router, which stamps the
/// sequence number; components only ever push plain values into their output
/// fields.
#[derive(Debug, Clone)]
pub struct Event {
    key: Key,
    payload: Payload,
    source: Option<ComponentId>,
    sequence: u64,
    timestamp: SystemTime,
}

impl Event {
    /// Create an event stamped with the current wall-clock time.
    ///
    /// `source` is `None` for events injected from outside the graph
    /// (adapters, the runtime itself).
    #[must_use]
    pub fn new(key: Key, payload: Payload, source: Option<ComponentId>, sequence: u64) -> Self {
        Self {
            key,
            payload,
            source,
            sequence,
            timestamp: SystemTime::now(),
        }
    }

    /// The event key.
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The event payload.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Borrow the payload as `T`.
    #[must_use]
    pub fn value<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// The emitting component, if the event came from inside the graph.
    #[must_use]
    pub fn source(&self) -> Option<&ComponentId> {
        self.source.as_ref()
    }

    /// Router-assigned, strictly increasing sequence number.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Wall-clock time at which the router created the event.
    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({}, #{}, {:?})", self.key, self.sequence, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_downcast() {
        let payload = Payload::new(42_i64);
        assert!(payload.is::<i64>());
        assert_eq!(payload.downcast_ref::<i64>(), Some(&42));
        assert_eq!(payload.downcast_ref::<u8>(), None);
        assert_eq!(payload.type_name(), "i64");
    }

    #[test]
    fn test_payload_of_option_is_still_a_value() {
        let payload = Payload::new(None::<String>);
        assert_eq!(payload.downcast_ref::<Option<String>>(), Some(&None));
    }

    #[test]
    fn test_event_accessors() {
        let source = ComponentId::new("Camera0");
        let event = Event::new(Key::from("frame"), Payload::new("img"), Some(source.clone()), 7);
        assert_eq!(event.key().as_str(), "frame");
        assert_eq!(event.value::<&str>(), Some(&"img"));
        assert_eq!(event.source(), Some(&source));
        assert_eq!(event.sequence(), 7);
    }

    #[test]
    fn test_event_clone_shares_payload() {
        let event = Event::new(Key::from("k"), Payload::new(vec![1u8; 1024]), None, 1);
        let copy = event.clone();
        let a = event.value::<Vec<u8>>().unwrap().as_ptr();
        let b = copy.value::<Vec<u8>>().unwrap().as_ptr();
        assert_eq!(a, b);
    }
}

//! Input fields and their buffering policies.
//!
//! An [`InputField`] is bound to one or more event keys. The router calls
//! [`InputField::deliver`] for every event on a bound key; the owning
//! component reads the field during its processing step.
//!
//! ## Double buffering
//!
//! `Latest`, `Buffer` and `History` fields are double buffered. Deliveries
//! land in an *incoming* buffer; the scheduler calls [`InputField::switch`]
//! right before the component's processing step, which moves the incoming
//! state into the *visible* view the component reads. Events that arrive
//! while a step is in progress are therefore seen by the next step, never by
//! two steps and never by none.
//!
//! | Policy   | Incoming                      | Visible after switch         | After step    |
//! |----------|-------------------------------|------------------------------|---------------|
//! | Latest   | newest event per bound key    | copy of incoming             | kept          |
//! | Buffer   | all events since last switch  | taken from incoming          | cleared       |
//! | History  | ring of the `N` newest events | copy of the ring             | kept          |
//! | Queue    | (none)                        | the queue itself, unmanaged  | kept          |
//!
//! `Queue` fields are not double buffered: events are appended as they
//! arrive and only the component removes them.

use std::any::Any;
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::FieldError;
use crate::event::Event;
use crate::id::Key;

/// Buffering policy of an input field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum Policy {
    /// Only the most recent event per bound key; overwritten on arrival.
    Latest,
    /// Every event since the previous step; emptied after each step.
    Buffer,
    /// The `capacity` most recent events; the oldest is evicted on overflow.
    History {
        /// Maximum number of retained events.
        capacity: usize,
    },
    /// Unmanaged FIFO, drained by the component itself.
    Queue {
        /// Optional bound; the oldest event is dropped when exceeded.
        max_len: Option<usize>,
    },
}

impl Policy {
    /// Short policy name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Policy::Latest => "Latest",
            Policy::Buffer => "Buffer",
            Policy::History { .. } => "History",
            Policy::Queue { .. } => "Queue",
        }
    }

    /// Returns `true` for policies the scheduler switches around each step.
    #[must_use]
    pub fn is_double_buffered(&self) -> bool {
        !matches!(self, Policy::Queue { .. })
    }
}

/// Declaration of an input field: bound keys, policy and trigger flag.
///
/// # Examples
///
/// ```rust
/// use conduit_component::InputSpec;
///
/// let frames = InputSpec::latest("camera.frame").trigger();
/// let clicks = InputSpec::buffer("mouse.click").with_key("touch.tap");
/// let trail = InputSpec::history("position", 16);
/// assert!(frames.is_trigger());
/// assert_eq!(clicks.keys().len(), 2);
/// assert!(!trail.is_trigger());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    keys: Vec<Key>,
    policy: Policy,
    trigger: bool,
}

impl InputSpec {
    fn with_policy(key: impl Into<Key>, policy: Policy) -> Self {
        Self {
            keys: vec![key.into()],
            policy,
            trigger: false,
        }
    }

    /// A `Latest` field bound to `key`.
    #[must_use]
    pub fn latest(key: impl Into<Key>) -> Self {
        Self::with_policy(key, Policy::Latest)
    }

    /// A `Buffer` field bound to `key`.
    #[must_use]
    pub fn buffer(key: impl Into<Key>) -> Self {
        Self::with_policy(key, Policy::Buffer)
    }

    /// A `History` field bound to `key`, retaining `capacity` events.
    #[must_use]
    pub fn history(key: impl Into<Key>, capacity: usize) -> Self {
        Self::with_policy(key, Policy::History { capacity })
    }

    /// An unbounded `Queue` field bound to `key`.
    #[must_use]
    pub fn queue(key: impl Into<Key>) -> Self {
        Self::with_policy(key, Policy::Queue { max_len: None })
    }

    /// Bind an additional key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        let key = key.into();
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
        self
    }

    /// Bound a `Queue` field. Has no effect on other policies.
    #[must_use]
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        if let Policy::Queue { max_len: bound } = &mut self.policy {
            *bound = Some(max_len);
        }
        self
    }

    /// Mark the field as a trigger for its owning component.
    #[must_use]
    pub fn trigger(mut self) -> Self {
        self.trigger = true;
        self
    }

    /// The bound keys.
    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// The buffering policy.
    #[must_use]
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Whether a delivery marks the owning component as due.
    #[must_use]
    pub fn is_trigger(&self) -> bool {
        self.trigger
    }
}

/// Observable state of a field, as seen from the incoming side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldState {
    /// Nothing has ever been delivered.
    Empty,
    /// `Latest`: at least one event is held.
    Holding,
    /// `Buffer`/`Queue`: events are waiting for the next step.
    Accumulating,
    /// `Buffer`: the last accumulated batch has been handed to a step.
    Drained,
    /// `History`: fewer than `capacity` events retained.
    PartiallyFull,
    /// `History`: at capacity, further deliveries evict the oldest event.
    Full,
}

#[derive(Debug)]
enum Slots {
    Latest {
        incoming: Vec<Option<Event>>,
        visible: Vec<Option<Event>>,
    },
    Buffer {
        incoming: Vec<Event>,
        visible: Vec<Event>,
    },
    History {
        incoming: VecDeque<Event>,
        visible: Vec<Event>,
        capacity: usize,
    },
    Queue {
        queue: VecDeque<Event>,
        max_len: Option<usize>,
    },
}

/// A named input field of a component, with its buffered events.
#[derive(Debug)]
pub struct InputField {
    name: String,
    spec: InputSpec,
    slots: Slots,
    received: bool,
    updated: bool,
    ever_received: bool,
}

impl InputField {
    /// Create an empty field from its declaration.
    #[must_use]
    pub fn new(name: impl Into<String>, spec: InputSpec) -> Self {
        let slots = match spec.policy {
            Policy::Latest => Slots::Latest {
                incoming: vec![None; spec.keys.len()],
                visible: vec![None; spec.keys.len()],
            },
            Policy::Buffer => Slots::Buffer {
                incoming: Vec::new(),
                visible: Vec::new(),
            },
            Policy::History { capacity } => Slots::History {
                incoming: VecDeque::with_capacity(capacity),
                visible: Vec::with_capacity(capacity),
                capacity,
            },
            Policy::Queue { max_len } => Slots::Queue {
                queue: VecDeque::new(),
                max_len,
            },
        };
        Self {
            name: name.into(),
            spec,
            slots,
            received: false,
            updated: false,
            ever_received: false,
        }
    }

    /// The field name within its component.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field declaration.
    #[must_use]
    pub fn spec(&self) -> &InputSpec {
        &self.spec
    }

    /// Whether the field is a trigger.
    #[must_use]
    pub fn is_trigger(&self) -> bool {
        self.spec.trigger
    }

    /// Accept an event from the router.
    ///
    /// Returns `true` when the delivery should mark the owning component as
    /// due, i.e. when this is a trigger field.
    pub fn deliver(&mut self, event: Event) -> bool {
        self.received = true;
        self.ever_received = true;
        match &mut self.slots {
            Slots::Latest { incoming, .. } => {
                if let Some(idx) = self.spec.keys.iter().position(|k| k == event.key()) {
                    incoming[idx] = Some(event);
                }
            }
            Slots::Buffer { incoming, .. } => incoming.push(event),
            Slots::History {
                incoming, capacity, ..
            } => {
                if incoming.len() == *capacity {
                    incoming.pop_front();
                }
                incoming.push_back(event);
            }
            Slots::Queue { queue, max_len } => {
                if max_len.is_some_and(|max| queue.len() >= max) {
                    queue.pop_front();
                }
                queue.push_back(event);
            }
        }
        self.spec.trigger
    }

    /// Make everything delivered since the previous switch visible.
    ///
    /// Called by the scheduler immediately before a processing step.
    pub fn switch(&mut self) {
        self.updated = self.received;
        self.received = false;
        match &mut self.slots {
            Slots::Latest { incoming, visible } => visible.clone_from(incoming),
            Slots::Buffer { incoming, visible } => *visible = std::mem::take(incoming),
            Slots::History {
                incoming, visible, ..
            } => {
                visible.clear();
                visible.extend(incoming.iter().cloned());
            }
            Slots::Queue { .. } => {}
        }
    }

    /// Release per-step state once the owning step has completed.
    ///
    /// Only `Buffer` fields are affected: their visible batch is emptied.
    pub fn drain(&mut self) {
        if let Slots::Buffer { visible, .. } = &mut self.slots {
            visible.clear();
        }
    }

    /// Whether at least one event arrived between the previous two switches.
    ///
    /// For `Queue` fields this reports whether the queue is non-empty.
    #[must_use]
    pub fn updated(&self) -> bool {
        match &self.slots {
            Slots::Queue { queue, .. } => !queue.is_empty(),
            _ => self.updated,
        }
    }

    /// State of the incoming side.
    #[must_use]
    pub fn state(&self) -> FieldState {
        match &self.slots {
            Slots::Latest { incoming, .. } => {
                if incoming.iter().any(Option::is_some) {
                    FieldState::Holding
                } else {
                    FieldState::Empty
                }
            }
            Slots::Buffer { incoming, .. } => {
                if !incoming.is_empty() {
                    FieldState::Accumulating
                } else if self.ever_received {
                    FieldState::Drained
                } else {
                    FieldState::Empty
                }
            }
            Slots::History {
                incoming, capacity, ..
            } => match incoming.len() {
                0 => FieldState::Empty,
                n if n < *capacity => FieldState::PartiallyFull,
                _ => FieldState::Full,
            },
            Slots::Queue { queue, .. } => {
                if queue.is_empty() {
                    FieldState::Empty
                } else {
                    FieldState::Accumulating
                }
            }
        }
    }

    /// The visible events, oldest first.
    ///
    /// For a `Latest` field bound to several keys this is the newest event
    /// of each key, ordered by sequence.
    #[must_use]
    pub fn events(&self) -> Vec<&Event> {
        match &self.slots {
            Slots::Latest { visible, .. } => {
                let mut events: Vec<&Event> = visible.iter().flatten().collect();
                events.sort_by_key(|e| e.sequence());
                events
            }
            Slots::Buffer { visible, .. } | Slots::History { visible, .. } => {
                visible.iter().collect()
            }
            Slots::Queue { queue, .. } => queue.iter().collect(),
        }
    }

    /// Number of visible events.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.slots {
            Slots::Latest { visible, .. } => visible.iter().flatten().count(),
            Slots::Buffer { visible, .. } | Slots::History { visible, .. } => visible.len(),
            Slots::Queue { queue, .. } => queue.len(),
        }
    }

    /// Returns `true` if no event is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The newest visible event. See [`InputField::value`] for what `None` means.
    #[must_use]
    pub fn latest(&self) -> Option<&Event> {
        match &self.slots {
            Slots::Latest { visible, .. } => visible.iter().flatten().max_by_key(|e| e.sequence()),
            Slots::Buffer { visible, .. } | Slots::History { visible, .. } => visible.last(),
            Slots::Queue { queue, .. } => queue.back(),
        }
    }

    /// The newest visible event carrying `key`.
    #[must_use]
    pub fn latest_for(&self, key: &str) -> Option<&Event> {
        match &self.slots {
            Slots::Latest { visible, .. } => self
                .spec
                .keys
                .iter()
                .position(|k| k.as_str() == key)
                .and_then(|idx| visible[idx].as_ref()),
            _ => self
                .events()
                .into_iter()
                .rev()
                .find(|e| e.key().as_str() == key),
        }
    }

    /// The newest visible payload as `T`.
    ///
    /// For Latest and History fields `Ok(None)` means the field has never
    /// been populated; it is distinct from any payload value, including
    /// `None` payloads. For Buffer and Queue fields it means no event is
    /// visible in this step.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::TypeMismatch`] if the payload is not a `T`.
    pub fn value<T: Any>(&self) -> Result<Option<&T>, FieldError> {
        self.latest().map(|e| self.downcast(e)).transpose()
    }

    /// All visible payloads as `T`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::TypeMismatch`] on the first payload that is not
    /// a `T`.
    pub fn values<T: Any>(&self) -> Result<Vec<&T>, FieldError> {
        self.events().into_iter().map(|e| self.downcast(e)).collect()
    }

    /// Remove the oldest event of a `Queue` field.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::PolicyMismatch`] for other policies.
    pub fn pop(&mut self) -> Result<Option<Event>, FieldError> {
        match &mut self.slots {
            Slots::Queue { queue, .. } => Ok(queue.pop_front()),
            _ => Err(FieldError::PolicyMismatch {
                field: self.name.clone(),
                policy: self.spec.policy.name(),
                required: "Queue",
            }),
        }
    }

    /// Remove every queued event of a `Queue` field, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::PolicyMismatch`] for other policies.
    pub fn take_all(&mut self) -> Result<Vec<Event>, FieldError> {
        match &mut self.slots {
            Slots::Queue { queue, .. } => Ok(queue.drain(..).collect()),
            _ => Err(FieldError::PolicyMismatch {
                field: self.name.clone(),
                policy: self.spec.policy.name(),
                required: "Queue",
            }),
        }
    }

    fn downcast<'a, T: Any>(&self, event: &'a Event) -> Result<&'a T, FieldError> {
        event
            .value::<T>()
            .ok_or_else(|| FieldError::TypeMismatch {
                field: self.name.clone(),
                expected: std::any::type_name::<T>(),
                found: event.payload().type_name(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Payload;

    fn event(key: &str, value: i32, sequence: u64) -> Event {
        Event::new(Key::from(key), Payload::new(value), None, sequence)
    }

    fn feed(field: &mut InputField, key: &str, values: &[i32], seq: &mut u64) {
        for &v in values {
            *seq += 1;
            field.deliver(event(key, v, *seq));
        }
    }

    #[test]
    fn test_latest_field() {
        // (first batch, second batch, expected value, expected updated)
        let cases: [(&[i32], &[i32], Option<i32>, bool); 3] = [
            (&[1, 2], &[3, 4], Some(4), true),
            (&[1, 2], &[], Some(2), false),
            (&[], &[], None, false),
        ];
        for (first, second, expected, updated) in cases {
            let mut seq = 0;
            let mut field = InputField::new("input", InputSpec::latest("key"));
            feed(&mut field, "key", first, &mut seq);
            field.switch();
            feed(&mut field, "key", second, &mut seq);
            field.switch();
            assert_eq!(field.updated(), updated);
            assert_eq!(field.value::<i32>().unwrap().copied(), expected);
        }
    }

    #[test]
    fn test_buffer_field() {
        let cases: [(&[i32], &[i32], Vec<i32>, bool); 3] = [
            (&[1, 2], &[3, 4], vec![3, 4], true),
            (&[1, 2], &[], vec![], false),
            (&[], &[], vec![], false),
        ];
        for (first, second, expected, updated) in cases {
            let mut seq = 0;
            let mut field = InputField::new("input", InputSpec::buffer("key"));
            feed(&mut field, "key", first, &mut seq);
            field.switch();
            feed(&mut field, "key", second, &mut seq);
            field.switch();
            assert_eq!(field.updated(), updated);
            let values: Vec<i32> = field.values::<i32>().unwrap().into_iter().copied().collect();
            assert_eq!(values, expected);
        }
    }

    #[test]
    fn test_history_field() {
        let cases: [(&[i32], &[i32], Vec<i32>, bool); 3] = [
            (&[1, 2], &[3, 4], vec![2, 3, 4], true),
            (&[1, 2], &[], vec![1, 2], false),
            (&[], &[], vec![], false),
        ];
        for (first, second, expected, updated) in cases {
            let mut seq = 0;
            let mut field = InputField::new("input", InputSpec::history("key", 3));
            feed(&mut field, "key", first, &mut seq);
            field.switch();
            feed(&mut field, "key", second, &mut seq);
            field.switch();
            assert_eq!(field.updated(), updated);
            let values: Vec<i32> = field.values::<i32>().unwrap().into_iter().copied().collect();
            assert_eq!(values, expected);
        }
    }

    #[test]
    fn test_history_never_exceeds_capacity() {
        let mut seq = 0;
        let mut field = InputField::new("trail", InputSpec::history("pos", 4));
        feed(&mut field, "pos", &[1, 2, 3, 4, 5], &mut seq);
        assert_eq!(field.state(), FieldState::Full);
        field.switch();
        let values: Vec<i32> = field.values::<i32>().unwrap().into_iter().copied().collect();
        assert_eq!(values, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_buffer_drain_clears_visible_batch_only() {
        let mut seq = 0;
        let mut field = InputField::new("clicks", InputSpec::buffer("click"));
        feed(&mut field, "click", &[1, 2], &mut seq);
        field.switch();
        feed(&mut field, "click", &[3], &mut seq);
        field.drain();
        assert!(field.is_empty());
        assert_eq!(field.state(), FieldState::Accumulating);
        field.switch();
        let values: Vec<i32> = field.values::<i32>().unwrap().into_iter().copied().collect();
        assert_eq!(values, vec![3]);
        assert_eq!(field.state(), FieldState::Drained);
    }

    #[test]
    fn test_latest_holds_one_event_per_key() {
        let mut field = InputField::new("pose", InputSpec::latest("left").with_key("right"));
        field.deliver(event("left", 1, 1));
        field.deliver(event("right", 2, 2));
        field.deliver(event("left", 3, 3));
        field.switch();
        assert_eq!(field.len(), 2);
        assert_eq!(field.latest_for("left").unwrap().value::<i32>(), Some(&3));
        assert_eq!(field.latest_for("right").unwrap().value::<i32>(), Some(&2));
        assert_eq!(field.value::<i32>().unwrap(), Some(&3));
        let order: Vec<u64> = field.events().iter().map(|e| e.sequence()).collect();
        assert_eq!(order, vec![2, 3]);
    }

    #[test]
    fn test_latest_is_not_cleared_between_steps() {
        let mut field = InputField::new("input", InputSpec::latest("key"));
        field.deliver(event("key", 5, 1));
        field.switch();
        field.drain();
        field.switch();
        assert_eq!(field.value::<i32>().unwrap(), Some(&5));
        assert!(!field.updated());
    }

    #[test]
    fn test_never_populated_is_distinct_from_none_payload() {
        let mut field = InputField::new("input", InputSpec::latest("key"));
        field.switch();
        assert!(field.value::<Option<i32>>().unwrap().is_none());
        field.deliver(Event::new(Key::from("key"), Payload::new(None::<i32>), None, 1));
        field.switch();
        assert_eq!(field.value::<Option<i32>>().unwrap(), Some(&None));
    }

    #[test]
    fn test_type_mismatch() {
        let mut field = InputField::new("input", InputSpec::latest("key"));
        field.deliver(event("key", 1, 1));
        field.switch();
        let err = field.value::<String>().unwrap_err();
        assert!(matches!(err, FieldError::TypeMismatch { found: "i32", .. }));
    }

    #[test]
    fn test_trigger_reported_on_delivery() {
        let mut plain = InputField::new("a", InputSpec::buffer("k"));
        let mut trigger = InputField::new("b", InputSpec::buffer("k").trigger());
        assert!(!plain.deliver(event("k", 1, 1)));
        assert!(trigger.deliver(event("k", 1, 1)));
    }

    #[test]
    fn test_queue_is_visible_immediately() {
        let mut field = InputField::new("inbox", InputSpec::queue("k").with_max_len(2));
        field.deliver(event("k", 1, 1));
        field.deliver(event("k", 2, 2));
        field.deliver(event("k", 3, 3));
        assert!(field.updated());
        let popped = field.pop().unwrap().unwrap();
        assert_eq!(popped.value::<i32>(), Some(&2));
        let rest = field.take_all().unwrap();
        assert_eq!(rest.len(), 1);
        assert!(field.is_empty());
    }

    #[test]
    fn test_pop_requires_queue_policy() {
        let mut field = InputField::new("input", InputSpec::latest("key"));
        assert!(matches!(field.pop(), Err(FieldError::PolicyMismatch { .. })));
    }
}

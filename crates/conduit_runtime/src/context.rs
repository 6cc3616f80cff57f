//! Per-step access to a component's fields and to the runtime.

use std::any::Any;
use std::time::{Duration, Instant};

use conduit_component::{ComponentId, Event, FieldError, InputField};

use crate::graph::Fields;
use crate::handle::RuntimeHandle;
use crate::offload::{OffloadBridge, OffloadTicket};

/// Requests a hook made that the scheduler applies once it returns.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub(crate) shutdown: bool,
    pub(crate) wake_at: Option<Instant>,
    pub(crate) offloads: usize,
}

/// Handed to every component hook.
///
/// Reads see the field state switched in at the start of the current step.
/// Values pushed with [`Context::emit`] are routed after the hook returns.
pub struct Context<'a> {
    id: &'a ComponentId,
    node: usize,
    fields: &'a mut Fields,
    now: Instant,
    effects: &'a mut Effects,
    bridge: &'a mut OffloadBridge,
    handle: &'a RuntimeHandle,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        id: &'a ComponentId,
        node: usize,
        fields: &'a mut Fields,
        now: Instant,
        effects: &'a mut Effects,
        bridge: &'a mut OffloadBridge,
        handle: &'a RuntimeHandle,
    ) -> Self {
        Self {
            id,
            node,
            fields,
            now,
            effects,
            bridge,
            handle,
        }
    }

    /// Id of the running component.
    #[must_use]
    pub fn id(&self) -> &ComponentId {
        self.id
    }

    /// Scheduler time at which the hook was entered.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.now
    }

    /// An input field by name.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::UnknownInput`] if no such field is declared.
    pub fn input(&self, name: &str) -> Result<&InputField, FieldError> {
        self.fields.input(name)
    }

    /// All input fields in declaration order.
    #[must_use]
    pub fn inputs(&self) -> &[InputField] {
        &self.fields.inputs
    }

    /// The newest visible value of an input.
    ///
    /// For Latest and History fields `None` means the field was never
    /// populated. For Buffer and Queue fields it means nothing is visible
    /// in this step.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError`] for unknown fields or mismatched payload types.
    pub fn latest<T: Any>(&self, name: &str) -> Result<Option<&T>, FieldError> {
        self.fields.input(name)?.value()
    }

    /// All visible values of an input, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError`] for unknown fields or mismatched payload types.
    pub fn values<T: Any>(&self, name: &str) -> Result<Vec<&T>, FieldError> {
        self.fields.input(name)?.values()
    }

    /// Whether an input received events since the previous step.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::UnknownInput`] if no such field is declared.
    pub fn updated(&self, name: &str) -> Result<bool, FieldError> {
        Ok(self.fields.input(name)?.updated())
    }

    /// Remove the oldest event of a queue input.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError`] for unknown or non-queue fields.
    pub fn pop(&mut self, name: &str) -> Result<Option<Event>, FieldError> {
        self.fields.input_mut(name)?.pop()
    }

    /// Remove every event of a queue input, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError`] for unknown or non-queue fields.
    pub fn take_all(&mut self, name: &str) -> Result<Vec<Event>, FieldError> {
        self.fields.input_mut(name)?.take_all()
    }

    /// Push a value to an output field.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::UnknownOutput`] if no such field is declared.
    pub fn emit<T: Any + Send + Sync>(&mut self, output: &str, value: T) -> Result<(), FieldError> {
        self.fields.output_mut(output)?.push(value);
        Ok(())
    }

    /// Run a blocking closure on the blocking thread pool.
    ///
    /// Returns at once. The current step stays open until the result has
    /// been passed to [`Component::resume`](crate::Component::resume); until
    /// then the component is not invoked again. Several calls may be
    /// outstanding; each is resumed separately.
    pub fn offload<F, T>(&mut self, f: F) -> OffloadTicket
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Any + Send,
    {
        self.effects.offloads += 1;
        self.bridge.spawn(self.node, f)
    }

    /// Invoke this component again at `at`. Bare components only; the
    /// scheduler owns the timing of every other kind.
    pub fn wake_at(&mut self, at: Instant) {
        self.effects.wake_at = Some(self.effects.wake_at.map_or(at, |t| t.min(at)));
    }

    /// Invoke this component again after `delay`. Bare components only.
    /// A delay past the clock's range sets no timer.
    pub fn wake_after(&mut self, delay: Duration) {
        if let Some(at) = self.now.checked_add(delay) {
            self.wake_at(at);
        }
    }

    /// Begin shutting down the runtime once this hook returns.
    pub fn shutdown(&mut self) {
        self.effects.shutdown = true;
    }

    /// A handle for publishing from other threads.
    #[must_use]
    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", self.id)
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

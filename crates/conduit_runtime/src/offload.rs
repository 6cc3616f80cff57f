//! Executor bridge: running blocking work off the dispatch loop.
//!
//! [`Context::offload`](crate::Context::offload) hands a blocking closure to
//! tokio's blocking pool and returns an [`OffloadTicket`] immediately. The
//! calling component's step stays open (it is not invoked again, and its
//! buffers are not drained) until the result comes back; the scheduler then
//! calls [`Component::resume`](crate::Component::resume) with an
//! [`Offloaded`] value on the dispatch loop. Other components keep running in
//! the meantime.
//!
//! Errors and panics inside the closure are captured and delivered to
//! `resume`; they never reach the scheduler.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::OffloadError;

/// Identifies one offloaded call of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OffloadTicket(u64);

impl OffloadTicket {
    /// The raw ticket number, unique per scheduler.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// The outcome of an offloaded call, handed to `resume`.
#[derive(Debug)]
pub struct Offloaded {
    ticket: OffloadTicket,
    result: Result<Box<dyn Any + Send>, OffloadError>,
}

impl Offloaded {
    /// The ticket returned when the call was issued.
    #[must_use]
    pub fn ticket(&self) -> OffloadTicket {
        self.ticket
    }

    /// Returns `true` if the call returned a value.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// The failure, if the call failed.
    #[must_use]
    pub fn error(&self) -> Option<&OffloadError> {
        self.result.as_ref().err()
    }

    /// Consume into the failure, if any.
    #[must_use]
    pub fn into_error(self) -> Option<OffloadError> {
        self.result.err()
    }

    /// Consume into the returned value.
    ///
    /// # Errors
    ///
    /// Returns the call's [`OffloadError`], or
    /// [`OffloadError::UnexpectedType`] if it returned something other than
    /// a `T`.
    pub fn into_result<T: Any>(self) -> Result<T, OffloadError> {
        self.result?
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| OffloadError::UnexpectedType {
                expected: std::any::type_name::<T>(),
            })
    }
}

/// A finished call on its way back to the dispatch loop.
#[derive(Debug)]
pub(crate) struct Completion {
    pub(crate) node: usize,
    pub(crate) offloaded: Offloaded,
}

/// Issues offloaded calls and tracks how many are still running.
#[derive(Debug)]
pub(crate) struct OffloadBridge {
    tx: mpsc::UnboundedSender<Completion>,
    next_ticket: u64,
    in_flight: usize,
}

impl OffloadBridge {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Completion>) -> Self {
        Self {
            tx,
            next_ticket: 0,
            in_flight: 0,
        }
    }

    /// Calls issued and not yet completed.
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Account for a completion received by the dispatch loop.
    pub(crate) fn completed(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub(crate) fn spawn<F, T>(&mut self, node: usize, f: F) -> OffloadTicket
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Any + Send,
    {
        let ticket = OffloadTicket(self.next_ticket);
        self.next_ticket += 1;
        self.in_flight += 1;

        let tx = self.tx.clone();
        let Ok(runtime) = Handle::try_current() else {
            let _ = tx.send(Completion {
                node,
                offloaded: Offloaded {
                    ticket,
                    result: Err(OffloadError::NoRuntime),
                },
            });
            return ticket;
        };

        debug!(ticket = ticket.0, "offloading blocking call");
        runtime.spawn_blocking(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(Ok(value)) => Ok(Box::new(value) as Box<dyn Any + Send>),
                Ok(Err(error)) => Err(OffloadError::Failed(error)),
                Err(panic) => Err(OffloadError::Panicked(panic_message(panic.as_ref()))),
            };
            // The scheduler may be gone by now; the result is then discarded.
            let _ = tx.send(Completion {
                node,
                offloaded: Offloaded { ticket, result },
            });
        });
        ticket
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_runtime_reports_no_runtime() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut bridge = OffloadBridge::new(tx);
        let ticket = bridge.spawn(3, || Ok(1_u8));
        assert_eq!(bridge.in_flight(), 1);

        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.node, 3);
        assert_eq!(completion.offloaded.ticket(), ticket);
        assert!(matches!(
            completion.offloaded.into_result::<u8>(),
            Err(OffloadError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_value_is_returned() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut bridge = OffloadBridge::new(tx);
        bridge.spawn(0, || Ok(6_u32 * 7));
        let completion = rx.recv().await.unwrap();
        bridge.completed();
        assert_eq!(bridge.in_flight(), 0);
        assert_eq!(completion.offloaded.into_result::<u32>().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_error_and_panic_are_captured() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut bridge = OffloadBridge::new(tx);
        bridge.spawn(0, || -> anyhow::Result<()> { anyhow::bail!("disk on fire") });
        bridge.spawn(1, || -> anyhow::Result<()> { panic!("worker exploded") });

        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let completion = rx.recv().await.unwrap();
            outcomes.push((completion.node, completion.offloaded.into_error().unwrap().to_string()));
        }
        outcomes.sort();
        assert!(outcomes[0].1.contains("disk on fire"));
        assert!(outcomes[1].1.contains("worker exploded"));
    }

    #[tokio::test]
    async fn test_wrong_type_requested() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut bridge = OffloadBridge::new(tx);
        bridge.spawn(0, || Ok("text"));
        let completion = rx.recv().await.unwrap();
        assert!(matches!(
            completion.offloaded.into_result::<u64>(),
            Err(OffloadError::UnexpectedType { .. })
        ));
    }
}

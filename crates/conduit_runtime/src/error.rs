//! Runtime error taxonomy.
//!
//! Only [`ConstructionError`] is fatal, and it can only occur before the
//! dispatch loop starts. Everything raised while the graph is running is
//! caught, logged and reported without stopping the loop.

use std::fmt;
use std::time::Duration;

use conduit_component::ComponentId;

/// Invalid graph detected while registering components.
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    /// An explicit identity collides with an already registered component.
    #[error("component id `{0}` is already registered")]
    DuplicateId(String),

    /// Two fields of one component share a name.
    #[error("component `{component}` declares field `{field}` more than once")]
    DuplicateField {
        /// The offending component.
        component: String,
        /// The repeated field name.
        field: String,
    },

    /// An input field is not bound to any key.
    #[error("input `{field}` of `{component}` is not bound to any key")]
    NoKeys {
        /// The offending component.
        component: String,
        /// The unbound field.
        field: String,
    },

    /// A history field was declared with capacity zero.
    #[error("history input `{field}` of `{component}` has zero capacity")]
    ZeroHistoryCapacity {
        /// The offending component.
        component: String,
        /// The history field.
        field: String,
    },

    /// A queue field was bounded to zero entries.
    #[error("queue input `{field}` of `{component}` has a zero length bound")]
    ZeroQueueLength {
        /// The offending component.
        component: String,
        /// The queue field.
        field: String,
    },

    /// An iterating component was declared with a zero period.
    #[error("iterating component `{0}` has a zero period")]
    ZeroPeriod(String),

    /// Iterating components run on their clock and cannot be triggered.
    #[error("iterating component `{component}` cannot have trigger field `{field}`")]
    TriggerOnIterating {
        /// The offending component.
        component: String,
        /// The trigger field.
        field: String,
    },

    /// An event-driven component would never run.
    #[error("event-driven component `{0}` needs at least one trigger field")]
    MissingTrigger(String),

    /// Bare components are not switched by the scheduler, so they may only
    /// declare `Queue` inputs.
    #[error("bare component `{component}` cannot have {policy} field `{field}`")]
    BufferedFieldOnBare {
        /// The offending component.
        component: String,
        /// The double-buffered field.
        field: String,
        /// The field's policy name.
        policy: &'static str,
    },
}

/// The component hook in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// [`Component::setup`](crate::Component::setup)
    Setup,
    /// [`Component::process`](crate::Component::process)
    Process,
    /// [`Component::resume`](crate::Component::resume)
    Resume,
    /// [`Component::cleanup`](crate::Component::cleanup)
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Setup => "setup",
            Phase::Process => "process",
            Phase::Resume => "resume",
            Phase::Cleanup => "cleanup",
        })
    }
}

/// A component hook returned an error.
#[derive(Debug, thiserror::Error)]
#[error("{phase} of `{component}` failed: {error:#}")]
pub struct ProcessingError {
    /// The failing component.
    pub component: ComponentId,
    /// The hook that failed.
    pub phase: Phase,
    /// The error returned by the hook.
    pub error: anyhow::Error,
}

/// Failure of an offloaded call, delivered to the calling component.
#[derive(Debug, thiserror::Error)]
pub enum OffloadError {
    /// The callable returned an error.
    #[error("offloaded call failed: {0:#}")]
    Failed(anyhow::Error),

    /// The callable panicked.
    #[error("offloaded call panicked: {0}")]
    Panicked(String),

    /// The result was requested as a different type than was returned.
    #[error("offloaded call did not return a `{expected}`")]
    UnexpectedType {
        /// The requested type.
        expected: &'static str,
    },

    /// The call was issued outside of a tokio runtime.
    #[error("no tokio runtime available to run the offloaded call")]
    NoRuntime,
}

/// Offloaded calls still running when the shutdown grace period expired.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{abandoned} offloaded call(s) abandoned after {grace:?} grace period")]
pub struct ShutdownTimeout {
    /// Number of calls that did not complete.
    pub abandoned: usize,
    /// The configured grace period.
    pub grace: Duration,
}

/// Invalid or missing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required option was not supplied.
    #[error("missing required option `{0}`")]
    Missing(String),

    /// An option could not be interpreted.
    #[error("invalid value for `{option}`: {reason}")]
    Invalid {
        /// Option or environment variable name.
        option: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// The runtime behind a [`RuntimeHandle`](crate::RuntimeHandle) has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("runtime has stopped")]
pub struct RuntimeStopped;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_error_display_includes_chain() {
        let err = ProcessingError {
            component: ComponentId::new("Sink0"),
            phase: Phase::Process,
            error: anyhow::anyhow!("disk full").context("writing frame"),
        };
        assert_eq!(
            err.to_string(),
            "process of `Sink0` failed: writing frame: disk full"
        );
    }

    #[test]
    fn test_shutdown_timeout_display() {
        let err = ShutdownTimeout {
            abandoned: 2,
            grace: Duration::from_millis(500),
        };
        assert_eq!(
            err.to_string(),
            "2 offloaded call(s) abandoned after 500ms grace period"
        );
    }
}

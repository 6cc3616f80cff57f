//! The [`Component`] trait and its scheduling variants.

use std::borrow::Cow;
use std::time::Duration;

use conduit_component::Ports;

use crate::context::Context;
use crate::offload::Offloaded;

/// How the scheduler decides when a component runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// Invoked every `period`. A step that overruns its period delays the
    /// next one instead of overlapping it.
    Iterating {
        /// Target time between the starts of consecutive steps.
        period: Duration,
    },
    /// Invoked once per cycle in which a trigger field received events.
    EventDriven,
    /// Invoked when a trigger field receives events or a timer set with
    /// [`Context::wake_at`] expires. Inputs are not double buffered.
    Bare,
}

impl ComponentKind {
    /// An iterating component with the given period.
    #[must_use]
    pub fn iterating(period: Duration) -> Self {
        Self::Iterating { period }
    }

    /// An iterating component running at `hz` steps per second.
    ///
    /// A non-positive or non-finite rate, or one whose period does not fit
    /// a [`Duration`], yields a zero period, which the graph builder rejects.
    #[must_use]
    pub fn at_rate(hz: f64) -> Self {
        let period = if hz.is_finite() && hz > 0.0 {
            Duration::try_from_secs_f64(1.0 / hz).unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };
        Self::Iterating { period }
    }

    /// Short name used in logs and snapshots.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Iterating { .. } => "iterating",
            Self::EventDriven => "event_driven",
            Self::Bare => "bare",
        }
    }

    /// The period of an iterating component.
    #[must_use]
    pub fn period(&self) -> Option<Duration> {
        match self {
            Self::Iterating { period } => Some(*period),
            _ => None,
        }
    }
}

/// A processing unit of the graph.
///
/// The scheduler owns every component and calls its hooks from the dispatch
/// loop only, so implementations need no interior synchronisation. Hooks
/// return `anyhow::Result`; an error is logged as a
/// [`ProcessingError`](crate::ProcessingError) and does not stop the loop
/// unless the runtime is configured to.
///
/// # Examples
///
/// ```rust
/// use conduit_component::{InputSpec, Ports};
/// use conduit_runtime::{Component, ComponentKind, Context};
///
/// struct Doubler;
///
/// impl Component for Doubler {
///     fn kind(&self) -> ComponentKind {
///         ComponentKind::EventDriven
///     }
///
///     fn ports(&self) -> Ports {
///         Ports::new()
///             .input("x", InputSpec::latest("x").trigger())
///             .output("y", "y")
///     }
///
///     fn process(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
///         if let Some(x) = ctx.latest::<i64>("x")?.copied() {
///             ctx.emit("y", x * 2)?;
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Component: Send + 'static {
    /// Scheduling variant. Read once, at registration.
    fn kind(&self) -> ComponentKind;

    /// Field declarations. Read once, at registration.
    fn ports(&self) -> Ports;

    /// Base of the generated component id; defaults to the type name.
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(short_type_name(std::any::type_name::<Self>()))
    }

    /// Called once, before the first processing step.
    fn setup(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// One processing step.
    fn process(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()>;

    /// Continue a step after an offloaded call finished.
    ///
    /// The default re-raises a failed call as a processing error and ignores
    /// returned values.
    fn resume(&mut self, _ctx: &mut Context<'_>, offloaded: Offloaded) -> anyhow::Result<()> {
        match offloaded.into_error() {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    /// Called once during shutdown, after the last step.
    fn cleanup(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

//! # conduit_runtime
//!
//! Dispatch runtime for component graphs.
//!
//! Components declare input and output fields bound to string keys; the
//! [`Router`] delivers every emitted event to all fields bound to its key,
//! and the [`Scheduler`] decides in a single loop which components run:
//!
//! - **Iterating** components run at a fixed period and slip rather than
//!   overlap when a step overruns.
//! - **EventDriven** components run once per cycle in which one of their
//!   trigger fields received events.
//! - **Bare** components run on trigger deliveries to their queue fields or
//!   on timers they set themselves.
//!
//! Blocking work is handed to tokio's blocking pool with
//! [`Context::offload`]; the result comes back through
//! [`Component::resume`] while the loop keeps dispatching everything else.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use conduit_component::{InputSpec, Ports};
//! use conduit_runtime::{
//!     Component, ComponentKind, Context, GraphBuilder, RuntimeConfig, Scheduler,
//! };
//!
//! struct Counter(u64);
//!
//! impl Component for Counter {
//!     fn kind(&self) -> ComponentKind {
//!         ComponentKind::iterating(Duration::from_millis(100))
//!     }
//!
//!     fn ports(&self) -> Ports {
//!         Ports::new().output("count", "count")
//!     }
//!
//!     fn process(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
//!         self.0 += 1;
//!         ctx.emit("count", self.0)?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut builder = GraphBuilder::new();
//!     builder.add(Counter(0))?;
//!     let scheduler = Scheduler::new(builder.build(), RuntimeConfig::from_env()?);
//!     let report = scheduler.run().await;
//!     println!("{} cycles", report.cycles);
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod component;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod handle;
mod metrics;
pub mod offload;
pub mod options;
pub mod router;
pub mod scheduler;
pub mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use component::{Component, ComponentKind};
pub use config::{ErrorPolicy, RuntimeConfig};
pub use context::Context;
pub use error::{
    ConfigError, ConstructionError, OffloadError, Phase, ProcessingError, RuntimeStopped,
    ShutdownTimeout,
};
pub use graph::{Graph, GraphBuilder};
pub use handle::RuntimeHandle;
pub use offload::{OffloadTicket, Offloaded};
pub use options::{ConfigDescriptor, Configurable, OptionSpec, ParsedOptions};
pub use router::Router;
pub use scheduler::{CycleReport, RunReport, Scheduler};
pub use snapshot::{EdgeSnapshot, GraphSnapshot, InputSnapshot, NodeSnapshot, OutputSnapshot};

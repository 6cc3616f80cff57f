//! # conduit_component
//!
//! The vocabulary shared by every component in a conduit graph: events, the
//! input fields that buffer them, and the port declarations components use
//! to describe what they read and write.
//!
//! This crate provides:
//!
//! - [`Event`]: immutable `(key, payload, source, sequence)` record.
//! - [`Payload`]: type-erased, cheaply clonable event value.
//! - [`Key`] / [`ComponentId`]: the string identities the graph is wired with.
//! - [`InputField`]: receptacle with a [`Policy`] (Latest, Buffer, History, Queue).
//! - [`OutputField`]: per-step accumulator of emitted payloads.
//! - [`Ports`]: declarative list of a component's fields.
//! - [`metric`]: framework event keys and metric payloads.

pub mod error;
pub mod event;
pub mod field;
pub mod id;
pub mod metric;
pub mod output;
pub mod ports;

pub use error::FieldError;
pub use event::{Event, Payload};
pub use field::{FieldState, InputField, InputSpec, Policy};
pub use id::{ComponentId, Key};
pub use output::OutputField;
pub use ports::Ports;

//! Client-side message synchronization core.
//!
//! Keeps a local view of channels and messages, sends messages
//! optimistically through a queue, and reconciles them with what the server
//! pushes back. HTTP and the gateway socket live behind ports (traits)
//! implemented in adapter crates.

pub mod app;
pub mod channel;
pub mod composer;
pub mod config;
pub mod context;
pub mod domain;
pub mod errors;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod permissions;
pub mod ports;
pub mod queue;
pub mod schedule;
pub mod snowflake;
pub mod store;
pub mod typing;

pub use app::App;
pub use context::{ChangeEvent, Context};
pub use errors::{Error, Result};

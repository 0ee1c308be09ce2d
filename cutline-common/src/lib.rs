//! # cutline Common Library
//!
//! Shared code for the cutline audio core: tick timing, the event-list model
//! consumed by the quantizer and the renderer, configuration file discovery
//! and logging setup.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod timing;

pub use error::{Error, Result};
pub use events::{Event, EventId, EventKind, EventList};
pub use timing::Ticks;

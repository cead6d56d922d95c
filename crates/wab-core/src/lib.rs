//! Core domain + application logic for the wabot WhatsApp assistant.
//!
//! This crate is intentionally platform-agnostic. The WhatsApp bridge, the
//! completion provider, and the search tool live behind ports (traits)
//! implemented in adapter crates.

pub mod agent;
pub mod completion;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod normalize;
pub mod registry;
pub mod state;
pub mod transport;
pub mod wire;

pub use errors::{Error, Result};

//! Core of the team relay bot.
//!
//! This crate knows nothing about the chat network's wire protocol. The
//! transport lives behind [`transport::port::Transport`], implemented in
//! adapter crates; everything here is classification, routing and relay
//! bookkeeping.

pub mod classifier;
pub mod commands;
pub mod config;
pub mod crew;
pub mod domain;
pub mod errors;
pub mod forward;
pub mod lifecycle;
pub mod logging;
pub mod router;
pub mod setup;
pub mod store;
pub mod transport;
pub mod utils;

pub use errors::{Error, Result};

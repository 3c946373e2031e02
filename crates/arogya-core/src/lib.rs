//! Core domain + application logic for the Arogya WhatsApp bot.
//!
//! This crate is intentionally framework-agnostic. The WhatsApp transport and
//! the external analysis service live behind ports (traits) implemented in
//! adapter crates.

pub mod analysis;
pub mod bot;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod session;
pub mod utils;

pub use errors::{Error, Result};

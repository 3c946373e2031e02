//! HTTP handlers for the webhook server.

pub mod health;
pub mod webhook;

pub use health::health;
pub use webhook::webhook;

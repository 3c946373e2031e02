//! Cross-messenger abstractions (WhatsApp via WPPConnect today).

pub mod port;
pub mod throttled;
pub mod types;

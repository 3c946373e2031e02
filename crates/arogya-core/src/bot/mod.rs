//! Menu-driven WhatsApp conversation flow.
//!
//! `machine` is the pure transition logic, `dispatcher` runs it against the
//! session store, the messenger and the analysis service.

pub mod dispatcher;
pub mod machine;
pub mod texts;

pub use dispatcher::{ConversationLocks, Dispatcher, DispatcherConfig};

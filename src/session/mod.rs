//! Clustering sessions: configuration, lifecycle and execution.

mod cancel;
mod config;
mod runner;
mod state;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use config::SessionConfig;
pub use runner::{build_worker_pool, SessionRunner};
pub use state::{SessionFailure, SessionRecord, SessionStatus, SessionStatusReport};

//! Data model shared by search, clustering, sessions and synthesis.

mod types;

pub use types::*;

//! Function-calling agent core: a bounded LLM/tool round loop with trusted
//! parameter resolution, conversation memory and resumable state.

pub mod core;
pub mod logging;

pub use conduit_types as types;

/// Current crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub type Result<T> = std::result::Result<T, anyhow::Error>;

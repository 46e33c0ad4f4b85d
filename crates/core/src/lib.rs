//! Ambient infrastructure shared across the remoting workspace: signal
//! handling, graceful drain, structured logging setup and build metadata.
//!
//! Nothing in this crate knows about endpoints, protocols or sockets; it is
//! the same kind of "plumbing" crate every binary in the workspace depends
//! on.

pub mod drain;
pub mod prelude;
pub mod signal;
pub mod telemetry;
pub mod version;

pub use prelude::*;

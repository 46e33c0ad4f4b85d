//! Common imports pulled into scope with `use remoting_core::prelude::*`.

pub use std::fmt::Debug;
pub use std::sync::Arc;

pub use anyhow::{Context, anyhow};
pub use tracing::{debug, error, info, trace, warn};

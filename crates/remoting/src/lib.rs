//! Agent-side connection core for a controller/agent remoting subsystem.
//!
//! Establishes a bidirectional, full-duplex message channel between this
//! process (the "agent") and a remote controller over TCP: resolving an
//! endpoint from a set of candidate controller URLs, negotiating one of
//! four wire-compatible protocol variants, and running the matching
//! handshake. The upper "channel" object that multiplexes RPC frames over
//! the resulting byte stream is an external collaborator and out of scope
//! here (see [`state::ChannelHandle`]).

pub mod config;
pub mod connector;
pub mod cookie;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod hostport;
pub mod iohub;
pub mod protocol;
pub mod protocols;
pub mod proxy;
pub mod retry;
pub mod state;
pub mod wire;

pub use config::AgentConfig;
pub use connector::{ConnectOutcome, InboundTcpConnector};
pub use error::{RemotingError, Result};

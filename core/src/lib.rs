//! Root of the `rfsh-core` library.
//!
//! A single-client remote shell bridge for connection-oriented serial
//! transports such as an RFCOMM channel. The [`supervisor`] accepts one peer
//! at a time, the [`session`] manager runs a [`bridge`] for it, and the bridge
//! either executes each received line through the [`exec`] module or forwards
//! raw bytes to an interactive shell on a [`pty`].
//!
//! Whoever can reach the listener can run arbitrary commands with the
//! privileges of the hosting process. Pairing and link security belong to
//! the transport provisioner; this crate performs no authentication.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the transport or `tracing`.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod exec;
pub mod provision;
pub mod pty;
pub mod session;
mod spawn;
pub mod supervisor;
pub mod transport;

pub use bridge::TerminationReason;
pub use config::BridgeConfig;
pub use config::BridgeMode;
pub use error::BridgeErr;
pub use events::BridgeEvent;
pub use events::ChannelEventSink;
pub use events::EventSink;
pub use events::TracingEventSink;
pub use exec::CommandExecutor;
pub use exec::CommandOutcome;
pub use exec::CommandStatus;
pub use provision::ConfiguredProvisioner;
pub use provision::TransportProvisioner;
pub use session::SessionId;
pub use session::SessionManager;
pub use supervisor::ListenerSupervisor;
pub use supervisor::RestartPolicy;
pub use supervisor::serve;
pub use supervisor::serve_with;

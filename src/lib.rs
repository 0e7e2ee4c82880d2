#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// The messages clients send, and the replies they get.
pub mod actions;

/// Serializes device access: one command on the wire at a time.
pub mod arbitrator;

/// Code relating to setting up the server which sets up connections and spawns handlers for clients.
pub mod server;

/// Clients.
pub mod client;

/// The command line interface.
pub mod cli;

/// Runs on the server.
///
/// Owns the connection registry, the arbitrator and the power state.
pub(crate) mod control_center;

/// Handles incoming websockets.
pub(crate) mod websocket;

/// The actor spawned from a connected user.
pub(crate) mod peer;

/// The live connections.
pub(crate) mod registry;

/// A device simulated in memory.
pub mod mock;

/// Serial port driver.
pub mod serial;

/// Relates to config files.
pub mod config;

/// Commands the gateway answers itself.
pub mod internal;

/// The device command queue.
pub mod queue;

/// Power relay control.
pub mod power;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;

/// A connected user.
pub mod user;

/// Broadcasts the server emits.
pub mod events;

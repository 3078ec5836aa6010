//! Real-time broadcast hub over TCP.
//!
//! Every message a connected client sends is fanned out to all currently
//! connected clients, the sender included. Slow or dead consumers are
//! dropped instead of stalling everyone else. Each module owns one
//! responsibility:
//!
//! - [`cli`] parses the command-line interface for serve and client modes.
//! - [`hub`] is the single dispatcher task serializing registration,
//!   unregistration, and broadcast fan-out over the client registry.
//! - [`session`] runs the per-connection inbound and outbound tasks,
//!   including the ping/pong liveness protocol.
//! - [`server`] accepts TCP connections and hands each one to a session.
//! - [`client`] is the terminal client, multiplexing stdin and hub frames.
//! - [`wire`] provides the newline-delimited JSON frame protocol.
//!
//! Integration and unit tests use this crate directly to exercise the hub
//! dispatcher, the liveness protocol, and the wire format.

pub mod cli;
pub mod client;
pub mod hub;
pub mod server;
pub mod session;
pub mod wire;

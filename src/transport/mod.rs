//! Connection plumbing: the duplex wire abstraction, per-backend WebSocket
//! connectors, and the REST pre-step one backend requires before its socket
//! handshake.

pub mod rest;
pub mod wire;
pub mod ws;

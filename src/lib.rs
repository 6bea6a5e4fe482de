//! A TCP server that reconstructs images from sensing matrices and signals.
//!
//! Clients send job frames over a plain line protocol. Jobs wait in a bounded
//! queue, are admitted by a worker pool only when the host has room for them,
//! and are solved with CGNR or CGNE. Each result goes back to the client as a
//! base64 PNG inside one JSON line.

pub mod config;
pub mod error;
pub mod protocol;
pub mod resources;
pub mod scheduler;
pub mod service;
pub mod solver;
pub mod storage;
pub mod telemetry;

pub use config::ServerConfig;
pub use scheduler::{Pipeline, Scheduler};
pub use service::Server;

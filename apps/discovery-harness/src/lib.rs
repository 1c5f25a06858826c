//! Cross-process device-discovery harness.
//!
//! The harness starts a broadcaster process, asks it to announce simulated
//! cameras one at a time, discovers each over a [`device_discovery`] context
//! and checks identity and stream catalog against a fixture. The
//! broadcaster's request handling lives here too so both binaries share the
//! protocol, logging and CLI plumbing.

pub mod app;
pub mod broadcaster;
pub mod cases;
pub mod cli;
pub mod error;
pub mod remote;
pub mod scenario;
pub mod telemetry;
pub mod verify;

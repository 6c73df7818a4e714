#![forbid(unsafe_code)]

//! Host side of the FSCP script control protocol.
//!
//! Spawns pre-approved scripts against a file or directory, speaks FSCP with
//! them over stdio, tracks every session in a process registry, and records a
//! transcript of each session on disk.

pub mod catalog;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod protocol;
pub mod sink;
pub mod transcript;

pub use config::HostConfig;
pub use errors::{AppError, Result};
pub use orchestrator::Supervisor;

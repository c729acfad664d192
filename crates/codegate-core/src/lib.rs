//! Core access-control logic for the codegate chat gateway.
//!
//! This crate is intentionally framework-agnostic. Telegram / HTTP / the
//! completion provider live behind ports (traits) implemented in adapter crates.

pub mod codes;
pub mod config;
pub mod domain;
pub mod errors;
pub mod gateway;
pub mod logging;
pub mod moderation;
pub mod ports;
pub mod rate_limit;
pub mod security;
pub mod sessions;
pub mod store;
pub mod transcript;

pub use errors::{Error, ErrorKind, Result};

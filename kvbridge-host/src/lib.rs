//! # kvbridge-host
//!
//! The host side of kvbridge: executes guest requests against a backing
//! store and streams iterator results back with credit-based flow control.
//!
//! This crate provides:
//! - [`HostSession`] / [`serve`]: the per-connection demultiplexer over any
//!   duplex transport
//! - [`Server`]: a TCP accept loop hosting one store for many guests
//! - YAML + environment configuration for the server binary

pub mod config;
pub mod error;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError, NetworkConfig, SessionTuning};
pub use error::HostError;
pub use server::{Server, ServerConfig, ServerStats};
pub use session::{serve, HostSession, SessionConfig};

//! # kvbridge-guest
//!
//! The guest side of kvbridge: an ordered key/value database whose
//! operations execute on a remote host over an attached rpc stream.
//!
//! This crate provides:
//! - [`Guest`]: the database handle with get/put/del/getMany/batch/clear
//! - [`GuestIterator`]: streaming range iteration with credit-based flow
//!   control, seek, and resume-after-reconnect
//! - Attachment lifecycle: single rpc stream, optional retry with replay,
//!   flush signalling, process keepalive ref-counting
//! - Forwarding mode for colocated stores

pub mod error;
pub mod guest;
pub mod ids;
pub mod iterator;

pub use error::GuestError;
pub use guest::{Guest, GuestOptions, Keepalive};
pub use iterator::{Entry, GuestIterator};

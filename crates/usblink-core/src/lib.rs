//! Core data model for USB device discovery and communication.
//!
//! This crate holds the platform-independent pieces: device identities
//! rebuilt from interface paths, enumeration scope flags, port metadata,
//! open options, and the fixed-layout record codec used by platform
//! backends to decode raw device subsystem buffers.

pub mod constants;
pub mod error;
pub mod records;
pub mod types;

pub use error::{Error, Result};
pub use records::{DevInfoRecord, InterfaceDetailRecord, RecordLayout};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

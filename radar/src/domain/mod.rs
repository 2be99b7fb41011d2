//! Domain model for radar
//!
//! This module contains core domain types and errors:
//! - Decoded events and their downstream projection
//! - The sensor lifecycle states
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{CoreEvent, DomainEvent, RawRecord, ServiceState, FILE_DELETED};

pub use errors::{CloseError, DecodeError, ReadError, SensorError, SinkError};

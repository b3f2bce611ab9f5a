//! Shared types and wire protocol for the rfscan spectrum console.

pub mod types;
pub mod wire;

pub use types::*;
pub use wire::WireError;

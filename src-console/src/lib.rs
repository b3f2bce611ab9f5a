//! rfscan console
//!
//! Client side of the 2.4 GHz spectrum scanner: keeps the session to the
//! device alive, buffers frames for the waterfall, keeps settings in sync with
//! the device and turns spectrum peaks into notes.

pub mod config;
pub mod connection;
pub mod console;
pub mod history;
pub mod operator;
pub mod presentation;
pub mod settings_sync;
pub mod simulator;
pub mod sonifier;

pub use console::{Console, ConsoleInput, ConsoleOptions};

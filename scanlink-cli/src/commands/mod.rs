//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod keys;
pub(crate) mod kiosk;
pub(crate) mod list_ports;
pub(crate) mod listen;
pub(crate) mod send;

//! Lakesweep command-line support: configuration, logging, collaborator
//! wiring and report rendering shared by the `lakesweep` binary

pub mod config;
pub mod lake;
pub mod logging;
pub mod render;
pub mod util;

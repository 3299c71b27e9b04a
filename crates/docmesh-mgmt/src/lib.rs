#![warn(missing_docs)]

//! docmesh management subsystem: operator CLI, report rendering, telemetry setup

pub mod cli;
pub mod render;
pub mod telemetry;

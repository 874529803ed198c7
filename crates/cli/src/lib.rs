//! Library half of the `mdrive` binary, split out for integration tests.

pub mod cli;
pub mod commands;
pub mod logging;

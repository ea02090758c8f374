//! Outer surfaces: the command line and the JSON readers and writers it uses.

pub mod cli;
pub mod json;

//! Command-line job implementations

pub mod commands;

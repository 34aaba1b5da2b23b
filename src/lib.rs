//! Digimail letter workflow engine.

pub mod commands;
pub mod config;
pub mod error;
pub mod letters;
pub mod notify;
pub mod store;
pub mod workflow;
